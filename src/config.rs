use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);
const DEFAULT_POLL: Duration = Duration::from_millis(1100);
const DEFAULT_LIST_COUNT: usize = 25;
const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub heartbeat_interval: Duration,
    pub poll_interval: Duration,
    /// Automatic lobby-list refresh. `None` disables the timer.
    pub list_refresh_interval: Option<Duration>,
    pub list_count: usize,
    pub event_capacity: usize,
    pub player_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT,
            poll_interval: DEFAULT_POLL,
            list_refresh_interval: None,
            list_count: DEFAULT_LIST_COUNT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            player_name: "Player".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| parse::<u64>(&v));

        Self {
            heartbeat_interval: parsed("TSUNAGU_HEARTBEAT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            poll_interval: parsed("TSUNAGU_POLL_MILLIS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            list_refresh_interval: parsed("TSUNAGU_LIST_REFRESH_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            list_count: lookup("TSUNAGU_LIST_COUNT")
                .and_then(|v| parse(&v))
                .unwrap_or(defaults.list_count),
            event_capacity: lookup("TSUNAGU_EVENT_CAPACITY")
                .and_then(|v| parse::<usize>(&v))
                .map(|c| c.max(1))
                .unwrap_or(defaults.event_capacity),
            player_name: lookup("TSUNAGU_PLAYER_NAME").unwrap_or(defaults.player_name),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_list_refresh(mut self, interval: Option<Duration>) -> Self {
        self.list_refresh_interval = interval;
        self
    }
}

fn parse<T: FromStr>(raw: &str) -> Option<T> {
    raw.trim().parse().ok()
}
