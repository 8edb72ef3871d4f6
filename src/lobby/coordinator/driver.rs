use super::service::Coordinator;
use crate::lobby::store::{Authenticator, RecordStore};
use crate::relay::{RelayService, Transport};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Background timers of a coordinator: heartbeat, lobby poll and the
/// optional lobby list refresh. Dropping the driver stops them.
pub struct CoordinatorDriver {
    tasks: Vec<JoinHandle<()>>,
}

impl CoordinatorDriver {
    pub fn spawn<S, R, T>(coordinator: Arc<Coordinator<S, R, T>>) -> Self
    where
        S: RecordStore + Authenticator,
        R: RelayService,
        T: Transport,
    {
        let config = coordinator.config().clone();
        let mut tasks = Vec::with_capacity(3);

        let c = coordinator.clone();
        tasks.push(spawn_ticker("heartbeat", config.heartbeat_interval, move || {
            let c = c.clone();
            async move {
                // Failures are logged by the coordinator and retried next tick
                let _ = c.heartbeat_tick().await;
            }
        }));

        let c = coordinator.clone();
        tasks.push(spawn_ticker("poll", config.poll_interval, move || {
            let c = c.clone();
            async move {
                let _ = c.poll_tick().await;
            }
        }));

        if let Some(interval) = config.list_refresh_interval {
            let c = coordinator;
            tasks.push(spawn_ticker("list refresh", interval, move || {
                let c = c.clone();
                async move {
                    if c.is_authenticated() {
                        let _ = c.refresh_list().await;
                    }
                }
            }));
        }

        Self { tasks }
    }

    /// Same as dropping the driver.
    pub fn stop(self) {}
}

impl Drop for CoordinatorDriver {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Run `tick` every `period`, first after one full period. A slow tick delays
/// the next one instead of letting ticks pile up.
fn spawn_ticker<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(name, ?period, "Timer started");
        loop {
            interval.tick().await;
            tick().await;
        }
    })
}
