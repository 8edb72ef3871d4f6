#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tsunagu::lobby::{GameMode, LobbySession};
use tsunagu::memory::{MemoryBackend, MemoryLobbyClient, MemoryRelay, MemoryTransport};
use tsunagu::{Bootstrapper, Config, Coordinator, LobbyEvent};

pub type TestCoordinator = Coordinator<MemoryLobbyClient, MemoryRelay, MemoryTransport>;

/// One player: a coordinator plus handles on its in-memory collaborators.
pub struct Player {
    pub coordinator: Arc<TestCoordinator>,
    pub store: MemoryLobbyClient,
    pub transport: MemoryTransport,
    pub events: broadcast::Receiver<LobbyEvent>,
}

impl Player {
    /// Events received since the last call.
    pub fn drain(&mut self) -> Vec<LobbyEvent> {
        let mut events = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return events,
            }
        }
    }

    pub fn id(&self) -> String {
        self.store.player_id().expect("player is signed in")
    }
}

/// The shared services every player in a test talks to.
#[derive(Clone, Default)]
pub struct World {
    pub backend: MemoryBackend,
    pub relay: MemoryRelay,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn player(&self, config: Config) -> Player {
        let store = self.backend.client();
        let transport = MemoryTransport::new();
        let bootstrapper = Bootstrapper::new(self.relay.clone(), transport.clone());
        let coordinator = Arc::new(Coordinator::new(store.clone(), bootstrapper, config));
        let events = coordinator.subscribe();
        Player {
            coordinator,
            store,
            transport,
            events,
        }
    }

    pub async fn signed_in(&self, name: &str) -> Player {
        self.signed_in_with(name, test_config()).await
    }

    pub async fn signed_in_with(&self, name: &str, config: Config) -> Player {
        let mut player = self.player(config);
        player.coordinator.authenticate(name).await.unwrap();
        player.drain();
        player
    }

    /// A host with a public lobby of `capacity` and a guest who joined it by code.
    pub async fn lobby_pair(&self, capacity: usize) -> (Player, Player, LobbySession) {
        let mut host = self.signed_in("Alice").await;
        let mut guest = self.signed_in("Bob").await;

        let lobby = host
            .coordinator
            .create_session("Friday Night", capacity, false, GameMode::CaptureTheFlag)
            .await
            .unwrap();
        guest.coordinator.join_by_code(&lobby.lobby_code).await.unwrap();

        host.drain();
        guest.drain();
        (host, guest, lobby)
    }
}

pub fn test_config() -> Config {
    Config::default()
        .with_poll_interval(Duration::from_millis(1100))
        .with_heartbeat_interval(Duration::from_secs(15))
        .with_list_refresh(None)
}

pub fn count<F>(events: &[LobbyEvent], pred: F) -> usize
where
    F: Fn(&LobbyEvent) -> bool,
{
    events.iter().filter(|e| pred(*e)).count()
}
