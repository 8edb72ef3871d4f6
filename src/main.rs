use futures_util::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tsunagu::lobby::GameMode;
use tsunagu::memory::{MemoryBackend, MemoryLobbyClient, MemoryRelay, MemoryTransport};
use tsunagu::{Bootstrapper, Config, Coordinator, CoordinatorDriver, LobbyEvent, Role};

type DemoCoordinator = Coordinator<MemoryLobbyClient, MemoryRelay, MemoryTransport>;

const START_TIMEOUT: Duration = Duration::from_secs(10);

fn coordinator(backend: &MemoryBackend, relay: &MemoryRelay, config: &Config) -> Arc<DemoCoordinator> {
    let bootstrapper = Bootstrapper::new(relay.clone(), MemoryTransport::new());
    Arc::new(Coordinator::new(backend.client(), bootstrapper, config.clone()))
}

async fn wait_for_start(mut events: broadcast::Receiver<LobbyEvent>) -> Option<Role> {
    loop {
        match events.recv().await {
            Ok(LobbyEvent::SessionStarted { role }) => return Some(role),
            Ok(LobbyEvent::StartFailed { reason }) => {
                tracing::warn!(reason, "Session start failed");
                return None;
            }
            Ok(event) => tracing::debug!(?event, "Lobby event"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    let backend = MemoryBackend::new();
    let relay = MemoryRelay::new();

    let host = coordinator(&backend, &relay, &config);
    let guest = coordinator(&backend, &relay, &config);

    host.authenticate(&config.player_name).await?;
    guest.authenticate(&format!("{} Two", config.player_name)).await?;

    let host_events = host.subscribe();
    let guest_events = guest.subscribe();
    let _host_driver = CoordinatorDriver::spawn(host.clone());
    let _guest_driver = CoordinatorDriver::spawn(guest.clone());

    let lobby = host
        .create_session("Demo Lobby", 2, false, GameMode::CaptureTheFlag)
        .await?;
    tracing::info!(lobby_code = lobby.lobby_code, "Waiting for a second player");
    guest.join_by_code(&lobby.lobby_code).await?;

    let started = future::join(wait_for_start(host_events), wait_for_start(guest_events));
    tokio::select! {
        result = tokio::time::timeout(START_TIMEOUT, started) => match result {
            Ok((Some(host_role), Some(guest_role))) => {
                tracing::info!(%host_role, %guest_role, "Network session running");
            }
            Ok(_) => tracing::warn!("Network session did not start"),
            Err(_) => tracing::warn!(timeout = ?START_TIMEOUT, "Timed out waiting for the session"),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    if let Some(lobby) = host.joined_lobby() {
        println!("{}", serde_json::to_string_pretty(&lobby)?);
    }

    guest.leave_session().await?;
    host.leave_session().await?;
    Ok(())
}
