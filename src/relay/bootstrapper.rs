use super::allocation::{RelayServerData, RelayService};
use super::transport::{Role, Transport};
use crate::error::{LobbyError, Result};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// Turns a relay join code plus a role into a running transport session.
pub struct Bootstrapper<R, T> {
    relay: R,
    transport: T,
    in_flight: Mutex<Option<Role>>,
}

/// Releases the in-flight claim when a bootstrap attempt finishes.
struct Claim<'a> {
    slot: &'a Mutex<Option<Role>>,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl<R: RelayService, T: Transport> Bootstrapper<R, T> {
    pub fn new(relay: R, transport: T) -> Self {
        Self {
            relay,
            transport,
            in_flight: Mutex::new(None),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn active_role(&self) -> Option<Role> {
        self.transport.active_role()
    }

    /// Allocate a relay for `expected_connections` peers, start hosting on it
    /// and return the join code to publish.
    pub async fn allocate_and_host(&self, expected_connections: u32) -> Result<String> {
        let _claim = self.claim(Role::Host)?;

        let max_connections = expected_connections.saturating_add(1);
        let allocation = self
            .relay
            .create_allocation(max_connections)
            .await
            .inspect_err(|e| warn!(error = %e, max_connections, "Relay allocation failed"))?;

        let join_code = self
            .relay
            .get_join_code(&allocation.allocation_id)
            .await
            .inspect_err(|e| {
                warn!(error = %e, allocation_id = allocation.allocation_id, "Join code lookup failed")
            })?;

        info!(
            allocation_id = allocation.allocation_id,
            join_code, max_connections, "Allocated relay"
        );

        self.start(RelayServerData::from(&allocation), Role::Host)?;
        Ok(join_code)
    }

    /// Resolve `join_code` and start connecting to the host through the relay.
    pub async fn join_as_client(&self, join_code: &str) -> Result<()> {
        let join_code = join_code.trim();
        if join_code.is_empty() {
            warn!("Skipping relay join because the join code is empty");
            return Err(LobbyError::invalid("relay join code is empty"));
        }

        let _claim = self.claim(Role::Client)?;

        info!(join_code, "Joining relay");
        let allocation = self
            .relay
            .join_allocation(join_code)
            .await
            .inspect_err(|e| warn!(error = %e, join_code, "Relay join failed"))?;

        self.start(RelayServerData::from(&allocation), Role::Client)
    }

    /// Stop the running transport session, if any.
    pub fn shutdown(&self) {
        if let Some(role) = self.transport.active_role() {
            info!(%role, "Shutting down transport");
        }
        self.transport.shutdown();
    }

    fn claim(&self, role: Role) -> Result<Claim<'_>> {
        if let Some(active) = self.transport.active_role() {
            warn!(requested = %role, %active, "Transport already running, skipping start");
            return Err(LobbyError::TransportActive(active));
        }

        let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = *slot {
            warn!(requested = %role, %pending, "Transport start already in flight, skipping");
            return Err(LobbyError::TransportActive(pending));
        }
        *slot = Some(role);

        Ok(Claim {
            slot: &self.in_flight,
        })
    }

    fn start(&self, data: RelayServerData, role: Role) -> Result<()> {
        self.transport.set_relay_server_data(data);

        let started = match role {
            Role::Host => self.transport.start_host(),
            Role::Client => self.transport.start_client(),
        };

        if let Err(reason) = started {
            warn!(%role, reason, "Transport failed to start, clearing relay configuration");
            self.transport.shutdown();
            return Err(LobbyError::Transport(reason));
        }

        info!(%role, "Transport started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::memory::{MemoryRelay, MemoryTransport};

    fn bootstrapper() -> Bootstrapper<MemoryRelay, MemoryTransport> {
        Bootstrapper::new(MemoryRelay::new(), MemoryTransport::new())
    }

    #[tokio::test]
    async fn host_allocates_for_expected_peers_plus_self() {
        let boot = bootstrapper();

        let code = boot.allocate_and_host(1).await.unwrap();

        assert_eq!(code.len(), 6);
        assert_eq!(boot.active_role(), Some(Role::Host));
        let data = boot.transport().relay_data().unwrap();
        assert!(data.is_host);
        assert_eq!(data.protocol, "dtls");
        assert_eq!(boot.relay.allocation_size(&data.allocation_id), Some(2));
    }

    #[tokio::test]
    async fn failed_allocation_leaves_transport_untouched() {
        let boot = bootstrapper();
        boot.relay.fail_next_allocations(1);

        let result = boot.allocate_and_host(1).await;

        assert!(matches!(result, Err(LobbyError::Remote(ServiceError::Unavailable(_)))));
        assert_eq!(boot.active_role(), None);
        assert_eq!(boot.transport().relay_data(), None);
    }

    #[tokio::test]
    async fn failed_start_clears_relay_configuration() {
        let boot = bootstrapper();
        boot.transport().fail_next_start();

        let result = boot.allocate_and_host(1).await;

        assert!(matches!(result, Err(LobbyError::Transport(_))));
        assert_eq!(boot.active_role(), None);
        assert_eq!(boot.transport().relay_data(), None);
    }

    #[tokio::test]
    async fn blank_code_is_rejected_without_remote_call() {
        let boot = bootstrapper();

        let result = boot.join_as_client("  ").await;

        assert!(matches!(result, Err(LobbyError::InvalidInput(_))));
        assert_eq!(boot.relay.join_calls(), 0);
    }

    #[tokio::test]
    async fn second_start_is_skipped_while_active() {
        let boot = bootstrapper();
        boot.allocate_and_host(1).await.unwrap();

        let result = boot.allocate_and_host(1).await;

        assert_eq!(result, Err(LobbyError::TransportActive(Role::Host)));
        assert_eq!(boot.relay.allocation_calls(), 1);
        assert_eq!(boot.transport().start_count(), 1);
    }

    #[tokio::test]
    async fn client_joins_host_allocation() {
        let relay = MemoryRelay::new();
        let host = Bootstrapper::new(relay.clone(), MemoryTransport::new());
        let client = Bootstrapper::new(relay, MemoryTransport::new());

        let code = host.allocate_and_host(1).await.unwrap();
        client.join_as_client(&code).await.unwrap();

        let host_data = host.transport().relay_data().unwrap();
        let client_data = client.transport().relay_data().unwrap();
        assert_eq!(client.active_role(), Some(Role::Client));
        assert_eq!(host_data.allocation_id, client_data.allocation_id);
        assert!(!client_data.is_host);
    }

    #[tokio::test]
    async fn unknown_code_reports_remote_error() {
        let boot = bootstrapper();

        let result = boot.join_as_client("ZZZZZZ").await;

        assert!(matches!(result, Err(LobbyError::Remote(ServiceError::NotFound(_)))));
        assert_eq!(boot.active_role(), None);
    }

    #[tokio::test]
    async fn shutdown_allows_a_new_session() {
        let boot = bootstrapper();
        boot.allocate_and_host(1).await.unwrap();

        boot.shutdown();

        assert_eq!(boot.active_role(), None);
        assert!(boot.allocate_and_host(1).await.is_ok());
    }
}
