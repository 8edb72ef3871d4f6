use super::allocation::RelayServerData;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Host,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// The local network transport that carries the game session.
///
/// Calls are synchronous: configuring and starting only kick off the
/// transport, they do not wait for peers.
pub trait Transport: Send + Sync + 'static {
    fn set_relay_server_data(&self, data: RelayServerData);

    /// Begin listening for clients through the configured relay.
    fn start_host(&self) -> Result<(), String>;

    /// Begin connecting to the host through the configured relay.
    fn start_client(&self) -> Result<(), String>;

    /// Role of the running session, if any.
    fn active_role(&self) -> Option<Role>;

    /// Stop any running session and drop the relay configuration.
    fn shutdown(&self);
}
