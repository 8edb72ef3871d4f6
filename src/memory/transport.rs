use crate::relay::{RelayServerData, Role, Transport};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct TransportState {
    relay: Option<RelayServerData>,
    role: Option<Role>,
    starts: usize,
    fail_next_start: bool,
}

/// Transport stand-in that records what it was asked to do.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn relay_data(&self) -> Option<RelayServerData> {
        self.state().relay.clone()
    }

    pub fn start_count(&self) -> usize {
        self.state().starts
    }

    pub fn fail_next_start(&self) {
        self.state().fail_next_start = true;
    }

    fn start(&self, role: Role) -> Result<(), String> {
        let mut state = self.state();
        if state.relay.is_none() {
            return Err("relay server data not configured".into());
        }
        if let Some(active) = state.role {
            return Err(format!("already running as {active}"));
        }
        if std::mem::take(&mut state.fail_next_start) {
            return Err(format!("failed to bind {role} socket"));
        }
        state.role = Some(role);
        state.starts += 1;
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn set_relay_server_data(&self, data: RelayServerData) {
        self.state().relay = Some(data);
    }

    fn start_host(&self) -> Result<(), String> {
        self.start(Role::Host)
    }

    fn start_client(&self) -> Result<(), String> {
        self.start(Role::Client)
    }

    fn active_role(&self) -> Option<Role> {
        self.state().role
    }

    fn shutdown(&self) {
        let mut state = self.state();
        state.role = None;
        state.relay = None;
    }
}
