//! In-process stand-ins for the lobby service, the relay service and the
//! network transport. Used by the demo binary and the test suites.

mod codes;
mod lobby_service;
mod relay;
mod transport;

pub use codes::{CODE_LENGTH, generate_code, generate_unique_code};
pub use lobby_service::{INACTIVE_AFTER, MemoryBackend, MemoryLobbyClient, StoreCall, StoreOp};
pub use relay::MemoryRelay;
pub use transport::MemoryTransport;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Consume one injected failure, if any are pending.
fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
