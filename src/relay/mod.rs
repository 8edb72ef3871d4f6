mod allocation;
mod bootstrapper;
mod transport;

pub use allocation::{Allocation, JoinAllocation, RELAY_PROTOCOL, RelayServerData, RelayService};
pub use bootstrapper::Bootstrapper;
pub use transport::{Role, Transport};
