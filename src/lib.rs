pub mod config;
pub mod error;
pub mod lobby;
pub mod memory;
pub mod relay;

pub use config::Config;
pub use error::{LobbyError, Result, ServiceError};
pub use lobby::{Coordinator, CoordinatorDriver, LobbyEvent, Phase, Stage};
pub use relay::{Bootstrapper, Role};
