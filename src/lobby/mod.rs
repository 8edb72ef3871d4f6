pub mod coordinator;
pub mod core;
pub mod store;

pub use coordinator::{Coordinator, CoordinatorDriver, Phase, Stage};
pub use core::{GameMode, LobbyEvent, LobbySession, Member, PlayerCharacter};
pub use store::{Authenticator, RecordStore};
