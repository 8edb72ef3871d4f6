pub mod events;
pub mod query;
pub mod session;

pub use events::LobbyEvent;
pub use query::{QueryField, QueryFilter, QueryOp, QueryOptions, QueryOrder};
pub use session::{
    DataValue, GameMode, LobbySession, Member, Metadata, PlayerCharacter, Visibility,
};
