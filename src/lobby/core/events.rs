use super::session::{GameMode, LobbySession};
use crate::relay::Role;
use serde::Serialize;

/// Notifications emitted by the coordinator for presentation code.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LobbyEvent {
    JoinedSession {
        lobby: LobbySession,
    },
    SessionUpdated {
        lobby: LobbySession,
    },
    GameModeChanged {
        mode: GameMode,
    },
    LeftSession,
    KickedOrLeft {
        lobby_id: String,
    },
    ListChanged {
        lobbies: Vec<LobbySession>,
    },
    StartRequested {
        join_code: String,
    },
    SessionStarted {
        role: Role,
    },
    StartFailed {
        reason: String,
    },
}
