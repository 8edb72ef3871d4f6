use super::state::Stage;
use crate::lobby::core::{GameMode, LobbySession};

/// Relay work a poll tick asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartAction {
    /// Host: the lobby is full, allocate a relay and start hosting.
    AllocateRelay { expected_connections: u32 },
    /// Host: a relay is allocated but its code still has to be published.
    PublishJoinCode { join_code: String },
    /// Client: the host published a join code.
    JoinRelay { join_code: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The local player is no longer in the member list.
    Kicked,
    Continue {
        changed: bool,
        mode_changed: Option<GameMode>,
        start: Option<StartAction>,
    },
}

/// Evaluate one poll snapshot against the snapshot the tick started from.
///
/// Host authority is re-derived from `latest`. Membership is checked first,
/// so a removed player never starts a session it no longer belongs to.
pub fn decide(
    local_id: &str,
    stage: &Stage,
    previous: &LobbySession,
    latest: &LobbySession,
) -> Decision {
    if !latest.has_member(local_id) {
        return Decision::Kicked;
    }

    let is_host = latest.is_host(local_id);
    let start = match stage {
        Stage::Waiting if is_host => {
            // The join code is write-once: never allocate over a published one
            (latest.is_full() && latest.relay_join_code().is_none()).then(|| {
                StartAction::AllocateRelay {
                    expected_connections: u32::try_from(latest.capacity.saturating_sub(1))
                        .unwrap_or(u32::MAX),
                }
            })
        }
        Stage::Waiting => latest.relay_join_code().map(|code| StartAction::JoinRelay {
            join_code: code.to_string(),
        }),
        Stage::Publishing { join_code } if is_host => Some(StartAction::PublishJoinCode {
            join_code: join_code.clone(),
        }),
        _ => None,
    };

    let mode = latest.game_mode();
    Decision::Continue {
        changed: latest.differs_from(previous),
        mode_changed: mode.filter(|m| previous.game_mode() != Some(*m)),
        start,
    }
}
