use crate::lobby::core::{LobbySession, Member, PlayerCharacter};
use crate::relay::Role;

/// Progress of the handoff from lobby to network session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Joined, start not triggered yet.
    Waiting,
    /// Start acted on; relay work in flight.
    Starting,
    /// Host holds a relay allocation whose code is not published yet.
    Publishing { join_code: String },
    /// Start was acted on but bootstrapping failed; waits for the caller.
    Stalled { join_code: Option<String> },
    InSession { role: Role, join_code: String },
}

impl Stage {
    /// Whether the local process has already acted on "start game".
    pub fn has_acted(&self) -> bool {
        !matches!(self, Stage::Waiting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Unauthenticated,
    Idle,
    Joined(Stage),
}

#[derive(Debug, Clone)]
pub(crate) struct Identity {
    pub player_id: String,
    pub player_name: String,
    pub character: PlayerCharacter,
}

impl Identity {
    pub fn as_member(&self) -> Member {
        Member::new(self.player_id.clone(), &self.player_name, self.character)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct JoinedLobby {
    /// Bumped on every join so late results for an older lobby are dropped.
    pub epoch: u64,
    pub session: LobbySession,
    pub stage: Stage,
}

#[derive(Debug, Default)]
pub(crate) struct CoordinatorState {
    pub identity: Option<Identity>,
    pub joined: Option<JoinedLobby>,
    next_epoch: u64,
}

impl CoordinatorState {
    pub fn phase(&self) -> Phase {
        match (&self.identity, &self.joined) {
            (None, _) => Phase::Unauthenticated,
            (Some(_), None) => Phase::Idle,
            (Some(_), Some(joined)) => Phase::Joined(joined.stage.clone()),
        }
    }

    /// Make `session` the current lobby; returns its epoch.
    pub fn adopt(&mut self, session: LobbySession) -> u64 {
        self.next_epoch += 1;
        self.joined = Some(JoinedLobby {
            epoch: self.next_epoch,
            session,
            stage: Stage::Waiting,
        });
        self.next_epoch
    }

    /// The joined lobby, only if it is still the one identified by `epoch`.
    pub fn current(&mut self, epoch: u64) -> Option<&mut JoinedLobby> {
        self.joined.as_mut().filter(|j| j.epoch == epoch)
    }

    pub fn set_stage(&mut self, epoch: u64, stage: Stage) -> bool {
        match self.current(epoch) {
            Some(joined) => {
                joined.stage = stage;
                true
            }
            None => false,
        }
    }

    /// Leave the joined lobby if it is still `epoch`, handing back what was left.
    pub fn take(&mut self, epoch: u64) -> Option<JoinedLobby> {
        self.current(epoch)?;
        self.joined.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::core::Metadata;

    fn session(id: &str) -> LobbySession {
        LobbySession {
            id: id.into(),
            lobby_code: "abc234".into(),
            name: "Room".into(),
            host_id: "alice".into(),
            members: vec![Member::new("alice", "Alice", PlayerCharacter::Marine)],
            metadata: Metadata::new(),
            capacity: 2,
            is_private: false,
            created_at: 1,
        }
    }

    #[test]
    fn phase_follows_identity_and_membership() {
        let mut state = CoordinatorState::default();
        assert_eq!(state.phase(), Phase::Unauthenticated);

        state.identity = Some(Identity {
            player_id: "alice".into(),
            player_name: "Alice".into(),
            character: PlayerCharacter::Marine,
        });
        assert_eq!(state.phase(), Phase::Idle);

        state.adopt(session("l1"));
        assert_eq!(state.phase(), Phase::Joined(Stage::Waiting));
    }

    #[test]
    fn stale_epoch_is_ignored() {
        let mut state = CoordinatorState::default();
        let first = state.adopt(session("l1"));
        let second = state.adopt(session("l2"));

        assert!(!state.set_stage(first, Stage::Starting));
        assert!(state.take(first).is_none());
        assert!(state.set_stage(second, Stage::Starting));
        assert_eq!(state.take(second).unwrap().stage, Stage::Starting);
    }

    #[test]
    fn rejoining_same_lobby_gets_new_epoch() {
        let mut state = CoordinatorState::default();
        let first = state.adopt(session("l1"));
        state.take(first);
        let second = state.adopt(session("l1"));

        assert_ne!(first, second);
    }
}
