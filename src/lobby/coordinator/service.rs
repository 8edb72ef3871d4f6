use super::state::{CoordinatorState, Identity, Phase, Stage};
use super::transition::{Decision, StartAction, decide};
use crate::config::Config;
use crate::error::{LobbyError, Result, ServiceError};
use crate::lobby::core::session::{
    KEY_GAME_MODE, KEY_PLAYER_CHARACTER, KEY_PLAYER_NAME, KEY_RELAY_JOIN_CODE, KEY_START_GAME,
    START_FLAG_IDLE, START_FLAG_STARTED,
};
use crate::lobby::core::{
    DataValue, GameMode, LobbyEvent, LobbySession, Metadata, PlayerCharacter, QueryOptions,
};
use crate::lobby::store::{Authenticator, CreateOptions, QuickJoinOptions, RecordStore};
use crate::relay::{Bootstrapper, RelayService, Role, Transport};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Everything a poll tick needs, captured before the fetch.
struct TickBase {
    epoch: u64,
    lobby_id: String,
    local_id: String,
    previous: LobbySession,
    stage: Stage,
}

/// A joined-lobby reference for user operations.
struct Current {
    epoch: u64,
    lobby: LobbySession,
    player_id: String,
}

/// Owns the local view of the joined lobby and drives it towards a network
/// session. Presentation code holds it behind an `Arc`, calls the user
/// operations and listens to [`LobbyEvent`]s.
pub struct Coordinator<S, R, T> {
    store: S,
    bootstrapper: Bootstrapper<R, T>,
    config: Config,
    state: Mutex<CoordinatorState>,
    events: broadcast::Sender<LobbyEvent>,
}

impl<S, R, T> Coordinator<S, R, T>
where
    S: RecordStore + Authenticator,
    R: RelayService,
    T: Transport,
{
    pub fn new(store: S, bootstrapper: Bootstrapper<R, T>, config: Config) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            bootstrapper,
            config,
            state: Mutex::new(CoordinatorState::default()),
            events,
        }
    }

    /// Receive lobby events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<LobbyEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bootstrapper(&self) -> &Bootstrapper<R, T> {
        &self.bootstrapper
    }

    pub fn phase(&self) -> Phase {
        self.state().phase()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state().identity.is_some()
    }

    pub fn player_id(&self) -> Option<String> {
        self.state().identity.as_ref().map(|i| i.player_id.clone())
    }

    /// Snapshot of the joined lobby.
    pub fn joined_lobby(&self) -> Option<LobbySession> {
        self.state().joined.as_ref().map(|j| j.session.clone())
    }

    /// Whether the local player is host according to the latest snapshot.
    pub fn is_host(&self) -> bool {
        let state = self.state();
        match (&state.identity, &state.joined) {
            (Some(identity), Some(joined)) => joined.session.is_host(&identity.player_id),
            _ => false,
        }
    }

    fn state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: LobbyEvent) {
        debug!(?event, "Emitting lobby event");
        let _ = self.events.send(event);
    }

    fn identity(&self) -> Result<Identity> {
        self.state()
            .identity
            .clone()
            .ok_or_else(|| LobbyError::invalid("not signed in"))
    }

    fn current(&self) -> Result<Current> {
        let state = self.state();
        let identity = state
            .identity
            .as_ref()
            .ok_or_else(|| LobbyError::invalid("not signed in"))?;
        let joined = state
            .joined
            .as_ref()
            .ok_or_else(|| LobbyError::invalid("not in a lobby"))?;
        Ok(Current {
            epoch: joined.epoch,
            lobby: joined.session.clone(),
            player_id: identity.player_id.clone(),
        })
    }

    fn current_as_host(&self, action: &str) -> Result<Current> {
        let current = self.current()?;
        if !current.lobby.is_host(&current.player_id) {
            warn!(action, "Only the host can do this");
            return Err(LobbyError::invalid(format!("only the host can {action}")));
        }
        Ok(current)
    }

    /// Sign in anonymously and fetch the lobby list once.
    pub async fn authenticate(&self, player_name: &str) -> Result<String> {
        let profile = player_name.trim().replace(' ', "_");
        if profile.is_empty() {
            return Err(LobbyError::invalid("player name is empty"));
        }
        if self.state().joined.is_some() {
            return Err(LobbyError::invalid("leave the lobby before signing in again"));
        }

        let player_id = self
            .store
            .sign_in_anonymously(&profile)
            .await
            .inspect_err(|e| warn!(error = %e, profile, "Sign-in failed"))?;

        {
            let mut state = self.state();
            let character = state
                .identity
                .as_ref()
                .map(|i| i.character)
                .unwrap_or_default();
            state.identity = Some(Identity {
                player_id: player_id.clone(),
                player_name: profile.clone(),
                character,
            });
        }
        info!(player_id, profile, "Signed in");

        if let Err(e) = self.refresh_list().await {
            warn!(error = %e, "Initial lobby list refresh failed");
        }
        Ok(player_id)
    }

    pub async fn create_session(
        &self,
        name: &str,
        max_members: usize,
        is_private: bool,
        mode: GameMode,
    ) -> Result<LobbySession> {
        let identity = self.identity()?;
        if name.trim().is_empty() {
            return Err(LobbyError::invalid("lobby name is empty"));
        }
        if max_members == 0 {
            return Err(LobbyError::invalid("a lobby needs room for at least one member"));
        }

        let options = CreateOptions {
            is_private,
            player: identity.as_member(),
            data: Metadata::from([
                (KEY_GAME_MODE.to_string(), DataValue::public(mode.to_string())),
                (KEY_RELAY_JOIN_CODE.to_string(), DataValue::member("")),
                (KEY_START_GAME.to_string(), DataValue::member(START_FLAG_IDLE)),
            ]),
        };

        let result = self.store.create(name, max_members, options).await;
        let lobby = self.adopt(result, "create")?;
        info!(
            lobby_id = lobby.id,
            lobby_code = lobby.lobby_code,
            name,
            max_members,
            "Created lobby"
        );
        Ok(lobby)
    }

    pub async fn join_by_code(&self, lobby_code: &str) -> Result<LobbySession> {
        let lobby_code = lobby_code.trim();
        if lobby_code.is_empty() {
            return Err(LobbyError::invalid("lobby code is empty"));
        }
        let identity = self.identity()?;

        let result = self.store.join_by_code(lobby_code, identity.as_member()).await;
        self.adopt(result, "join by code")
    }

    pub async fn join_by_id(&self, lobby_id: &str) -> Result<LobbySession> {
        let lobby_id = lobby_id.trim();
        if lobby_id.is_empty() {
            return Err(LobbyError::invalid("lobby id is empty"));
        }
        let identity = self.identity()?;

        let result = self.store.join_by_id(lobby_id, identity.as_member()).await;
        self.adopt(result, "join by id")
    }

    pub async fn quick_join(&self) -> Result<LobbySession> {
        let identity = self.identity()?;

        let options = QuickJoinOptions {
            player: identity.as_member(),
            filters: Vec::new(),
        };
        let result = self.store.quick_join(options).await;
        self.adopt(result, "quick join")
    }

    /// Install a freshly joined lobby as the current one.
    fn adopt(
        &self,
        result: std::result::Result<LobbySession, ServiceError>,
        action: &str,
    ) -> Result<LobbySession> {
        let lobby = result.inspect_err(|e| warn!(error = %e, action, "Joining lobby failed"))?;

        let replaced = self.state().joined.as_ref().map(|j| j.epoch);
        if let Some(epoch) = replaced {
            warn!(lobby_id = lobby.id, "Replacing current lobby");
            self.teardown(epoch);
        }
        self.state().adopt(lobby.clone());
        info!(lobby_id = lobby.id, members = lobby.members.len(), action, "Joined lobby");

        self.emit(LobbyEvent::JoinedSession {
            lobby: lobby.clone(),
        });
        Ok(lobby)
    }

    /// Query open lobbies, newest first. Never touches the joined lobby.
    pub async fn refresh_list(&self) -> Result<Vec<LobbySession>> {
        self.identity()?;

        let lobbies = self
            .store
            .query(QueryOptions::open_lobbies(self.config.list_count))
            .await
            .inspect_err(|e| warn!(error = %e, "Lobby list query failed"))?;

        debug!(count = lobbies.len(), "Lobby list refreshed");
        self.emit(LobbyEvent::ListChanged {
            lobbies: lobbies.clone(),
        });
        Ok(lobbies)
    }

    pub async fn leave_session(&self) -> Result<()> {
        let Ok(current) = self.current() else {
            return Ok(());
        };

        match self
            .store
            .remove_player(&current.lobby.id, &current.player_id)
            .await
        {
            Ok(()) => {}
            Err(ServiceError::NotFound(reason)) => {
                debug!(reason, "Lobby or membership already gone");
            }
            Err(e) => {
                warn!(error = %e, lobby_id = current.lobby.id, "Leaving lobby failed");
                return Err(e.into());
            }
        }

        if self.teardown(current.epoch) {
            info!(lobby_id = current.lobby.id, "Left lobby");
            self.emit(LobbyEvent::LeftSession);
        }
        Ok(())
    }

    /// Remove another member. Host only; the next poll reflects the change.
    pub async fn kick_member(&self, player_id: &str) -> Result<()> {
        let current = self.current_as_host("kick players")?;
        if player_id == current.player_id {
            return Err(LobbyError::invalid("use leave to remove yourself"));
        }

        self.store
            .remove_player(&current.lobby.id, player_id)
            .await
            .inspect_err(|e| warn!(error = %e, player_id, "Kick failed"))?;

        info!(lobby_id = current.lobby.id, player_id, "Kicked player");
        Ok(())
    }

    /// Delete the lobby record. Host only.
    pub async fn delete_session(&self) -> Result<()> {
        let current = self.current_as_host("delete the lobby")?;

        self.store
            .delete(&current.lobby.id)
            .await
            .inspect_err(|e| warn!(error = %e, lobby_id = current.lobby.id, "Delete failed"))?;

        if self.teardown(current.epoch) {
            info!(lobby_id = current.lobby.id, "Deleted lobby");
            self.emit(LobbyEvent::LeftSession);
        }
        Ok(())
    }

    /// Switch between the game modes. Host only.
    pub async fn change_game_mode(&self) -> Result<GameMode> {
        let current = self.current_as_host("change the game mode")?;
        let mode = current
            .lobby
            .game_mode()
            .unwrap_or(GameMode::CaptureTheFlag)
            .toggled();

        let data = Metadata::from([(KEY_GAME_MODE.to_string(), DataValue::public(mode.to_string()))]);
        let lobby = self
            .store
            .update_metadata(&current.lobby.id, data)
            .await
            .inspect_err(|e| warn!(error = %e, %mode, "Game mode update failed"))?;

        self.replace_snapshot(current.epoch, lobby)?;
        info!(%mode, "Game mode changed");
        self.emit(LobbyEvent::GameModeChanged { mode });
        Ok(mode)
    }

    pub async fn update_player_name(&self, player_name: &str) -> Result<()> {
        let player_name = player_name.trim().replace(' ', "_");
        if player_name.is_empty() {
            return Err(LobbyError::invalid("player name is empty"));
        }
        self.update_identity(|identity| identity.player_name = player_name.clone())?;

        self.push_player_data(KEY_PLAYER_NAME, player_name).await
    }

    pub async fn update_player_character(&self, character: PlayerCharacter) -> Result<()> {
        self.update_identity(|identity| identity.character = character)?;

        self.push_player_data(KEY_PLAYER_CHARACTER, character.to_string())
            .await
    }

    fn update_identity(&self, f: impl FnOnce(&mut Identity)) -> Result<()> {
        let mut state = self.state();
        let identity = state
            .identity
            .as_mut()
            .ok_or_else(|| LobbyError::invalid("not signed in"))?;
        f(identity);
        Ok(())
    }

    async fn push_player_data(&self, key: &str, value: String) -> Result<()> {
        let Ok(current) = self.current() else {
            return Ok(());
        };

        let data = Metadata::from([(key.to_string(), DataValue::public(value))]);
        let lobby = self
            .store
            .update_player(&current.lobby.id, &current.player_id, data)
            .await
            .inspect_err(|e| warn!(error = %e, key, "Player update failed"))?;

        self.replace_snapshot(current.epoch, lobby)
    }

    fn replace_snapshot(&self, epoch: u64, lobby: LobbySession) -> Result<()> {
        {
            let mut state = self.state();
            let joined = state.current(epoch).ok_or(LobbyError::Superseded)?;
            joined.session = lobby.clone();
        }
        self.emit(LobbyEvent::SessionUpdated { lobby });
        Ok(())
    }

    /// Keep the lobby record alive. Skipped unless the local player is host.
    pub async fn heartbeat_tick(&self) -> Result<()> {
        let Ok(current) = self.current() else {
            return Ok(());
        };
        if !current.lobby.is_host(&current.player_id) {
            return Ok(());
        }

        debug!(lobby_id = current.lobby.id, "Heartbeat");
        self.store
            .heartbeat(&current.lobby.id)
            .await
            .inspect_err(|e| warn!(error = %e, lobby_id = current.lobby.id, "Heartbeat failed"))?;
        Ok(())
    }

    fn tick_base(&self) -> Option<TickBase> {
        let state = self.state();
        let identity = state.identity.as_ref()?;
        let joined = state.joined.as_ref()?;
        Some(TickBase {
            epoch: joined.epoch,
            lobby_id: joined.session.id.clone(),
            local_id: identity.player_id.clone(),
            previous: joined.session.clone(),
            stage: joined.stage.clone(),
        })
    }

    /// Fetch the lobby record and react to what changed since the last tick.
    pub async fn poll_tick(&self) -> Result<()> {
        let Some(base) = self.tick_base() else {
            return Ok(());
        };

        let latest = match self.store.get(&base.lobby_id).await {
            Ok(latest) => latest,
            Err(ServiceError::NotFound(reason)) => {
                info!(lobby_id = base.lobby_id, reason, "Lobby no longer exists");
                self.handle_removed(&base);
                return Ok(());
            }
            Err(e) => {
                warn!(error = %e, lobby_id = base.lobby_id, "Lobby poll failed, keeping last snapshot");
                return Err(e.into());
            }
        };

        let decision = decide(&base.local_id, &base.stage, &base.previous, &latest);
        let Decision::Continue {
            changed,
            mode_changed,
            start,
        } = decision
        else {
            info!(lobby_id = base.lobby_id, "Kicked from lobby");
            self.handle_removed(&base);
            return Ok(());
        };

        let (start, fresh) = {
            let mut state = self.state();
            let Some(joined) = state.current(base.epoch) else {
                debug!(lobby_id = base.lobby_id, "Lobby changed during poll, discarding result");
                return Ok(());
            };

            // A local write during the fetch already installed a newer snapshot;
            // the next tick diffs against that one
            let fresh = joined.session == base.previous;
            if fresh {
                joined.session = latest.clone();
            } else {
                debug!(lobby_id = base.lobby_id, "Snapshot replaced during poll, keeping it");
            }

            // Another caller may have acted on start while this tick was fetching
            let start = start.filter(|_| joined.stage == base.stage);
            if start.is_some() {
                joined.stage = Stage::Starting;
            }
            (start, fresh)
        };

        if fresh && changed {
            self.emit(LobbyEvent::SessionUpdated { lobby: latest });
        }
        if let Some(mode) = mode_changed.filter(|_| fresh) {
            self.emit(LobbyEvent::GameModeChanged { mode });
        }

        match start {
            Some(action) => self.start(base.epoch, action).await,
            None => Ok(()),
        }
    }

    fn handle_removed(&self, base: &TickBase) {
        if self.teardown(base.epoch) {
            self.emit(LobbyEvent::KickedOrLeft {
                lobby_id: base.lobby_id.clone(),
            });
        }
    }

    /// Forget the joined lobby if it is still `epoch`. A relay allocated for
    /// it but never published cannot be reached by anyone, so its transport
    /// is stopped.
    fn teardown(&self, epoch: u64) -> bool {
        let Some(left) = self.state().take(epoch) else {
            return false;
        };
        if let Stage::Publishing { join_code } = &left.stage {
            warn!(
                lobby_id = left.session.id,
                join_code, "Abandoning unpublished relay allocation, stopping transport"
            );
            self.bootstrapper.shutdown();
        }
        true
    }

    async fn start(&self, epoch: u64, action: StartAction) -> Result<()> {
        match action {
            StartAction::JoinRelay { join_code } => {
                info!(join_code, "Client detected relay join code");
                self.emit(LobbyEvent::StartRequested {
                    join_code: join_code.clone(),
                });
                self.join_relay(epoch, join_code).await
            }
            StartAction::AllocateRelay {
                expected_connections,
            } => self.allocate_relay(epoch, expected_connections).await,
            StartAction::PublishJoinCode { join_code } => self.publish_join_code(epoch, join_code).await,
        }
    }

    async fn join_relay(&self, epoch: u64, join_code: String) -> Result<()> {
        match self.bootstrapper.join_as_client(&join_code).await {
            Ok(()) => {
                let stage = Stage::InSession {
                    role: Role::Client,
                    join_code,
                };
                if !self.state().set_stage(epoch, stage) {
                    warn!("Lobby left while joining the relay, stopping transport");
                    self.bootstrapper.shutdown();
                    return Err(LobbyError::Superseded);
                }
                self.emit(LobbyEvent::SessionStarted { role: Role::Client });
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, join_code, "Could not join relay");
                let stage = Stage::Stalled {
                    join_code: Some(join_code),
                };
                if self.state().set_stage(epoch, stage) {
                    self.emit(LobbyEvent::StartFailed {
                        reason: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    async fn allocate_relay(&self, epoch: u64, expected_connections: u32) -> Result<()> {
        info!(expected_connections, "Lobby full, starting game");

        let join_code = match self.bootstrapper.allocate_and_host(expected_connections).await {
            Ok(join_code) => join_code,
            Err(e @ (LobbyError::TransportActive(_) | LobbyError::Transport(_))) => {
                warn!(error = %e, "Cannot host, transport unavailable");
                if self
                    .state()
                    .set_stage(epoch, Stage::Stalled { join_code: None })
                {
                    self.emit(LobbyEvent::StartFailed {
                        reason: e.to_string(),
                    });
                }
                return Err(e);
            }
            Err(e) => {
                // Retried on the next poll tick
                warn!(error = %e, "Relay allocation failed");
                self.state().set_stage(epoch, Stage::Waiting);
                return Err(e);
            }
        };

        let stage = Stage::Publishing {
            join_code: join_code.clone(),
        };
        if !self.state().set_stage(epoch, stage) {
            warn!("Lobby left while allocating the relay, stopping transport");
            self.bootstrapper.shutdown();
            return Err(LobbyError::Superseded);
        }

        self.publish_join_code(epoch, join_code).await
    }

    async fn publish_join_code(&self, epoch: u64, join_code: String) -> Result<()> {
        let lobby_id = {
            let mut state = self.state();
            let joined = state.current(epoch).ok_or(LobbyError::Superseded)?;
            joined.stage = Stage::Starting;
            joined.session.id.clone()
        };

        let data = Metadata::from([
            (KEY_RELAY_JOIN_CODE.to_string(), DataValue::member(join_code.clone())),
            (KEY_START_GAME.to_string(), DataValue::member(START_FLAG_STARTED)),
        ]);

        let lobby = match self.store.update_metadata(&lobby_id, data).await {
            Ok(lobby) => lobby,
            Err(e) => {
                warn!(error = %e, join_code, "Publishing join code failed, will retry");
                if !self.state().set_stage(epoch, Stage::Publishing { join_code }) {
                    self.bootstrapper.shutdown();
                }
                return Err(e.into());
            }
        };

        let published = {
            let mut state = self.state();
            match state.current(epoch) {
                Some(joined) => {
                    joined.session = lobby.clone();
                    joined.stage = Stage::InSession {
                        role: Role::Host,
                        join_code: join_code.clone(),
                    };
                    true
                }
                None => false,
            }
        };
        if !published {
            warn!("Lobby left while publishing the join code, stopping transport");
            self.bootstrapper.shutdown();
            return Err(LobbyError::Superseded);
        }

        info!(lobby_id, join_code, "Published relay join code");
        self.emit(LobbyEvent::SessionUpdated { lobby });
        self.emit(LobbyEvent::StartRequested { join_code });
        self.emit(LobbyEvent::SessionStarted { role: Role::Host });
        Ok(())
    }

    /// Retry a relay join that failed earlier. Client only.
    pub async fn retry_relay_join(&self) -> Result<()> {
        let (epoch, join_code) = {
            let mut state = self.state();
            let joined = state
                .joined
                .as_mut()
                .ok_or_else(|| LobbyError::invalid("not in a lobby"))?;
            let Stage::Stalled {
                join_code: Some(join_code),
            } = &joined.stage
            else {
                return Err(LobbyError::invalid("no failed relay join to retry"));
            };
            let join_code = join_code.clone();
            joined.stage = Stage::Starting;
            (joined.epoch, join_code)
        };

        info!(join_code, "Retrying relay join");
        self.join_relay(epoch, join_code).await
    }
}
