use super::codes::{LOBBY_CODE_CHARSET, generate_unique_code};
use crate::error::ServiceError;
use crate::lobby::core::{LobbySession, Member, Metadata, QueryOptions};
use crate::lobby::store::{Authenticator, CreateOptions, QuickJoinOptions, RecordStore, StoreResult};
use dashmap::DashMap;
use rand::seq::IndexedRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::debug;

/// Lobbies without a heartbeat for this long are hidden from queries.
pub const INACTIVE_AFTER: Duration = Duration::from_secs(30);

struct StoredLobby {
    session: LobbySession,
    last_heartbeat: Instant,
}

impl StoredLobby {
    fn is_active(&self, now: Instant) -> bool {
        now.duration_since(self.last_heartbeat) < INACTIVE_AFTER
    }
}

#[derive(Default)]
struct BackendInner {
    lobbies: DashMap<String, StoredLobby>,
    codes: DashMap<String, String>, // lobby code -> lobby id
    clock: AtomicU64,
}

/// The shared record store every client handle talks to.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<BackendInner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle acting on behalf of one signed-in player.
    pub fn client(&self) -> MemoryLobbyClient {
        MemoryLobbyClient {
            backend: self.clone(),
            state: Arc::new(Mutex::new(ClientState::default())),
            get_gate: Arc::new(Mutex::new(None)),
        }
    }

    pub fn lobby(&self, lobby_id: &str) -> Option<LobbySession> {
        self.inner.lobbies.get(lobby_id).map(|l| l.session.clone())
    }

    pub fn lobby_count(&self) -> usize {
        self.inner.lobbies.len()
    }

    fn tick(&self) -> u64 {
        self.inner.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn with_lobby<T>(
        &self,
        lobby_id: &str,
        f: impl FnOnce(&mut StoredLobby) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut lobby = self
            .inner
            .lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| ServiceError::NotFound(format!("lobby {lobby_id}")))?;
        f(&mut lobby)
    }

    fn remove_lobby(&self, lobby_id: &str) {
        if let Some((_, lobby)) = self.inner.lobbies.remove(lobby_id) {
            self.inner.codes.remove(&lobby.session.lobby_code);
            debug!(lobby_id, "Lobby removed");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    SignIn,
    Create,
    Get,
    Query,
    Join,
    UpdateMetadata,
    UpdatePlayer,
    RemovePlayer,
    Heartbeat,
    Delete,
}

/// One request issued through a client handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub lobby_id: Option<String>,
    /// Metadata or attribute keys written, or the removed player id.
    pub keys: Vec<String>,
}

#[derive(Default)]
struct ClientState {
    player_id: Option<String>,
    calls: Vec<StoreCall>,
    faults: HashMap<StoreOp, usize>,
}

/// Per-player view of the [`MemoryBackend`], enforcing the service's rules.
#[derive(Clone)]
pub struct MemoryLobbyClient {
    backend: MemoryBackend,
    state: Arc<Mutex<ClientState>>,
    get_gate: Arc<Mutex<Option<Arc<Semaphore>>>>,
}

impl MemoryLobbyClient {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn backend(&self) -> &MemoryBackend {
        &self.backend
    }

    pub fn player_id(&self) -> Option<String> {
        self.state().player_id.clone()
    }

    /// Fail the next `count` calls of `op` with a transient error.
    pub fn fail_next(&self, op: StoreOp, count: usize) {
        self.state().faults.insert(op, count);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, op: StoreOp) -> usize {
        self.state().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Park every subsequent `get` until [`release_gets`](Self::release_gets).
    pub fn hold_gets(&self) {
        *self.get_gate.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_gets(&self) {
        let gate = self
            .get_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(gate) = gate {
            gate.close();
        }
    }

    /// Record the call and apply any injected fault.
    fn record(&self, op: StoreOp, lobby_id: Option<&str>, keys: Vec<String>) -> StoreResult<()> {
        let mut state = self.state();
        state.calls.push(StoreCall {
            op,
            lobby_id: lobby_id.map(str::to_string),
            keys,
        });

        match state.faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ServiceError::Unavailable(format!("{op:?} timed out")))
            }
            _ => Ok(()),
        }
    }

    fn caller(&self) -> StoreResult<String> {
        self.player_id()
            .ok_or_else(|| ServiceError::Forbidden("not signed in".into()))
    }

    fn view_for(session: &LobbySession, caller: &str) -> LobbySession {
        if session.has_member(caller) {
            session.clone()
        } else {
            session.public_view()
        }
    }

    fn join(&self, lobby: &mut StoredLobby, player: Member, caller: &str) -> StoreResult<LobbySession> {
        if player.id != caller {
            return Err(ServiceError::Forbidden("cannot join on behalf of another player".into()));
        }
        if lobby.session.has_member(&player.id) {
            return Err(ServiceError::Conflict(format!(
                "{} is already a member",
                player.id
            )));
        }
        if lobby.session.is_full() {
            return Err(ServiceError::Full(lobby.session.id.clone()));
        }

        debug!(lobby_id = lobby.session.id, player_id = player.id, "Player joined");
        lobby.session.members.push(player);
        Ok(lobby.session.clone())
    }
}

fn require_host(session: &LobbySession, caller: &str) -> StoreResult<()> {
    if session.is_host(caller) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(format!("{caller} is not the host")))
    }
}

impl Authenticator for MemoryLobbyClient {
    async fn sign_in_anonymously(&self, profile: &str) -> StoreResult<String> {
        self.record(StoreOp::SignIn, None, vec![profile.to_string()])?;

        let mut state = self.state();
        let player_id = state
            .player_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
            .clone();
        Ok(player_id)
    }
}

impl RecordStore for MemoryLobbyClient {
    async fn create(
        &self,
        name: &str,
        capacity: usize,
        options: CreateOptions,
    ) -> StoreResult<LobbySession> {
        let keys = options.data.keys().cloned().collect();
        self.record(StoreOp::Create, None, keys)?;
        let caller = self.caller()?;

        if name.trim().is_empty() {
            return Err(ServiceError::BadRequest("lobby name is empty".into()));
        }
        if capacity == 0 {
            return Err(ServiceError::BadRequest("capacity must be at least 1".into()));
        }
        if options.player.id != caller {
            return Err(ServiceError::Forbidden("host must be the caller".into()));
        }
        if self
            .backend
            .inner
            .lobbies
            .iter()
            .any(|l| l.session.name == name)
        {
            return Err(ServiceError::Conflict(format!("lobby name {name} is taken")));
        }

        let lobby_code =
            generate_unique_code(LOBBY_CODE_CHARSET, |c| self.backend.inner.codes.contains_key(c));
        let session = LobbySession {
            id: uuid::Uuid::new_v4().to_string(),
            lobby_code: lobby_code.clone(),
            name: name.to_string(),
            host_id: caller,
            members: vec![options.player],
            metadata: options.data,
            capacity,
            is_private: options.is_private,
            created_at: self.backend.tick(),
        };

        self.backend.inner.codes.insert(lobby_code, session.id.clone());
        self.backend.inner.lobbies.insert(
            session.id.clone(),
            StoredLobby {
                session: session.clone(),
                last_heartbeat: Instant::now(),
            },
        );
        debug!(lobby_id = session.id, lobby_code = session.lobby_code, "Lobby created");
        Ok(session)
    }

    async fn get(&self, lobby_id: &str) -> StoreResult<LobbySession> {
        self.record(StoreOp::Get, Some(lobby_id), Vec::new())?;

        let gate = self
            .get_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            // Closed on release; the error is the wake-up signal
            let _ = gate.acquire().await;
        }

        let caller = self.caller()?;
        self.backend
            .with_lobby(lobby_id, |lobby| Ok(Self::view_for(&lobby.session, &caller)))
    }

    async fn query(&self, options: QueryOptions) -> StoreResult<Vec<LobbySession>> {
        self.record(StoreOp::Query, None, Vec::new())?;

        let now = Instant::now();
        let mut lobbies: Vec<LobbySession> = self
            .backend
            .inner
            .lobbies
            .iter()
            .filter(|l| !l.session.is_private && l.is_active(now))
            .map(|l| l.session.public_view())
            .collect();
        options.apply(&mut lobbies);
        Ok(lobbies)
    }

    async fn join_by_code(&self, lobby_code: &str, player: Member) -> StoreResult<LobbySession> {
        self.record(StoreOp::Join, None, vec![lobby_code.to_string()])?;
        let caller = self.caller()?;

        let lobby_id = self
            .backend
            .inner
            .codes
            .get(lobby_code)
            .map(|id| id.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("lobby code {lobby_code}")))?;

        self.backend
            .with_lobby(&lobby_id, |lobby| self.join(lobby, player, &caller))
    }

    async fn join_by_id(&self, lobby_id: &str, player: Member) -> StoreResult<LobbySession> {
        self.record(StoreOp::Join, Some(lobby_id), Vec::new())?;
        let caller = self.caller()?;

        self.backend.with_lobby(lobby_id, |lobby| {
            if lobby.session.is_private {
                return Err(ServiceError::Forbidden("private lobbies need a code".into()));
            }
            self.join(lobby, player, &caller)
        })
    }

    async fn quick_join(&self, options: QuickJoinOptions) -> StoreResult<LobbySession> {
        self.record(StoreOp::Join, None, Vec::new())?;
        let caller = self.caller()?;

        let now = Instant::now();
        let candidates: Vec<String> = self
            .backend
            .inner
            .lobbies
            .iter()
            .filter(|l| {
                !l.session.is_private
                    && !l.session.is_full()
                    && l.is_active(now)
                    && !l.session.has_member(&caller)
                    && options.filters.iter().all(|f| f.matches(&l.session))
            })
            .map(|l| l.session.id.clone())
            .collect();

        let lobby_id = candidates
            .choose(&mut rand::rng())
            .cloned()
            .ok_or_else(|| ServiceError::NotFound("no open lobbies".into()))?;

        self.backend
            .with_lobby(&lobby_id, |lobby| self.join(lobby, options.player, &caller))
    }

    async fn update_metadata(&self, lobby_id: &str, data: Metadata) -> StoreResult<LobbySession> {
        let keys = data.keys().cloned().collect();
        self.record(StoreOp::UpdateMetadata, Some(lobby_id), keys)?;
        let caller = self.caller()?;

        self.backend.with_lobby(lobby_id, |lobby| {
            require_host(&lobby.session, &caller)?;
            lobby.session.metadata.extend(data);
            Ok(lobby.session.clone())
        })
    }

    async fn update_player(
        &self,
        lobby_id: &str,
        player_id: &str,
        data: Metadata,
    ) -> StoreResult<LobbySession> {
        let keys = data.keys().cloned().collect();
        self.record(StoreOp::UpdatePlayer, Some(lobby_id), keys)?;
        let caller = self.caller()?;

        if player_id != caller {
            return Err(ServiceError::Forbidden("cannot update another player".into()));
        }

        self.backend.with_lobby(lobby_id, |lobby| {
            let member = lobby
                .session
                .members
                .iter_mut()
                .find(|m| m.id == player_id)
                .ok_or_else(|| ServiceError::NotFound(format!("player {player_id}")))?;
            member.attributes.extend(data);
            Ok(lobby.session.clone())
        })
    }

    async fn remove_player(&self, lobby_id: &str, player_id: &str) -> StoreResult<()> {
        self.record(StoreOp::RemovePlayer, Some(lobby_id), vec![player_id.to_string()])?;
        let caller = self.caller()?;

        let now_empty = self.backend.with_lobby(lobby_id, |lobby| {
            if player_id != caller {
                require_host(&lobby.session, &caller)?;
            }
            let before = lobby.session.members.len();
            lobby.session.members.retain(|m| m.id != player_id);
            if lobby.session.members.len() == before {
                return Err(ServiceError::NotFound(format!("player {player_id}")));
            }
            debug!(lobby_id, player_id, "Player removed");
            Ok(lobby.session.members.is_empty())
        })?;

        if now_empty {
            self.backend.remove_lobby(lobby_id);
        }
        Ok(())
    }

    async fn heartbeat(&self, lobby_id: &str) -> StoreResult<()> {
        self.record(StoreOp::Heartbeat, Some(lobby_id), Vec::new())?;
        let caller = self.caller()?;

        self.backend.with_lobby(lobby_id, |lobby| {
            require_host(&lobby.session, &caller)?;
            lobby.last_heartbeat = Instant::now();
            Ok(())
        })
    }

    async fn delete(&self, lobby_id: &str) -> StoreResult<()> {
        self.record(StoreOp::Delete, Some(lobby_id), Vec::new())?;
        let caller = self.caller()?;

        self.backend
            .with_lobby(lobby_id, |lobby| require_host(&lobby.session, &caller))?;
        self.backend.remove_lobby(lobby_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::core::{DataValue, PlayerCharacter};

    async fn signed_in(backend: &MemoryBackend, name: &str) -> (MemoryLobbyClient, Member) {
        let client = backend.client();
        let id = client.sign_in_anonymously(name).await.unwrap();
        (client, Member::new(id, name, PlayerCharacter::Marine))
    }

    fn options(player: Member) -> CreateOptions {
        CreateOptions {
            is_private: false,
            player,
            data: Metadata::from([("RelayJoinCode".to_string(), DataValue::member(""))]),
        }
    }

    #[tokio::test]
    async fn join_fails_with_full_when_at_capacity() {
        let backend = MemoryBackend::new();
        let (host, alice) = signed_in(&backend, "Alice").await;
        let (guest, bob) = signed_in(&backend, "Bob").await;
        let (late, carol) = signed_in(&backend, "Carol").await;

        let lobby = host.create("Room", 2, options(alice)).await.unwrap();
        guest.join_by_code(&lobby.lobby_code, bob).await.unwrap();
        let result = late.join_by_code(&lobby.lobby_code, carol).await;

        assert!(matches!(result, Err(ServiceError::Full(_))));
        assert_eq!(backend.lobby(&lobby.id).unwrap().members.len(), 2);
    }

    #[tokio::test]
    async fn queries_hide_member_data_and_private_lobbies() {
        let backend = MemoryBackend::new();
        let (host, alice) = signed_in(&backend, "Alice").await;
        let (other, bob) = signed_in(&backend, "Bob").await;

        host.create("Open", 4, options(alice)).await.unwrap();
        let mut private = options(bob);
        private.is_private = true;
        other.create("Secret", 4, private).await.unwrap();

        let lobbies = other.query(QueryOptions::open_lobbies(25)).await.unwrap();

        assert_eq!(lobbies.len(), 1);
        assert_eq!(lobbies[0].name, "Open");
        assert_eq!(lobbies[0].data("RelayJoinCode"), None);
    }

    #[tokio::test]
    async fn only_host_writes_metadata() {
        let backend = MemoryBackend::new();
        let (host, alice) = signed_in(&backend, "Alice").await;
        let (guest, bob) = signed_in(&backend, "Bob").await;

        let lobby = host.create("Room", 2, options(alice)).await.unwrap();
        guest.join_by_id(&lobby.id, bob).await.unwrap();

        let data = Metadata::from([("RelayJoinCode".to_string(), DataValue::member("K7QX2M"))]);
        let result = guest.update_metadata(&lobby.id, data).await;

        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
    }

    #[tokio::test]
    async fn injected_faults_are_transient_and_counted() {
        let backend = MemoryBackend::new();
        let (host, alice) = signed_in(&backend, "Alice").await;
        let lobby = host.create("Room", 2, options(alice)).await.unwrap();
        host.fail_next(StoreOp::Get, 1);

        assert!(matches!(host.get(&lobby.id).await, Err(ServiceError::Unavailable(_))));
        assert!(host.get(&lobby.id).await.is_ok());
        assert_eq!(host.call_count(StoreOp::Get), 2);
    }

    #[tokio::test]
    async fn last_member_leaving_removes_lobby() {
        let backend = MemoryBackend::new();
        let (host, alice) = signed_in(&backend, "Alice").await;
        let lobby = host.create("Room", 2, options(alice.clone())).await.unwrap();

        host.remove_player(&lobby.id, &alice.id).await.unwrap();

        assert_eq!(backend.lobby_count(), 0);
        assert!(matches!(host.get(&lobby.id).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn lobbies_without_heartbeat_drop_out_of_queries() {
        let backend = MemoryBackend::new();
        let (host, alice) = signed_in(&backend, "Alice").await;
        let lobby = host.create("Room", 2, options(alice)).await.unwrap();

        tokio::time::advance(INACTIVE_AFTER + Duration::from_secs(1)).await;
        assert!(host.query(QueryOptions::open_lobbies(25)).await.unwrap().is_empty());

        host.heartbeat(&lobby.id).await.unwrap();
        assert_eq!(host.query(QueryOptions::open_lobbies(25)).await.unwrap().len(), 1);
    }
}
