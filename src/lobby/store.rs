//! Contracts of the remote lobby record service.
//!
//! Implementations talk to the real service; the coordinator only relies on
//! the behavior described here. Every call may fail with a [`ServiceError`].

use super::core::{LobbySession, Member, Metadata, QueryFilter, QueryOptions};
use crate::error::ServiceError;
use std::future::Future;

pub type StoreResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone)]
pub struct CreateOptions {
    pub is_private: bool,
    /// Seeded as the sole member and host.
    pub player: Member,
    pub data: Metadata,
}

#[derive(Debug, Clone)]
pub struct QuickJoinOptions {
    pub player: Member,
    pub filters: Vec<QueryFilter>,
}

/// Anonymous sign-in against the service backing the record store.
pub trait Authenticator: Send + Sync + 'static {
    /// Sign in with the given profile name and return the stable player id.
    fn sign_in_anonymously(&self, profile: &str) -> impl Future<Output = StoreResult<String>> + Send;
}

pub trait RecordStore: Send + Sync + 'static {
    fn create(
        &self,
        name: &str,
        capacity: usize,
        options: CreateOptions,
    ) -> impl Future<Output = StoreResult<LobbySession>> + Send;

    fn get(&self, lobby_id: &str) -> impl Future<Output = StoreResult<LobbySession>> + Send;

    /// Lobbies visible to lobby browsers. Member-only data is never included.
    fn query(
        &self,
        options: QueryOptions,
    ) -> impl Future<Output = StoreResult<Vec<LobbySession>>> + Send;

    fn join_by_code(
        &self,
        lobby_code: &str,
        player: Member,
    ) -> impl Future<Output = StoreResult<LobbySession>> + Send;

    fn join_by_id(
        &self,
        lobby_id: &str,
        player: Member,
    ) -> impl Future<Output = StoreResult<LobbySession>> + Send;

    fn quick_join(
        &self,
        options: QuickJoinOptions,
    ) -> impl Future<Output = StoreResult<LobbySession>> + Send;

    /// Merge `data` into the lobby metadata. Host only.
    fn update_metadata(
        &self,
        lobby_id: &str,
        data: Metadata,
    ) -> impl Future<Output = StoreResult<LobbySession>> + Send;

    /// Merge `data` into one member's attributes.
    fn update_player(
        &self,
        lobby_id: &str,
        player_id: &str,
        data: Metadata,
    ) -> impl Future<Output = StoreResult<LobbySession>> + Send;

    /// Remove a member. Removing someone else requires host rights.
    fn remove_player(
        &self,
        lobby_id: &str,
        player_id: &str,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Keep the lobby alive. Host only.
    fn heartbeat(&self, lobby_id: &str) -> impl Future<Output = StoreResult<()>> + Send;

    fn delete(&self, lobby_id: &str) -> impl Future<Output = StoreResult<()>> + Send;
}
