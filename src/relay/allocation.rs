use crate::error::ServiceError;
use std::future::Future;

/// Transport protocol used for every relay connection.
pub const RELAY_PROTOCOL: &str = "dtls";

/// A relay allocation owned by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub allocation_id: String,
    pub endpoint: String,
    pub key: Vec<u8>,
    pub connection_data: Vec<u8>,
    pub max_connections: u32,
}

/// A client's handle onto a host allocation, resolved from a join code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAllocation {
    pub allocation_id: String,
    pub endpoint: String,
    pub key: Vec<u8>,
    pub connection_data: Vec<u8>,
    pub host_connection_data: Vec<u8>,
}

/// Everything the transport needs to route traffic through the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayServerData {
    pub allocation_id: String,
    pub endpoint: String,
    pub key: Vec<u8>,
    pub connection_data: Vec<u8>,
    pub host_connection_data: Vec<u8>,
    pub is_host: bool,
    pub protocol: &'static str,
}

impl From<&Allocation> for RelayServerData {
    fn from(allocation: &Allocation) -> Self {
        Self {
            allocation_id: allocation.allocation_id.clone(),
            endpoint: allocation.endpoint.clone(),
            key: allocation.key.clone(),
            connection_data: allocation.connection_data.clone(),
            host_connection_data: allocation.connection_data.clone(),
            is_host: true,
            protocol: RELAY_PROTOCOL,
        }
    }
}

impl From<&JoinAllocation> for RelayServerData {
    fn from(allocation: &JoinAllocation) -> Self {
        Self {
            allocation_id: allocation.allocation_id.clone(),
            endpoint: allocation.endpoint.clone(),
            key: allocation.key.clone(),
            connection_data: allocation.connection_data.clone(),
            host_connection_data: allocation.host_connection_data.clone(),
            is_host: false,
            protocol: RELAY_PROTOCOL,
        }
    }
}

/// Out-of-band relay allocation service.
pub trait RelayService: Send + Sync + 'static {
    fn create_allocation(
        &self,
        max_connections: u32,
    ) -> impl Future<Output = Result<Allocation, ServiceError>> + Send;

    fn get_join_code(
        &self,
        allocation_id: &str,
    ) -> impl Future<Output = Result<String, ServiceError>> + Send;

    fn join_allocation(
        &self,
        join_code: &str,
    ) -> impl Future<Output = Result<JoinAllocation, ServiceError>> + Send;
}
