use super::codes::{JOIN_CODE_CHARSET, generate_unique_code};
use super::take_failure;
use crate::error::ServiceError;
use crate::relay::{Allocation, JoinAllocation, RelayService};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

const RELAY_ENDPOINT: &str = "127.0.0.1:7777";

struct AllocationRecord {
    allocation: Allocation,
    clients: u32,
}

#[derive(Default)]
struct RelayInner {
    allocations: DashMap<String, AllocationRecord>,
    codes: DashMap<String, String>, // join code -> allocation id
    fail_allocations: AtomicUsize,
    fail_joins: AtomicUsize,
    allocation_calls: AtomicUsize,
    join_calls: AtomicUsize,
}

/// In-process relay allocation service.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    inner: Arc<RelayInner>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_allocations(&self, count: usize) {
        self.inner.fail_allocations.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_joins(&self, count: usize) {
        self.inner.fail_joins.store(count, Ordering::SeqCst);
    }

    pub fn allocation_calls(&self) -> usize {
        self.inner.allocation_calls.load(Ordering::SeqCst)
    }

    pub fn join_calls(&self) -> usize {
        self.inner.join_calls.load(Ordering::SeqCst)
    }

    pub fn allocation_count(&self) -> usize {
        self.inner.allocations.len()
    }

    pub fn allocation_size(&self, allocation_id: &str) -> Option<u32> {
        self.inner
            .allocations
            .get(allocation_id)
            .map(|r| r.allocation.max_connections)
    }

    pub fn connected_clients(&self, allocation_id: &str) -> Option<u32> {
        self.inner.allocations.get(allocation_id).map(|r| r.clients)
    }
}

fn connection_data() -> Vec<u8> {
    uuid::Uuid::new_v4().as_bytes().to_vec()
}

impl RelayService for MemoryRelay {
    async fn create_allocation(&self, max_connections: u32) -> Result<Allocation, ServiceError> {
        self.inner.allocation_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.inner.fail_allocations) {
            return Err(ServiceError::Unavailable("relay allocation timed out".into()));
        }

        let allocation = Allocation {
            allocation_id: uuid::Uuid::new_v4().to_string(),
            endpoint: RELAY_ENDPOINT.to_string(),
            key: connection_data(),
            connection_data: connection_data(),
            max_connections,
        };
        debug!(allocation_id = allocation.allocation_id, max_connections, "Created allocation");

        self.inner.allocations.insert(
            allocation.allocation_id.clone(),
            AllocationRecord {
                allocation: allocation.clone(),
                clients: 0,
            },
        );
        Ok(allocation)
    }

    async fn get_join_code(&self, allocation_id: &str) -> Result<String, ServiceError> {
        if !self.inner.allocations.contains_key(allocation_id) {
            return Err(ServiceError::NotFound(allocation_id.to_string()));
        }

        if let Some(existing) = self
            .inner
            .codes
            .iter()
            .find(|entry| entry.value() == allocation_id)
        {
            return Ok(existing.key().clone());
        }

        let code = generate_unique_code(JOIN_CODE_CHARSET, |c| self.inner.codes.contains_key(c));
        self.inner
            .codes
            .insert(code.clone(), allocation_id.to_string());
        Ok(code)
    }

    async fn join_allocation(&self, join_code: &str) -> Result<JoinAllocation, ServiceError> {
        self.inner.join_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.inner.fail_joins) {
            return Err(ServiceError::Unavailable("relay join timed out".into()));
        }

        let allocation_id = self
            .inner
            .codes
            .get(join_code)
            .map(|id| id.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("join code {join_code}")))?;

        let mut record = self
            .inner
            .allocations
            .get_mut(&allocation_id)
            .ok_or_else(|| ServiceError::NotFound(allocation_id.clone()))?;

        // The host holds one of the connections
        if record.clients + 1 >= record.allocation.max_connections {
            return Err(ServiceError::Full(allocation_id));
        }
        record.clients += 1;

        Ok(JoinAllocation {
            allocation_id: record.allocation.allocation_id.clone(),
            endpoint: record.allocation.endpoint.clone(),
            key: record.allocation.key.clone(),
            connection_data: connection_data(),
            host_connection_data: record.allocation.connection_data.clone(),
        })
    }
}
