//! Service state management.
//!
//! Holds the engine components built over one shared graph store.

use std::sync::Arc;

use async_trait::async_trait;

use crate::flow_store::FlowStore;
use crate::lookup::FlowLookup;
use crate::reconciler::{ReconcilerConfig, SwitchReconciler};
use crate::store::postgres::PoolStats;
use crate::store::{GraphStore, InMemoryGraphStore, PostgresGraphStore};
use crate::topology::Topology;
use crate::types::CookieParseError;

/// Health information a backing store can report to probes.
#[async_trait]
pub trait StoreHealth: GraphStore + 'static {
    /// True when the store accepts statements.
    async fn is_healthy(&self) -> bool;

    /// Connection pool statistics, for pooled backends.
    fn pool_stats(&self) -> Option<PoolStats> {
        None
    }
}

#[async_trait]
impl StoreHealth for PostgresGraphStore {
    async fn is_healthy(&self) -> bool {
        PostgresGraphStore::is_healthy(self).await
    }

    fn pool_stats(&self) -> Option<PoolStats> {
        Some(PostgresGraphStore::pool_stats(self))
    }
}

#[async_trait]
impl StoreHealth for InMemoryGraphStore {
    async fn is_healthy(&self) -> bool {
        true
    }
}

/// Shared service state.
pub struct ServiceState<S: StoreHealth> {
    /// The graph store.
    pub store: Arc<S>,
    /// Switch and ISL upserts.
    pub topology: Topology<S>,
    /// Flow writes.
    pub flows: FlowStore<S>,
    /// Flow reads.
    pub lookup: FlowLookup<S>,
    /// Switch rule validation and sync.
    pub reconciler: SwitchReconciler<S>,
}

impl<S: StoreHealth> ServiceState<S> {
    /// Build every engine component over `store`.
    pub fn new(store: S, config: ReconcilerConfig) -> Self {
        let store = Arc::new(store);
        Self {
            topology: Topology::new(Arc::clone(&store)),
            flows: FlowStore::new(Arc::clone(&store)),
            lookup: FlowLookup::new(Arc::clone(&store)),
            reconciler: SwitchReconciler::with_config(Arc::clone(&store), config),
            store,
        }
    }

    /// Create service state with reconciler settings from the environment.
    ///
    /// Reads `RECONCILE_IGNORED_COOKIES`.
    pub fn from_env(store: S) -> Result<Self, CookieParseError> {
        Ok(Self::new(store, ReconcilerConfig::from_env()?))
    }
}

impl<S: StoreHealth> Clone for ServiceState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            topology: self.topology.clone(),
            flows: self.flows.clone(),
            lookup: self.lookup.clone(),
            reconciler: self.reconciler.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_components_share_one_store() {
        let state = ServiceState::new(InMemoryGraphStore::new(), ReconcilerConfig::default());
        state.topology.ensure_switches(&["s1".into()], None).await.unwrap();

        assert_eq!(state.store.num_switches(), 1);
        assert!(state.store.is_healthy().await);
        assert!(state.store.pool_stats().is_none());
    }

    #[test]
    fn test_custom_ignore_list() {
        let config = ReconcilerConfig::parse_ignored("0x10").unwrap();
        let state = ServiceState::new(InMemoryGraphStore::new(), config);
        assert_eq!(state.reconciler.config().ignored_cookies.len(), 1);
    }
}
