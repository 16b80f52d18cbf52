//! Topology primitives: idempotent switch and ISL upserts.

use std::sync::Arc;

use crate::error::FlowError;
use crate::store::{GraphStore, GraphTransaction, TxScope};
use crate::types::{Isl, IslInfo, IslKey, Switch, SwitchId};

/// Upsert switches inside `tx`, in sorted order so concurrent writers take
/// row locks in the same order.
pub(crate) async fn merge_switches<T: GraphTransaction>(
    tx: &mut T,
    ids: &[&SwitchId],
) -> Result<(), FlowError> {
    let mut sorted: Vec<&SwitchId> = ids.to_vec();
    sorted.sort();
    sorted.dedup();
    for id in sorted {
        tracing::debug!(switch_id = %id, "Merge switch");
        tx.merge_switch(id).await.map_err(FlowError::from_store)?;
    }
    Ok(())
}

/// Switch and ISL upserts.
pub struct Topology<S: GraphStore> {
    store: Arc<S>,
}

impl<S: GraphStore> Clone for Topology<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store) }
    }
}

impl<S: GraphStore> Topology<S> {
    /// Create topology primitives over a graph store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create every switch that does not exist yet, with state `inactive`.
    ///
    /// Existing switches keep their state.
    pub async fn ensure_switches(
        &self,
        ids: &[SwitchId],
        tx: Option<&mut S::Tx>,
    ) -> Result<(), FlowError> {
        let refs: Vec<&SwitchId> = ids.iter().collect();
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = merge_switches(scope.tx(), &refs).await;
        scope.finish(result).await
    }

    /// Create the ISL (and its endpoint switches) if it does not exist yet.
    ///
    /// A new ISL starts `inactive` with its full capacity available; an
    /// existing one is left untouched.
    pub async fn ensure_isl(&self, link: &IslInfo, tx: Option<&mut S::Tx>) -> Result<(), FlowError> {
        tracing::debug!(isl = %link.key, max_bandwidth = link.max_bandwidth, "Merge ISL");
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = async {
            merge_switches(scope.tx(), &[&link.key.src_switch, &link.key.dst_switch]).await?;
            scope.tx().merge_isl(link).await.map_err(FlowError::from_store)
        }
        .await;
        scope.finish(result).await
    }

    /// Fetch a switch.
    pub async fn get_switch(
        &self,
        id: &SwitchId,
        tx: Option<&mut S::Tx>,
    ) -> Result<Option<Switch>, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = scope.tx().get_switch(id).await.map_err(FlowError::from_store);
        scope.finish(result).await
    }

    /// Fetch an ISL.
    pub async fn get_isl(&self, key: &IslKey, tx: Option<&mut S::Tx>) -> Result<Option<Isl>, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = scope.tx().get_isl(key).await.map_err(FlowError::from_store);
        scope.finish(result).await
    }
}
