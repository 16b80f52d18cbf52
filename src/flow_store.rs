//! Flow and segment persistence with ISL bandwidth accounting.
//!
//! A stored flow always replaces its segment set wholesale:
//!
//! ```text
//! delete old segments → recompute old ISLs
//! merge switches + flow record
//! merge new segments  → recompute new ISLs
//! ```
//!
//! Everything runs in one transaction, so a failure at any step leaves no
//! partial write behind.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::FlowError;
use crate::store::{GraphStore, GraphTransaction, TxScope};
use crate::topology::merge_switches;
use crate::types::{Cookie, Flow, FlowSegment, IslKey};

/// Store and remove flows together with their segments.
pub struct FlowStore<S: GraphStore> {
    store: Arc<S>,
}

impl<S: GraphStore> Clone for FlowStore<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store) }
    }
}

impl<S: GraphStore> FlowStore<S> {
    /// Create a flow store over a graph store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Create or replace a flow record and its segments.
    ///
    /// The path is validated before anything is written. `last_updated` is
    /// stamped with the current time; any read marker is dropped.
    pub async fn store_flow(&self, flow: &Flow, tx: Option<&mut S::Tx>) -> Result<(), FlowError> {
        validate_path(flow)?;
        let segments = FlowSegment::for_flow(flow)?;

        let mut record = flow.clone();
        record.last_updated = chrono::Utc::now().timestamp();
        record.state = None;

        tracing::debug!(
            flowid = %flow.flowid,
            cookie = %flow.cookie,
            segments = segments.len(),
            "Store flow"
        );

        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = async {
            let tx = scope.tx();
            delete_segments_in(tx, &flow.flowid, flow.cookie).await?;

            merge_switches(tx, &[&record.src_switch, &record.dst_switch]).await?;
            tx.merge_flow(&record).await.map_err(FlowError::from_store)?;

            for segment in &segments {
                merge_switches(tx, &[&segment.src_switch, &segment.dst_switch]).await?;
                tx.merge_segment(segment).await.map_err(FlowError::from_store)?;
            }
            recompute_isls(tx, segments.iter().map(FlowSegment::isl_key)).await
        }
        .await;
        scope.finish(result).await
    }

    /// Remove a flow record and its segments.
    ///
    /// Returns `true` when a flow record was deleted.
    pub async fn remove_flow(&self, flow: &Flow, tx: Option<&mut S::Tx>) -> Result<bool, FlowError> {
        tracing::debug!(flowid = %flow.flowid, cookie = %flow.cookie, "Remove flow");

        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = async {
            let tx = scope.tx();
            delete_segments_in(tx, &flow.flowid, flow.cookie).await?;
            let deleted = tx
                .delete_flow(&flow.flowid, flow.cookie)
                .await
                .map_err(FlowError::from_store)?;
            Ok(deleted > 0)
        }
        .await;
        scope.finish(result).await
    }

    /// Delete the flow's segments and recompute the ISLs they occupied.
    ///
    /// Returns the deleted segments.
    pub async fn delete_flow_segments(
        &self,
        flow: &Flow,
        tx: Option<&mut S::Tx>,
    ) -> Result<Vec<FlowSegment>, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = delete_segments_in(scope.tx(), &flow.flowid, flow.cookie).await;
        scope.finish(result).await
    }

    /// Recompute available bandwidth on every ISL of the flow's path.
    ///
    /// ISLs missing from the store are skipped.
    pub async fn update_bandwidth_for_path(
        &self,
        flow: &Flow,
        tx: Option<&mut S::Tx>,
    ) -> Result<(), FlowError> {
        let keys: Vec<IslKey> = FlowSegment::for_flow(flow)?
            .iter()
            .map(FlowSegment::isl_key)
            .collect();

        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = recompute_isls(scope.tx(), keys).await;
        scope.finish(result).await
    }

    /// Segments of one flow direction, ordered by `seq_id`.
    pub async fn segments_for_flow(
        &self,
        flowid: &str,
        parent_cookie: Cookie,
        tx: Option<&mut S::Tx>,
    ) -> Result<Vec<FlowSegment>, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = scope
            .tx()
            .get_flow_segments(flowid, parent_cookie)
            .await
            .map_err(FlowError::from_store);
        scope.finish(result).await
    }
}

/// Reject paths that cannot be a chain of ISL hops.
///
/// Interior nodes come in pairs on the same switch: `path[i]` and
/// `path[i + 1]` for odd `i`.
fn validate_path(flow: &Flow) -> Result<(), FlowError> {
    if flow.is_one_switch() {
        return Ok(());
    }
    flow.flowpath.hops()?;
    let nodes = &flow.flowpath.path;
    for i in (1..nodes.len().saturating_sub(1)).step_by(2) {
        if nodes[i].switch_id != nodes[i + 1].switch_id {
            return Err(FlowError::PathInconsistency(format!(
                "non-paired nodes at {} and {} in flow {}: {} != {}",
                i,
                i + 1,
                flow.flowid,
                nodes[i].switch_id,
                nodes[i + 1].switch_id
            )));
        }
    }
    Ok(())
}

async fn delete_segments_in<T: GraphTransaction>(
    tx: &mut T,
    flowid: &str,
    parent_cookie: Cookie,
) -> Result<Vec<FlowSegment>, FlowError> {
    let deleted = tx
        .delete_segments(flowid, parent_cookie)
        .await
        .map_err(FlowError::from_store)?;
    tracing::debug!(flowid, cookie = %parent_cookie, deleted = deleted.len(), "Deleted flow segments");
    recompute_isls(tx, deleted.iter().map(FlowSegment::isl_key)).await?;
    Ok(deleted)
}

/// Recompute each distinct ISL once, in key order.
async fn recompute_isls<T, I>(tx: &mut T, keys: I) -> Result<(), FlowError>
where
    T: GraphTransaction,
    I: IntoIterator<Item = IslKey>,
{
    let keys: BTreeSet<IslKey> = keys.into_iter().collect();
    for key in &keys {
        match tx.recompute_isl_bandwidth(key).await.map_err(FlowError::from_store)? {
            Some(available) => {
                tracing::debug!(isl = %key, available_bandwidth = available, "Recomputed ISL bandwidth");
            }
            None => {
                tracing::debug!(isl = %key, "ISL not found, bandwidth not updated");
            }
        }
    }
    Ok(())
}
