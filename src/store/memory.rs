//! In-memory graph store for testing and embedding.
//!
//! Transactions work on a private copy of the graph and publish it on
//! commit. A commit is rejected when another writer committed since the
//! transaction began, so concurrent writers never silently overwrite each
//! other.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{GraphStore, GraphTransaction};
use crate::types::{Cookie, Flow, FlowSegment, Isl, IslInfo, IslKey, Switch, SwitchId};

/// Statement at which a store can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// Opening a transaction.
    Begin,
    /// Upserting a flow record.
    MergeFlow,
    /// Upserting a flow segment.
    MergeSegment,
    /// Deleting a flow's segments.
    DeleteSegments,
    /// Recomputing ISL bandwidth.
    RecomputeBandwidth,
    /// Committing.
    Commit,
}

/// Error type for in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// A failure was injected with [`InMemoryGraphStore::fail_on`].
    #[error("Injected failure at {0:?}")]
    Injected(FailPoint),
    /// Another transaction committed first.
    #[error("Write conflict: graph changed since transaction began")]
    Conflict,
}

type SegmentKey = (String, Cookie, IslKey);

#[derive(Debug, Clone, Default)]
struct GraphState {
    version: u64,
    switches: BTreeMap<SwitchId, Switch>,
    isls: BTreeMap<IslKey, Isl>,
    flows: BTreeMap<(String, Cookie), Flow>,
    segments: BTreeMap<SegmentKey, FlowSegment>,
}

impl GraphState {
    fn merge_switch(&mut self, id: &SwitchId) {
        self.switches
            .entry(id.clone())
            .or_insert_with(|| Switch::inactive(id.clone()));
    }

    fn merge_isl(&mut self, info: &IslInfo) {
        self.merge_switch(&info.key.src_switch);
        self.merge_switch(&info.key.dst_switch);
        self.isls
            .entry(info.key.clone())
            .or_insert_with(|| Isl::from_info(info));
    }
}

/// In-memory graph store.
///
/// Uses BTreeMap for deterministic iteration order. Cloning the store
/// yields another handle to the same graph.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraphStore {
    state: Arc<Mutex<GraphState>>,
    fail_point: Arc<Mutex<Option<FailPoint>>>,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every transaction begun from now on fail at `point`.
    pub fn fail_on(&self, point: FailPoint) {
        *self.fail_point.lock() = Some(point);
    }

    /// Clear an injected failure.
    pub fn clear_failure(&self) {
        *self.fail_point.lock() = None;
    }

    /// Add a switch directly, bypassing transactions.
    pub fn add_switch(&self, switch: Switch) {
        let mut state = self.state.lock();
        state.switches.insert(switch.id.clone(), switch);
        state.version += 1;
    }

    /// Add an ISL directly (and its endpoint switches), bypassing transactions.
    pub fn add_isl(&self, info: IslInfo) {
        let mut state = self.state.lock();
        state.merge_isl(&info);
        state.version += 1;
    }

    /// Add a segment directly, bypassing transactions and bandwidth accounting.
    pub fn add_segment(&self, segment: FlowSegment) {
        let mut state = self.state.lock();
        let key = (segment.flowid.clone(), segment.parent_cookie, segment.isl_key());
        state.segments.insert(key, segment);
        state.version += 1;
    }

    /// Get a committed switch.
    pub fn switch(&self, id: &SwitchId) -> Option<Switch> {
        self.state.lock().switches.get(id).cloned()
    }

    /// Get a committed ISL.
    pub fn isl(&self, key: &IslKey) -> Option<Isl> {
        self.state.lock().isls.get(key).cloned()
    }

    /// Get a committed flow.
    pub fn flow(&self, flowid: &str, cookie: Cookie) -> Option<Flow> {
        self.state.lock().flows.get(&(flowid.to_string(), cookie)).cloned()
    }

    /// All committed segments.
    pub fn all_segments(&self) -> Vec<FlowSegment> {
        self.state.lock().segments.values().cloned().collect()
    }

    /// Number of committed switches.
    pub fn num_switches(&self) -> usize {
        self.state.lock().switches.len()
    }

    /// Number of committed flows.
    pub fn num_flows(&self) -> usize {
        self.state.lock().flows.len()
    }

    /// Number of committed segments.
    pub fn num_segments(&self) -> usize {
        self.state.lock().segments.len()
    }
}

/// Transaction on an [`InMemoryGraphStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    shared: Arc<Mutex<GraphState>>,
    working: GraphState,
    base_version: u64,
    dirty: bool,
    fail_point: Option<FailPoint>,
}

impl InMemoryTransaction {
    fn check(&self, point: FailPoint) -> Result<(), InMemoryError> {
        if self.fail_point == Some(point) {
            return Err(InMemoryError::Injected(point));
        }
        Ok(())
    }

    fn write(&mut self, point: FailPoint) -> Result<&mut GraphState, InMemoryError> {
        self.check(point)?;
        self.dirty = true;
        Ok(&mut self.working)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    type Error = InMemoryError;
    type Tx = InMemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, Self::Error> {
        let fail_point = *self.fail_point.lock();
        if fail_point == Some(FailPoint::Begin) {
            return Err(InMemoryError::Injected(FailPoint::Begin));
        }
        let working = self.state.lock().clone();
        Ok(InMemoryTransaction {
            shared: Arc::clone(&self.state),
            base_version: working.version,
            working,
            dirty: false,
            fail_point,
        })
    }
}

#[async_trait]
impl GraphTransaction for InMemoryTransaction {
    type Error = InMemoryError;

    async fn merge_switch(&mut self, id: &SwitchId) -> Result<(), Self::Error> {
        self.dirty = true;
        self.working.merge_switch(id);
        Ok(())
    }

    async fn merge_isl(&mut self, isl: &IslInfo) -> Result<(), Self::Error> {
        self.dirty = true;
        self.working.merge_isl(isl);
        Ok(())
    }

    async fn merge_flow(&mut self, flow: &Flow) -> Result<(), Self::Error> {
        let state = self.write(FailPoint::MergeFlow)?;
        let mut stored = flow.clone();
        stored.state = None;
        state.flows.insert((flow.flowid.clone(), flow.cookie), stored);
        Ok(())
    }

    async fn delete_flow(&mut self, flowid: &str, cookie: Cookie) -> Result<u64, Self::Error> {
        self.dirty = true;
        let removed = self.working.flows.remove(&(flowid.to_string(), cookie));
        Ok(u64::from(removed.is_some()))
    }

    async fn merge_segment(&mut self, segment: &FlowSegment) -> Result<(), Self::Error> {
        let state = self.write(FailPoint::MergeSegment)?;
        let key = (segment.flowid.clone(), segment.parent_cookie, segment.isl_key());
        state.segments.insert(key, segment.clone());
        Ok(())
    }

    async fn delete_segments(
        &mut self,
        flowid: &str,
        parent_cookie: Cookie,
    ) -> Result<Vec<FlowSegment>, Self::Error> {
        let state = self.write(FailPoint::DeleteSegments)?;
        let keys: Vec<SegmentKey> = state
            .segments
            .iter()
            .filter(|(_, s)| s.belongs_to(flowid, parent_cookie))
            .map(|(k, _)| k.clone())
            .collect();
        let mut removed: Vec<FlowSegment> = keys
            .iter()
            .filter_map(|k| state.segments.remove(k))
            .collect();
        removed.sort_by_key(|s| s.seq_id);
        Ok(removed)
    }

    async fn recompute_isl_bandwidth(&mut self, key: &IslKey) -> Result<Option<i64>, Self::Error> {
        let state = self.write(FailPoint::RecomputeBandwidth)?;
        let used: i64 = state
            .segments
            .values()
            .filter(|s| s.consumes(key))
            .map(|s| s.bandwidth)
            .sum();
        Ok(state.isls.get_mut(key).map(|isl| {
            isl.available_bandwidth = isl.max_bandwidth - used;
            isl.available_bandwidth
        }))
    }

    async fn get_switch(&mut self, id: &SwitchId) -> Result<Option<Switch>, Self::Error> {
        Ok(self.working.switches.get(id).cloned())
    }

    async fn get_isl(&mut self, key: &IslKey) -> Result<Option<Isl>, Self::Error> {
        Ok(self.working.isls.get(key).cloned())
    }

    async fn get_flow(&mut self, flowid: &str, cookie: Cookie) -> Result<Option<Flow>, Self::Error> {
        Ok(self.working.flows.get(&(flowid.to_string(), cookie)).cloned())
    }

    async fn get_flows_except(
        &mut self,
        flowid: &str,
        cookie: Cookie,
    ) -> Result<Vec<Flow>, Self::Error> {
        Ok(self
            .working
            .flows
            .values()
            .filter(|f| f.flowid == flowid && f.cookie != cookie)
            .cloned()
            .collect())
    }

    async fn get_all_flows(&mut self) -> Result<Vec<Flow>, Self::Error> {
        Ok(self.working.flows.values().cloned().collect())
    }

    async fn get_one_switch_flows(&mut self, id: &SwitchId) -> Result<Vec<Flow>, Self::Error> {
        Ok(self
            .working
            .flows
            .values()
            .filter(|f| &f.src_switch == id && &f.dst_switch == id)
            .cloned()
            .collect())
    }

    async fn get_flow_segments(
        &mut self,
        flowid: &str,
        parent_cookie: Cookie,
    ) -> Result<Vec<FlowSegment>, Self::Error> {
        let mut segments: Vec<FlowSegment> = self
            .working
            .segments
            .values()
            .filter(|s| s.belongs_to(flowid, parent_cookie))
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.seq_id);
        Ok(segments)
    }

    async fn get_switch_segments(&mut self, id: &SwitchId) -> Result<Vec<FlowSegment>, Self::Error> {
        let mut segments: Vec<FlowSegment> = self
            .working
            .segments
            .values()
            .filter(|s| s.touches(id))
            .cloned()
            .collect();
        segments.sort_by(|a, b| {
            a.parent_cookie
                .cmp(&b.parent_cookie)
                .then_with(|| a.seq_id.cmp(&b.seq_id))
        });
        Ok(segments)
    }

    async fn commit(self) -> Result<(), Self::Error> {
        self.check(FailPoint::Commit)?;
        if !self.dirty {
            return Ok(());
        }
        let mut shared = self.shared.lock();
        if shared.version != self.base_version {
            return Err(InMemoryError::Conflict);
        }
        let mut working = self.working;
        working.version = self.base_version + 1;
        *shared = working;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isl_info(max_bandwidth: i64) -> IslInfo {
        IslInfo {
            key: IslKey::new("s1".into(), 1, "s2".into(), 2),
            max_bandwidth,
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.merge_switch(&"s1".into()).await.unwrap();

        assert_eq!(store.num_switches(), 0);
        assert!(tx.get_switch(&"s1".into()).await.unwrap().is_some());

        tx.commit().await.unwrap();
        assert_eq!(store.num_switches(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        tx.merge_isl(&isl_info(100)).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.num_switches(), 0);
        assert!(store.isl(&isl_info(100).key).is_none());
    }

    #[tokio::test]
    async fn test_merge_isl_keeps_existing() {
        let store = InMemoryGraphStore::new();
        store.add_isl(isl_info(100));

        let mut tx = store.begin().await.unwrap();
        tx.merge_isl(&isl_info(500)).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.isl(&isl_info(100).key).unwrap().max_bandwidth, 100);
    }

    #[tokio::test]
    async fn test_concurrent_writers_conflict() {
        let store = InMemoryGraphStore::new();
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        first.merge_switch(&"s1".into()).await.unwrap();
        second.merge_switch(&"s2".into()).await.unwrap();

        first.commit().await.unwrap();
        assert!(matches!(second.commit().await, Err(InMemoryError::Conflict)));
        assert!(store.switch(&"s2".into()).is_none());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = InMemoryGraphStore::new();
        store.fail_on(FailPoint::Begin);
        assert!(store.begin().await.is_err());

        store.clear_failure();
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_recompute_missing_isl_is_noop() {
        let store = InMemoryGraphStore::new();
        let mut tx = store.begin().await.unwrap();
        let result = tx.recompute_isl_bandwidth(&isl_info(1).key).await.unwrap();
        assert_eq!(result, None);
    }
}
