//! Read paths over stored flows and segments.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::FlowError;
use crate::store::{GraphStore, GraphTransaction, TxScope};
use crate::types::{same_direction, Cookie, Flow, FlowPair, FlowSegment, FlowState, SwitchId};

/// Flow and segment queries.
pub struct FlowLookup<S: GraphStore> {
    store: Arc<S>,
}

impl<S: GraphStore> Clone for FlowLookup<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store) }
    }
}

impl<S: GraphStore> FlowLookup<S> {
    /// Create lookups over a graph store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Every flow, paired by flow id into forward and reverse halves.
    ///
    /// Pairs are ordered by flow id and each record is marked `CACHED`.
    pub async fn list_flows(&self, tx: Option<&mut S::Tx>) -> Result<Vec<FlowPair>, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = scope.tx().get_all_flows().await.map_err(FlowError::from_store);
        let flows = scope.finish(result).await?;
        Ok(pair_flows(flows))
    }

    /// The flow record keyed by `(flowid, cookie)`.
    pub async fn get_flow(
        &self,
        flowid: &str,
        cookie: Cookie,
        tx: Option<&mut S::Tx>,
    ) -> Result<Flow, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = scope.tx().get_flow(flowid, cookie).await.map_err(FlowError::from_store);
        scope
            .finish(result)
            .await?
            .ok_or_else(|| FlowError::flow_not_found(flowid, cookie))
    }

    /// The sibling record of `flow`: same flow id, different cookie, same
    /// direction.
    pub async fn find_counterpart(&self, flow: &Flow, tx: Option<&mut S::Tx>) -> Result<Flow, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = scope
            .tx()
            .get_flows_except(&flow.flowid, flow.cookie)
            .await
            .map_err(FlowError::from_store);
        let siblings = scope.finish(result).await?;

        if siblings.is_empty() {
            return Err(FlowError::NotFound { flowid: flow.flowid.clone(), cookie: None });
        }
        siblings
            .into_iter()
            .find(|other| same_direction(other.cookie, flow.cookie))
            .ok_or_else(|| {
                tracing::error!(
                    flowid = %flow.flowid,
                    cookie = %flow.cookie,
                    "Flow has siblings but none in the same direction"
                );
                FlowError::DirectionMismatch { flowid: flow.flowid.clone(), cookie: flow.cookie }
            })
    }

    /// Segments touching the switch, grouped by parent cookie and ordered by
    /// `seq_id` inside each group.
    pub async fn segments_for_switch(
        &self,
        switch_id: &SwitchId,
        tx: Option<&mut S::Tx>,
    ) -> Result<BTreeMap<Cookie, Vec<FlowSegment>>, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = scope.tx().get_switch_segments(switch_id).await.map_err(FlowError::from_store);
        let segments = scope.finish(result).await?;
        Ok(group_segments(segments))
    }

    /// Flows that start and end on the switch.
    pub async fn one_switch_flows_for_switch(
        &self,
        switch_id: &SwitchId,
        tx: Option<&mut S::Tx>,
    ) -> Result<Vec<Flow>, FlowError> {
        let mut scope = TxScope::open(self.store.as_ref(), tx).await?;
        let result = scope.tx().get_one_switch_flows(switch_id).await.map_err(FlowError::from_store);
        scope.finish(result).await
    }
}

pub(crate) fn group_segments(segments: Vec<FlowSegment>) -> BTreeMap<Cookie, Vec<FlowSegment>> {
    let mut groups: BTreeMap<Cookie, Vec<FlowSegment>> = BTreeMap::new();
    for segment in segments {
        groups.entry(segment.parent_cookie).or_default().push(segment);
    }
    for group in groups.values_mut() {
        group.sort_by_key(|s| s.seq_id);
    }
    groups
}

fn pair_flows(flows: Vec<Flow>) -> Vec<FlowPair> {
    let mut pairs: BTreeMap<String, FlowPair> = BTreeMap::new();
    for mut flow in flows {
        flow.state = Some(FlowState::Cached);
        let pair = pairs.entry(flow.flowid.clone()).or_insert_with(|| FlowPair {
            flowid: flow.flowid.clone(),
            ..FlowPair::default()
        });
        if flow.direction().is_none() {
            tracing::warn!(flowid = %flow.flowid, cookie = %flow.cookie, "Flow cookie has no single direction");
        }
        // anything not forward is listed as the reverse half
        if flow.cookie.is_forward() {
            pair.forward = Some(flow);
        } else {
            pair.reverse = Some(flow);
        }
    }
    pairs.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow_store::FlowStore;
    use crate::store::InMemoryGraphStore;
    use crate::types::{FlowPath, PathNode};

    const FORWARD: u64 = 0x4000_0000_0000_0001;
    const REVERSE: u64 = 0x2000_0000_0000_0001;

    fn make_flow(flowid: &str, cookie: u64, src: &str, dst: &str, path: Vec<PathNode>) -> Flow {
        Flow {
            flowid: flowid.to_string(),
            cookie: Cookie::new(cookie),
            meter_id: None,
            bandwidth: 10,
            ignore_bandwidth: false,
            src_switch: src.into(),
            src_port: 1,
            src_vlan: 0,
            dst_switch: dst.into(),
            dst_port: 2,
            dst_vlan: 0,
            transit_vlan: 100,
            description: String::new(),
            last_updated: 0,
            flowpath: FlowPath::new(path),
            state: None,
        }
    }

    fn setup() -> (Arc<InMemoryGraphStore>, FlowStore<InMemoryGraphStore>, FlowLookup<InMemoryGraphStore>) {
        let store = Arc::new(InMemoryGraphStore::new());
        (
            Arc::clone(&store),
            FlowStore::new(Arc::clone(&store)),
            FlowLookup::new(store),
        )
    }

    #[tokio::test]
    async fn test_list_flows_pairs_directions() {
        let (_, flows, lookup) = setup();
        flows.store_flow(&make_flow("b", FORWARD, "s1", "s1", vec![]), None).await.unwrap();
        flows.store_flow(&make_flow("b", REVERSE, "s1", "s1", vec![]), None).await.unwrap();
        flows.store_flow(&make_flow("a", FORWARD, "s1", "s1", vec![]), None).await.unwrap();

        let pairs = lookup.list_flows(None).await.unwrap();

        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].flowid, "a");
        assert!(pairs[0].reverse.is_none());
        let b = &pairs[1];
        assert_eq!(b.forward.as_ref().unwrap().cookie, Cookie::new(FORWARD));
        assert_eq!(b.reverse.as_ref().unwrap().state, Some(FlowState::Cached));
    }

    #[tokio::test]
    async fn test_list_flows_keeps_cookies_without_single_direction() {
        let (store, flows, lookup) = setup();
        // both direction bits, then neither
        flows.store_flow(&make_flow("odd", 0x6000_0000_0000_0005, "s1", "s1", vec![]), None).await.unwrap();
        flows.store_flow(&make_flow("odd", 0x8000_0000_0000_0009, "s1", "s1", vec![]), None).await.unwrap();

        let pairs = lookup.list_flows(None).await.unwrap();

        assert_eq!(store.num_flows(), 2);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].forward.as_ref().unwrap().cookie, Cookie::new(0x6000_0000_0000_0005));
        assert_eq!(pairs[0].reverse.as_ref().unwrap().cookie, Cookie::new(0x8000_0000_0000_0009));
    }

    #[tokio::test]
    async fn test_get_flow_missing() {
        let (_, _, lookup) = setup();
        let err = lookup.get_flow("nope", Cookie::new(FORWARD), None).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_find_counterpart_filters_by_direction() {
        let (_, flows, lookup) = setup();
        let first = make_flow("f", FORWARD, "s1", "s1", vec![]);
        let sibling = make_flow("f", 0x4000_0000_0000_0002, "s1", "s1", vec![]);
        flows.store_flow(&first, None).await.unwrap();
        flows.store_flow(&sibling, None).await.unwrap();
        flows.store_flow(&make_flow("f", REVERSE, "s1", "s1", vec![]), None).await.unwrap();

        let found = lookup.find_counterpart(&first, None).await.unwrap();
        assert_eq!(found.cookie, sibling.cookie);
    }

    #[tokio::test]
    async fn test_find_counterpart_errors() {
        let (_, flows, lookup) = setup();
        let lonely = make_flow("f", FORWARD, "s1", "s1", vec![]);
        flows.store_flow(&lonely, None).await.unwrap();
        assert!(matches!(
            lookup.find_counterpart(&lonely, None).await,
            Err(FlowError::NotFound { .. })
        ));

        flows.store_flow(&make_flow("f", REVERSE, "s1", "s1", vec![]), None).await.unwrap();
        assert!(matches!(
            lookup.find_counterpart(&lonely, None).await,
            Err(FlowError::DirectionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_segments_for_switch_grouped() {
        let (_, flows, lookup) = setup();
        let path = vec![
            PathNode::new("s1", 1, 0),
            PathNode::new("s2", 2, 1),
            PathNode::new("s2", 3, 2),
            PathNode::new("s3", 4, 3),
        ];
        flows.store_flow(&make_flow("f", FORWARD, "s1", "s3", path), None).await.unwrap();
        flows
            .store_flow(
                &make_flow("g", REVERSE, "s2", "s4", vec![PathNode::new("s2", 5, 0), PathNode::new("s4", 6, 1)]),
                None,
            )
            .await
            .unwrap();

        let groups = lookup.segments_for_switch(&"s2".into(), None).await.unwrap();

        assert_eq!(groups.len(), 2);
        let forward = &groups[&Cookie::new(FORWARD)];
        assert_eq!(forward.iter().map(|s| s.seq_id).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(groups[&Cookie::new(REVERSE)].len(), 1);

        let none = lookup.segments_for_switch(&"s9".into(), None).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_one_switch_flows_for_switch() {
        let (_, flows, lookup) = setup();
        flows.store_flow(&make_flow("one", FORWARD, "s1", "s1", vec![]), None).await.unwrap();
        flows
            .store_flow(
                &make_flow("multi", FORWARD, "s1", "s2", vec![PathNode::new("s1", 3, 0), PathNode::new("s2", 4, 1)]),
                None,
            )
            .await
            .unwrap();

        let found = lookup.one_switch_flows_for_switch(&"s1".into(), None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].flowid, "one");
    }
}
