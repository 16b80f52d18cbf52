//! Flow segment type: one ISL hop of a flow.

use serde::{Deserialize, Serialize};

use super::cookie::Cookie;
use super::flow::Flow;
use super::switch::{IslKey, SwitchId};
use crate::error::FlowError;

/// One hop of a flow's path, the unit of bandwidth accounting.
///
/// Segments of a flow direction share `(flowid, parent_cookie)` and differ
/// by their endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSegment {
    /// Owning flow id.
    pub flowid: String,
    /// Cookie of the owning flow record.
    pub parent_cookie: Cookie,
    /// Cookie of the hop rule (parent cookie unless overridden by the path).
    pub cookie: Cookie,
    /// Hop source switch.
    pub src_switch: SwitchId,
    /// Hop source port.
    pub src_port: u32,
    /// Hop destination switch.
    pub dst_switch: SwitchId,
    /// Hop destination port.
    pub dst_port: u32,
    /// Position of the hop in the path.
    pub seq_id: u32,
    /// Hop latency, if measured.
    pub segment_latency: Option<i64>,
    /// Bandwidth reserved by the owning flow.
    pub bandwidth: i64,
    /// When true the hop does not count against ISL capacity.
    pub ignore_bandwidth: bool,
}

impl FlowSegment {
    /// Derive the full segment set of a flow from its path.
    ///
    /// One-switch flows have no segments. The path must have an even number
    /// of nodes.
    pub fn for_flow(flow: &Flow) -> Result<Vec<Self>, FlowError> {
        if flow.is_one_switch() {
            return Ok(Vec::new());
        }
        let segments = flow
            .flowpath
            .hops()?
            .into_iter()
            .map(|(src, dst)| Self {
                flowid: flow.flowid.clone(),
                parent_cookie: flow.cookie,
                // rules for a hop are removed through the dst switch, so the
                // dst node carries the override
                cookie: dst.cookie.unwrap_or(flow.cookie),
                src_switch: src.switch_id.clone(),
                src_port: src.port_no,
                dst_switch: dst.switch_id.clone(),
                dst_port: dst.port_no,
                seq_id: src.seq_id,
                segment_latency: src.segment_latency,
                bandwidth: flow.bandwidth,
                ignore_bandwidth: flow.ignore_bandwidth,
            })
            .collect();
        Ok(segments)
    }

    /// The ISL this hop rides on.
    pub fn isl_key(&self) -> IslKey {
        IslKey::new(
            self.src_switch.clone(),
            self.src_port,
            self.dst_switch.clone(),
            self.dst_port,
        )
    }

    /// True when either endpoint is the given switch.
    pub fn touches(&self, switch_id: &SwitchId) -> bool {
        &self.src_switch == switch_id || &self.dst_switch == switch_id
    }

    /// True when the segment belongs to the `(flowid, parent_cookie)` record.
    pub fn belongs_to(&self, flowid: &str, parent_cookie: Cookie) -> bool {
        self.flowid == flowid && self.parent_cookie == parent_cookie
    }

    /// True when the segment counts against the capacity of `isl`.
    pub fn consumes(&self, isl: &IslKey) -> bool {
        !self.ignore_bandwidth
            && self.src_switch == isl.src_switch
            && self.src_port == isl.src_port
            && self.dst_switch == isl.dst_switch
            && self.dst_port == isl.dst_port
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::flow::{FlowPath, PathNode};

    fn make_flow(path: Vec<PathNode>) -> Flow {
        Flow {
            flowid: "f1".to_string(),
            cookie: Cookie::new(0x4000_0000_0000_0001),
            meter_id: Some(1),
            bandwidth: 100,
            ignore_bandwidth: false,
            src_switch: "s1".into(),
            src_port: 10,
            src_vlan: 100,
            dst_switch: "s3".into(),
            dst_port: 20,
            dst_vlan: 200,
            transit_vlan: 3000,
            description: String::new(),
            last_updated: 0,
            flowpath: FlowPath::new(path),
            state: None,
        }
    }

    #[test]
    fn test_segments_follow_path_pairs() {
        let flow = make_flow(vec![
            PathNode::new("s1", 1, 0).with_latency(5),
            PathNode::new("s2", 2, 1),
            PathNode::new("s2", 3, 2),
            PathNode::new("s3", 4, 3).with_cookie(Cookie::new(0x4000_0000_0000_0042)),
        ]);
        let segments = FlowSegment::for_flow(&flow).unwrap();

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].isl_key(), IslKey::new("s1".into(), 1, "s2".into(), 2));
        assert_eq!(segments[0].seq_id, 0);
        assert_eq!(segments[0].segment_latency, Some(5));
        assert_eq!(segments[0].cookie, flow.cookie);
        assert_eq!(segments[1].isl_key(), IslKey::new("s2".into(), 3, "s3".into(), 4));
        assert_eq!(segments[1].seq_id, 2);
        assert_eq!(segments[1].cookie, Cookie::new(0x4000_0000_0000_0042));
        assert!(segments.iter().all(|s| s.parent_cookie == flow.cookie));
    }

    #[test]
    fn test_one_switch_flow_has_no_segments() {
        let mut flow = make_flow(vec![]);
        flow.dst_switch = flow.src_switch.clone();
        assert!(FlowSegment::for_flow(&flow).unwrap().is_empty());
    }

    #[test]
    fn test_ignore_bandwidth_does_not_consume() {
        let mut flow = make_flow(vec![PathNode::new("s1", 1, 0), PathNode::new("s3", 2, 1)]);
        flow.ignore_bandwidth = true;
        let segment = &FlowSegment::for_flow(&flow).unwrap()[0];
        assert!(!segment.consumes(&segment.isl_key()));
    }
}
