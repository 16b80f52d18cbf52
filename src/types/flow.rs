//! Flow and path types.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::cookie::{Cookie, Direction};
use super::switch::SwitchId;
use crate::error::FlowError;

/// Current encoding version of a stored [`FlowPath`].
pub const FLOW_PATH_SCHEMA_VERSION: u32 = 1;

/// One endpoint of an ISL traversal on a flow's path.
///
/// Nodes come in pairs: `path[2k]` is where the hop leaves a switch and
/// `path[2k + 1]` is where it enters the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    /// Switch the port belongs to.
    pub switch_id: SwitchId,
    /// Port number on that switch.
    pub port_no: u32,
    /// Position of the node in the path.
    pub seq_id: u32,
    /// Per-hop cookie override; segments ending at this node use it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Cookie>,
    /// Measured latency of the hop starting at this node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_latency: Option<i64>,
}

impl PathNode {
    /// Create a path node without overrides.
    pub fn new(switch_id: impl Into<SwitchId>, port_no: u32, seq_id: u32) -> Self {
        Self {
            switch_id: switch_id.into(),
            port_no,
            seq_id,
            cookie: None,
            segment_latency: None,
        }
    }

    /// Set the per-hop cookie override.
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Set the hop latency.
    pub fn with_latency(mut self, latency: i64) -> Self {
        self.segment_latency = Some(latency);
        self
    }
}

/// Structured path of a flow, as persisted alongside the flow record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPath {
    /// Encoding version; see [`FLOW_PATH_SCHEMA_VERSION`].
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// End-to-end latency reported by path computation.
    #[serde(default)]
    pub latency_ns: i64,
    /// Ordered path nodes, two per hop.
    #[serde(default)]
    pub path: Vec<PathNode>,
}

fn default_schema_version() -> u32 {
    FLOW_PATH_SCHEMA_VERSION
}

impl Default for FlowPath {
    fn default() -> Self {
        Self {
            schema_version: FLOW_PATH_SCHEMA_VERSION,
            latency_ns: 0,
            path: Vec::new(),
        }
    }
}

impl FlowPath {
    /// Create a path from its nodes.
    pub fn new(path: Vec<PathNode>) -> Self {
        Self { path, ..Self::default() }
    }

    /// True when the path has no nodes.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// Split the path into `(src, dst)` hop pairs.
    ///
    /// Fails with `PathInconsistency` when the node count is odd.
    pub fn hops(&self) -> Result<Vec<(&PathNode, &PathNode)>, FlowError> {
        if self.path.len() % 2 != 0 {
            tracing::error!(nodes = self.path.len(), "Found un-even number of nodes in the flow path");
            return Err(FlowError::PathInconsistency(format!(
                "un-even number of nodes in the flow path: {}",
                self.path.len()
            )));
        }
        Ok(self.path.chunks_exact(2).map(|pair| (&pair[0], &pair[1])).collect())
    }

    /// Encode for storage.
    pub fn encode(&self) -> Result<String, FlowError> {
        serde_json::to_string(self).map_err(|e| FlowError::CorruptRecord(e.to_string()))
    }

    /// Decode a stored path, rejecting unknown schema versions.
    pub fn decode(raw: &str) -> Result<Self, FlowError> {
        let path: Self = serde_json::from_str(raw)
            .map_err(|e| FlowError::CorruptRecord(format!("malformed flow path: {}", e)))?;
        if path.schema_version != FLOW_PATH_SCHEMA_VERSION {
            return Err(FlowError::CorruptRecord(format!(
                "unsupported flow path schema version {}",
                path.schema_version
            )));
        }
        Ok(path)
    }
}

/// Transient marker attached to flows read back from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    /// Read from persistent storage rather than held live elsewhere.
    Cached,
}

/// One direction of a flow.
///
/// Keyed by `(flowid, cookie)`; the forward and reverse halves share the
/// flow id and differ in the cookie's direction bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    /// Flow id shared by both directions.
    pub flowid: String,
    /// Rule cookie of this direction.
    pub cookie: Cookie,
    /// Meter applied at ingress, if any.
    #[serde(default)]
    pub meter_id: Option<u32>,
    /// Reserved bandwidth.
    pub bandwidth: i64,
    /// When true the flow does not consume ISL bandwidth.
    #[serde(default)]
    pub ignore_bandwidth: bool,
    /// Ingress switch.
    pub src_switch: SwitchId,
    /// Ingress port.
    pub src_port: u32,
    /// Customer vlan at ingress (0 = untagged).
    #[serde(default)]
    pub src_vlan: u16,
    /// Egress switch.
    pub dst_switch: SwitchId,
    /// Egress port.
    pub dst_port: u32,
    /// Customer vlan at egress (0 = untagged).
    #[serde(default)]
    pub dst_vlan: u16,
    /// Vlan used between ingress and egress.
    #[serde(default)]
    pub transit_vlan: u16,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Epoch seconds of the last store.
    #[serde(default)]
    pub last_updated: i64,
    /// Path through the network.
    #[serde(default)]
    pub flowpath: FlowPath,
    /// Read marker; never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FlowState>,
}

impl Flow {
    /// True when ingress and egress are on the same switch.
    pub fn is_one_switch(&self) -> bool {
        self.src_switch == self.dst_switch
    }

    /// Direction decoded from the cookie.
    pub fn direction(&self) -> Option<Direction> {
        self.cookie.direction()
    }

    /// Primary key of the record.
    pub fn key(&self) -> FlowKey {
        FlowKey { flowid: self.flowid.clone(), cookie: self.cookie }
    }
}

/// Primary key of a flow record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    /// Flow id.
    pub flowid: String,
    /// Cookie.
    pub cookie: Cookie,
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.flowid, self.cookie)
    }
}

/// Both directions of a logical flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPair {
    /// Shared flow id.
    pub flowid: String,
    /// Forward direction record.
    pub forward: Option<Flow>,
    /// Reverse direction record.
    pub reverse: Option<Flow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_hop_path() -> FlowPath {
        FlowPath::new(vec![
            PathNode::new("s1", 1, 0),
            PathNode::new("s2", 2, 1),
            PathNode::new("s2", 3, 2),
            PathNode::new("s3", 4, 3),
        ])
    }

    #[test]
    fn test_hops_pairs_nodes() {
        let path = two_hop_path();
        let hops = path.hops().unwrap();
        assert_eq!(hops.len(), 2);
        assert_eq!(hops[0].0.switch_id.as_str(), "s1");
        assert_eq!(hops[0].1.switch_id.as_str(), "s2");
        assert_eq!(hops[1].1.port_no, 4);
    }

    #[test]
    fn test_odd_path_is_inconsistent() {
        let mut path = two_hop_path();
        path.path.pop();
        assert!(matches!(path.hops(), Err(FlowError::PathInconsistency(_))));
    }

    #[test]
    fn test_encode_decode_keeps_overrides() {
        let mut path = two_hop_path();
        path.path[1] = path.path[1].clone().with_cookie(Cookie::new(7)).with_latency(12);
        let decoded = FlowPath::decode(&path.encode().unwrap()).unwrap();
        assert_eq!(decoded, path);
    }

    #[test]
    fn test_decode_rejects_unknown_version() {
        let raw = r#"{"schema_version":99,"latency_ns":0,"path":[]}"#;
        assert!(matches!(FlowPath::decode(raw), Err(FlowError::CorruptRecord(_))));
    }

    #[test]
    fn test_decode_defaults_missing_version() {
        let raw = r#"{"path":[{"switch_id":"S1","port_no":1,"seq_id":0}]}"#;
        let path = FlowPath::decode(raw).unwrap();
        assert_eq!(path.schema_version, FLOW_PATH_SCHEMA_VERSION);
        assert_eq!(path.path[0].switch_id.as_str(), "s1");
    }
}
