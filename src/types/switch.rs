//! Switch and ISL types.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Switch datapath identifier.
///
/// Always stored lower-cased so `00:00:AA:…` and `00:00:aa:…` name the
/// same switch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SwitchId(String);

impl SwitchId {
    /// Create a switch id, normalizing case.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_lowercase())
    }

    /// Borrow the normalized id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwitchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SwitchId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SwitchId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for SwitchId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Operational state of a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchState {
    /// Connected to the controller.
    Active,
    /// Known but not (yet) connected. Initial state for upserted switches.
    #[default]
    Inactive,
}

impl SwitchState {
    /// Parse state from its stored form.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// A switch node in the topology graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    /// Normalized datapath id.
    pub id: SwitchId,
    /// Operational state.
    pub state: SwitchState,
}

impl Switch {
    /// A freshly discovered switch.
    pub fn inactive(id: SwitchId) -> Self {
        Self { id, state: SwitchState::Inactive }
    }
}

/// Status of an inter-switch link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IslStatus {
    /// Link is up and usable.
    Active,
    /// Link is known but not usable. Initial status for upserted links.
    #[default]
    Inactive,
}

impl IslStatus {
    /// Parse status from its stored form.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for IslStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// Key of a directed ISL: `(src_switch, src_port) -> (dst_switch, dst_port)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IslKey {
    /// Source switch.
    pub src_switch: SwitchId,
    /// Source port.
    pub src_port: u32,
    /// Destination switch.
    pub dst_switch: SwitchId,
    /// Destination port.
    pub dst_port: u32,
}

impl IslKey {
    /// Create an ISL key.
    pub fn new(src_switch: SwitchId, src_port: u32, dst_switch: SwitchId, dst_port: u32) -> Self {
        Self { src_switch, src_port, dst_switch, dst_port }
    }
}

impl fmt::Display for IslKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_switch, self.src_port, self.dst_switch, self.dst_port
        )
    }
}

/// Link announcement used to upsert an ISL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IslInfo {
    /// Link endpoints.
    #[serde(flatten)]
    pub key: IslKey,
    /// Capacity of the link.
    pub max_bandwidth: i64,
}

/// A stored inter-switch link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Isl {
    /// Link endpoints.
    #[serde(flatten)]
    pub key: IslKey,
    /// Capacity of the link.
    pub max_bandwidth: i64,
    /// Capacity left after bandwidth-accounted flow segments.
    pub available_bandwidth: i64,
    /// Link status.
    pub status: IslStatus,
}

impl Isl {
    /// A freshly created link with nothing reserved on it.
    pub fn from_info(info: &IslInfo) -> Self {
        Self {
            key: info.key.clone(),
            max_bandwidth: info.max_bandwidth,
            available_bandwidth: info.max_bandwidth,
            status: IslStatus::Inactive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_id_is_lowercased() {
        let id = SwitchId::new("00:00:00:00:00:0A:BC:01");
        assert_eq!(id.as_str(), "00:00:00:00:00:0a:bc:01");
        assert_eq!(id, SwitchId::from("00:00:00:00:00:0a:bc:01"));
    }

    #[test]
    fn test_switch_id_deserialize_normalizes() {
        let id: SwitchId = serde_json::from_str("\"DE:AD:BE:EF\"").unwrap();
        assert_eq!(id.as_str(), "de:ad:be:ef");
    }

    #[test]
    fn test_isl_from_info_starts_full() {
        let info = IslInfo {
            key: IslKey::new("a".into(), 1, "b".into(), 2),
            max_bandwidth: 1000,
        };
        let isl = Isl::from_info(&info);
        assert_eq!(isl.available_bandwidth, 1000);
        assert_eq!(isl.status, IslStatus::Inactive);
    }
}
