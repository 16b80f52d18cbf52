//! Switch-rule install commands produced by the rule synthesizer.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::cookie::Cookie;
use super::switch::SwitchId;

/// How the customer vlan changes between match and output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputVlanType {
    /// Untagged in, untagged out.
    None,
    /// Untagged in, tagged out.
    Push,
    /// Tagged in, untagged out.
    Pop,
    /// Tagged in, tagged out with a different id.
    Replace,
}

impl fmt::Display for OutputVlanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Push => write!(f, "PUSH"),
            Self::Pop => write!(f, "POP"),
            Self::Replace => write!(f, "REPLACE"),
        }
    }
}

/// Role of a rule within a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// First switch of a multi-switch flow.
    Ingress,
    /// Transit switch.
    Intermediate,
    /// Last switch of a multi-switch flow.
    Egress,
    /// Whole flow on a single switch.
    OneSwitch,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Intermediate => write!(f, "intermediate"),
            Self::Egress => write!(f, "egress"),
            Self::OneSwitch => write!(f, "one_switch"),
        }
    }
}

/// Packet match of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    /// Ingress port on the switch.
    pub in_port: u32,
    /// Vlan to match; 0 matches untagged traffic.
    pub vlan: u16,
}

/// Action applied by a rule, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RuleAction {
    /// Push a new vlan tag.
    PushVlan(u16),
    /// Rewrite the outer vlan id.
    SetVlan(u16),
    /// Strip the outer vlan tag.
    PopVlan,
    /// Forward out of a port.
    Output(u32),
}

/// One forwarding-rule install command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCommand {
    /// Rule role.
    pub kind: CommandKind,
    /// Target switch.
    pub switch_id: SwitchId,
    /// Owning flow id.
    pub flowid: String,
    /// Rule cookie.
    pub cookie: Cookie,
    /// Meter, for rules that police traffic.
    pub meter_id: Option<u32>,
    /// Bandwidth the meter enforces.
    pub bandwidth: Option<i64>,
    /// Packet match.
    #[serde(rename = "match")]
    pub matcher: RuleMatch,
    /// Customer vlan handling of the flow.
    pub output_vlan_type: OutputVlanType,
    /// Ordered action list.
    pub actions: Vec<RuleAction>,
}

impl FlowCommand {
    /// Output port of the rule, if it forwards.
    pub fn output_port(&self) -> Option<u32> {
        self.actions.iter().rev().find_map(|a| match a {
            RuleAction::Output(port) => Some(*port),
            _ => None,
        })
    }
}
