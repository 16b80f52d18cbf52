//! # flow-topology-engine
//!
//! Flow and topology persistence and switch-rule reconciliation for an SDN
//! controller.
//!
//! The engine owns the graph of switches, inter-switch links (ISLs), flows
//! and per-hop flow segments, and answers two questions:
//!
//! > Which rules must a switch hold for the flows crossing it?
//!
//! > How does that differ from what the switch reports?
//!
//! ## Architecture
//!
//! ```text
//! Flow ──→ FlowStore ──→ GraphStore (Postgres or Memory)
//!   │                         ↑
//!   └──→ rules::build_rules   │
//!                             │
//! reported cookies ──→ SwitchReconciler ──→ SwitchRulesDiff / SyncCommands
//! ```
//!
//! ## Guarantees
//!
//! - Every public operation runs in one transaction, either the caller's or
//!   one it opens, commits and rolls back itself
//! - ISL available bandwidth is recomputed from stored segments, never
//!   incremented or decremented
//! - A path of `2n` nodes always yields `n + 1` install commands

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod error;
pub mod store;
pub mod topology;
pub mod flow_store;
pub mod lookup;
pub mod rules;
pub mod reconciler;

#[cfg(feature = "service")]
pub mod service;

// Re-exports
pub use types::{
    Cookie, Direction, Flow, FlowKey, FlowPair, FlowPath, FlowState, PathNode,
    FlowSegment, Switch, SwitchId, SwitchState, Isl, IslInfo, IslKey, IslStatus,
    FlowCommand, CommandKind, OutputVlanType, RuleAction, RuleMatch,
    FLOW_PATH_SCHEMA_VERSION,
};
pub use types::cookie::{cookie_to_display, is_forward, is_reverse, same_direction};
pub use error::FlowError;
pub use store::{GraphStore, GraphTransaction, InMemoryGraphStore, TxScope};
#[cfg(feature = "postgres")]
pub use store::PostgresGraphStore;
pub use topology::Topology;
pub use flow_store::FlowStore;
pub use lookup::FlowLookup;
pub use rules::{build_rules, choose_output_action};
pub use reconciler::{
    ReconcilerConfig, SkippedRule, SwitchReconciler, SwitchRulesDiff, SwitchSync,
    SyncCommands, DEFAULT_IGNORED_COOKIES,
};

// Service re-exports (when service feature is enabled)
#[cfg(feature = "service")]
pub use service::{create_router, ServiceState};
