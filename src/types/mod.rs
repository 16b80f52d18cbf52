//! Core types for the flow engine.

pub mod cookie;
pub mod switch;
pub mod flow;
pub mod segment;
pub mod command;

pub use cookie::{Cookie, CookieParseError, Direction, cookie_to_display, is_forward, is_reverse, same_direction};
pub use switch::{Isl, IslInfo, IslKey, IslStatus, Switch, SwitchId, SwitchState};
pub use flow::{Flow, FlowKey, FlowPair, FlowPath, FlowState, PathNode, FLOW_PATH_SCHEMA_VERSION};
pub use segment::FlowSegment;
pub use command::{CommandKind, FlowCommand, OutputVlanType, RuleAction, RuleMatch};
