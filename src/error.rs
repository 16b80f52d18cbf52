//! Error taxonomy shared by the flow store, lookup, synthesizer and reconciler.

use crate::types::Cookie;

/// Error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The path cannot describe a chain of ISL hops: odd node count,
    /// non-paired interior nodes, or transit segments without a partner.
    #[error("Path inconsistency: {0}")]
    PathInconsistency(String),
    /// A flow required by the operation does not exist.
    #[error("Flow {flowid} not found (cookie {})", display_cookie(.cookie))]
    NotFound {
        /// Flow id that was looked up.
        flowid: String,
        /// Cookie that was looked up, when the lookup was keyed by it.
        cookie: Option<Cookie>,
    },
    /// Flows sharing the flow id exist but none has the expected direction.
    #[error("Flow {flowid} (cookie {cookie}) has no record with a matching direction")]
    DirectionMismatch {
        /// Flow id that was looked up.
        flowid: String,
        /// Cookie of the record the lookup started from.
        cookie: Cookie,
    },
    /// The graph store or its transaction failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
    /// A stored record could not be decoded.
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

fn display_cookie(cookie: &Option<Cookie>) -> String {
    cookie.map(|c| c.to_string()).unwrap_or_else(|| "any".to_string())
}

impl FlowError {
    /// Create a store error from any backend error.
    pub fn from_store<E: std::error::Error>(e: E) -> Self {
        Self::StoreUnavailable(e.to_string())
    }

    /// Flow lookup miss for an exact `(flowid, cookie)` key.
    pub fn flow_not_found(flowid: impl Into<String>, cookie: Cookie) -> Self {
        Self::NotFound { flowid: flowid.into(), cookie: Some(cookie) }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::PathInconsistency(_) => "PATH_INCONSISTENCY",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::DirectionMismatch { .. } => "DIRECTION_MISMATCH",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::CorruptRecord(_) => "CORRUPT_RECORD",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = FlowError::flow_not_found("f1", Cookie::new(0x4000_0000_0000_0001));
        assert_eq!(err.to_string(), "Flow f1 not found (cookie 0x4000000000000001)");

        let err = FlowError::NotFound { flowid: "f2".into(), cookie: None };
        assert_eq!(err.to_string(), "Flow f2 not found (cookie any)");
    }

    #[test]
    fn test_only_store_errors_are_retryable() {
        assert!(FlowError::StoreUnavailable("down".into()).is_retryable());
        assert!(!FlowError::PathInconsistency("odd".into()).is_retryable());
    }
}
