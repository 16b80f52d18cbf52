//! Graph storage backends.
//!
//! The engine talks to the graph store through two traits:
//!
//! - [`GraphStore`] opens transactions.
//! - [`GraphTransaction`] runs typed, parameterized statements over the
//!   Switch / ISL / Flow / FlowSegment schema and ends with `commit` or
//!   `rollback`. Dropping an uncommitted transaction discards its writes.
//!
//! Engine operations take an optional caller transaction; [`TxScope`] either
//! borrows it or opens and owns a fresh one.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::types::{Cookie, Flow, FlowSegment, Isl, IslInfo, IslKey, Switch, SwitchId};

/// Trait for graph storage backends.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Transaction handle.
    type Tx: GraphTransaction<Error = Self::Error>;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Tx, Self::Error>;
}

/// Statements available inside a graph store transaction.
///
/// Reads observe the transaction's own uncommitted writes. Multi-row reads
/// return rows in a deterministic order.
#[async_trait]
pub trait GraphTransaction: Send {
    /// Error type for statements.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create the switch if missing (state `inactive`); leave it untouched otherwise.
    async fn merge_switch(&mut self, id: &SwitchId) -> Result<(), Self::Error>;

    /// Create the ISL if missing (status `inactive`, fully available);
    /// leave it untouched otherwise.
    async fn merge_isl(&mut self, isl: &IslInfo) -> Result<(), Self::Error>;

    /// Insert or overwrite the flow record keyed by `(flowid, cookie)`.
    async fn merge_flow(&mut self, flow: &Flow) -> Result<(), Self::Error>;

    /// Delete the flow record keyed by `(flowid, cookie)`; returns rows deleted.
    async fn delete_flow(&mut self, flowid: &str, cookie: Cookie) -> Result<u64, Self::Error>;

    /// Insert or overwrite a segment keyed by `(flowid, parent_cookie, endpoints)`.
    async fn merge_segment(&mut self, segment: &FlowSegment) -> Result<(), Self::Error>;

    /// Delete every segment of `(flowid, parent_cookie)`; returns the deleted rows.
    async fn delete_segments(
        &mut self,
        flowid: &str,
        parent_cookie: Cookie,
    ) -> Result<Vec<FlowSegment>, Self::Error>;

    /// Set `available = max - Σ accounted segment bandwidth` on the ISL.
    ///
    /// Returns the new available bandwidth, or `None` when the ISL does not exist.
    async fn recompute_isl_bandwidth(&mut self, key: &IslKey) -> Result<Option<i64>, Self::Error>;

    /// Fetch a switch.
    async fn get_switch(&mut self, id: &SwitchId) -> Result<Option<Switch>, Self::Error>;

    /// Fetch an ISL.
    async fn get_isl(&mut self, key: &IslKey) -> Result<Option<Isl>, Self::Error>;

    /// Fetch a flow by primary key.
    async fn get_flow(&mut self, flowid: &str, cookie: Cookie) -> Result<Option<Flow>, Self::Error>;

    /// Fetch every flow record with the flow id whose cookie differs from `cookie`.
    async fn get_flows_except(
        &mut self,
        flowid: &str,
        cookie: Cookie,
    ) -> Result<Vec<Flow>, Self::Error>;

    /// Fetch every flow record, ordered by `(flowid, cookie)`.
    async fn get_all_flows(&mut self) -> Result<Vec<Flow>, Self::Error>;

    /// Fetch flows starting and ending on the switch.
    async fn get_one_switch_flows(&mut self, id: &SwitchId) -> Result<Vec<Flow>, Self::Error>;

    /// Fetch segments of `(flowid, parent_cookie)` ordered by `seq_id`.
    async fn get_flow_segments(
        &mut self,
        flowid: &str,
        parent_cookie: Cookie,
    ) -> Result<Vec<FlowSegment>, Self::Error>;

    /// Fetch segments with the switch at either end, ordered by
    /// `(parent_cookie, seq_id)`.
    async fn get_switch_segments(&mut self, id: &SwitchId) -> Result<Vec<FlowSegment>, Self::Error>;

    /// Make the transaction's writes visible.
    async fn commit(self) -> Result<(), Self::Error>;

    /// Discard the transaction's writes.
    async fn rollback(self) -> Result<(), Self::Error>;
}

/// Transaction scope of one engine operation.
///
/// `Ambient` borrows a caller transaction: the operation never commits or
/// rolls it back. `Owned` was opened for this operation and is committed on
/// success or rolled back on failure by [`TxScope::finish`].
pub enum TxScope<'a, T: GraphTransaction> {
    /// Caller-supplied transaction.
    Ambient(&'a mut T),
    /// Transaction opened by the operation.
    Owned(T),
}

impl<'a, T: GraphTransaction> TxScope<'a, T> {
    /// Borrow `tx` when supplied, otherwise open a fresh transaction on `store`.
    pub async fn open<S>(store: &S, tx: Option<&'a mut T>) -> Result<Self, FlowError>
    where
        S: GraphStore<Tx = T> + ?Sized,
    {
        match tx {
            Some(tx) => Ok(Self::Ambient(tx)),
            None => store.begin().await.map(Self::Owned).map_err(FlowError::from_store),
        }
    }

    /// The transaction statements run on.
    pub fn tx(&mut self) -> &mut T {
        match self {
            Self::Ambient(tx) => tx,
            Self::Owned(tx) => tx,
        }
    }

    /// Close the scope with the operation's result.
    ///
    /// Owned transactions commit on `Ok` and roll back on `Err`. A commit
    /// failure turns the result into `StoreUnavailable`. Ambient transactions
    /// are left for the caller to finish.
    pub async fn finish<R>(self, result: Result<R, FlowError>) -> Result<R, FlowError> {
        let tx = match self {
            Self::Ambient(_) => return result,
            Self::Owned(tx) => tx,
        };
        match result {
            Ok(value) => {
                tx.commit().await.map_err(FlowError::from_store)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

pub use memory::InMemoryGraphStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresGraphStore;
