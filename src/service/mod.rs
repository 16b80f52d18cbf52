//! Flow Engine REST Service
//!
//! Exposes the flow engine as a REST API.
//!
//! ## Endpoints
//!
//! - `GET /api/flows` - List flows paired by direction
//! - `PUT /api/flows` - Store a flow, returning its install commands
//! - `GET /api/flows/:flowid/:cookie` - Fetch one flow direction
//! - `DELETE /api/flows/:flowid/:cookie` - Remove one flow direction
//! - `GET /api/flows/:flowid/:cookie/counterpart` - Sibling record of a flow
//! - `GET /api/flows/:flowid/:cookie/rules` - Install commands for a stored flow
//! - `POST /api/switches` - Create switches
//! - `POST /api/isls` - Create an ISL
//! - `POST /api/switches/:switch_id/validate` - Diff reported rules
//! - `POST /api/switches/:switch_id/sync` - Diff and build repair commands
//! - `GET /health` - Detailed service health check
//! - `GET /health/live` - Liveness probe
//! - `GET /health/ready` - Readiness probe

pub mod middleware;
pub mod routes;
pub mod state;

pub use middleware::metrics_middleware;
pub use routes::{create_router, status_for, AppState, ErrorResponse};
pub use state::{ServiceState, StoreHealth};
