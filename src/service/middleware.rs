//! Service middleware for request metrics.
//!
//! ## Metrics Exposed
//!
//! - `request` - request count by path pattern, method and status, with latency
//! - `switch_sync` - rules found missing/excess and commands built per sync

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use regex_lite::Regex;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::info;

/// Metrics middleware that records request counts and latency.
///
/// Uses tracing; metrics are aggregated from logs.
pub async fn metrics_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = normalize_path(request.uri().path());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();

    info!(
        target: "flow_engine::metrics",
        metric_type = "request",
        path = %path,
        method = %method,
        status = status,
        latency_ms = latency.as_millis() as u64,
        "request_metric"
    );

    response
}

/// Normalize path for metrics to avoid high cardinality.
///
/// Flow ids, cookies and switch ids are replaced with placeholders.
fn normalize_path(path: &str) -> String {
    static PATTERNS: OnceLock<Option<(Regex, Regex)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        let flow = Regex::new(r"^/api/flows/[^/]+/[^/]+").ok()?;
        let switch = Regex::new(r"^/api/switches/[^/]+/").ok()?;
        Some((flow, switch))
    });

    match patterns {
        Some((flow, switch)) => {
            let path = flow.replace(path, "/api/flows/:flowid/:cookie");
            switch.replace(&path, "/api/switches/:switch_id/").into_owned()
        }
        None => path.to_string(),
    }
}

/// Record switch sync metrics.
pub fn record_switch_sync(switch_id: &str, missing: usize, excess: usize, commands: usize) {
    info!(
        target: "flow_engine::metrics",
        metric_type = "switch_sync",
        switch_id = switch_id,
        missing = missing,
        excess = excess,
        commands = commands,
        "switch_sync_metric"
    );
}
