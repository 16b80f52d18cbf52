//! PostgreSQL graph store for production use.
//!
//! The graph is kept as four edge/node tables (`switches`, `isls`, `flows`,
//! `flow_segments`); see [`GRAPH_SCHEMA`]. Every statement binds its values
//! as parameters.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, Postgres};
use sqlx::{Executor, Row, Transaction};
use std::time::Duration;

use super::{GraphStore, GraphTransaction};
use crate::error::FlowError;
use crate::types::{
    Cookie, Flow, FlowPath, FlowSegment, Isl, IslInfo, IslKey, IslStatus, Switch, SwitchId,
    SwitchState,
};

/// DDL for the graph tables.
pub const GRAPH_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS switches (
    name TEXT PRIMARY KEY,
    state TEXT NOT NULL DEFAULT 'inactive'
);

CREATE TABLE IF NOT EXISTS isls (
    src_switch TEXT NOT NULL REFERENCES switches(name),
    src_port INTEGER NOT NULL,
    dst_switch TEXT NOT NULL REFERENCES switches(name),
    dst_port INTEGER NOT NULL,
    max_bandwidth BIGINT NOT NULL,
    available_bandwidth BIGINT NOT NULL,
    status TEXT NOT NULL DEFAULT 'inactive',
    PRIMARY KEY (src_switch, src_port, dst_switch, dst_port)
);

CREATE TABLE IF NOT EXISTS flows (
    flowid TEXT NOT NULL,
    cookie BIGINT NOT NULL,
    src_switch TEXT NOT NULL REFERENCES switches(name),
    dst_switch TEXT NOT NULL REFERENCES switches(name),
    meter_id INTEGER,
    bandwidth BIGINT NOT NULL,
    ignore_bandwidth BOOLEAN NOT NULL,
    src_port INTEGER NOT NULL,
    dst_port INTEGER NOT NULL,
    src_vlan INTEGER NOT NULL,
    dst_vlan INTEGER NOT NULL,
    transit_vlan INTEGER NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    last_updated BIGINT NOT NULL,
    flowpath TEXT NOT NULL,
    PRIMARY KEY (flowid, cookie)
);

CREATE TABLE IF NOT EXISTS flow_segments (
    flowid TEXT NOT NULL,
    parent_cookie BIGINT NOT NULL,
    cookie BIGINT NOT NULL,
    src_switch TEXT NOT NULL REFERENCES switches(name),
    src_port INTEGER NOT NULL,
    dst_switch TEXT NOT NULL REFERENCES switches(name),
    dst_port INTEGER NOT NULL,
    seq_id INTEGER NOT NULL,
    segment_latency BIGINT,
    bandwidth BIGINT NOT NULL,
    ignore_bandwidth BOOLEAN NOT NULL,
    PRIMARY KEY (flowid, parent_cookie, src_switch, src_port, dst_switch, dst_port)
);

CREATE INDEX IF NOT EXISTS flow_segments_isl_idx
    ON flow_segments (src_switch, src_port, dst_switch, dst_port);
CREATE INDEX IF NOT EXISTS flow_segments_dst_idx ON flow_segments (dst_switch);
"#;

const FLOW_COLUMNS: &str = "flowid, cookie, src_switch, dst_switch, meter_id, bandwidth, \
     ignore_bandwidth, src_port, dst_port, src_vlan, dst_vlan, transit_vlan, description, \
     last_updated, flowpath";

const SEGMENT_COLUMNS: &str = "flowid, parent_cookie, cookie, src_switch, src_port, dst_switch, \
     dst_port, seq_id, segment_latency, bandwidth, ignore_bandwidth";

/// Configuration for PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/topology".to_string()),
            max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            min_connections: env_or("DB_MIN_CONNECTIONS", 2),
            connect_timeout_secs: env_or("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_or("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_or("DB_MAX_LIFETIME_SECS", 1800),
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Error type for PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    /// A row could not be decoded into a graph record.
    #[error("Undecodable row: {0}")]
    Decode(String),
}

impl From<FlowError> for PostgresError {
    fn from(e: FlowError) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Pool statistics for monitoring.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolStats {
    /// Current pool size.
    pub size: u32,
    /// Number of idle connections.
    pub idle: usize,
    /// Maximum pool size.
    pub max: u32,
}

/// PostgreSQL graph store.
pub struct PostgresGraphStore {
    pool: PgPool,
}

impl PostgresGraphStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Create the graph tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        self.pool.execute(GRAPH_SCHEMA).await?;
        Ok(())
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Get pool statistics for monitoring.
    pub fn pool_stats(&self) -> PoolStats {
        PoolStats {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            max: self.pool.options().get_max_connections(),
        }
    }
}

#[async_trait]
impl GraphStore for PostgresGraphStore {
    type Error = PostgresError;
    type Tx = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Tx, Self::Error> {
        let inner = self.pool.begin().await?;
        Ok(PostgresTransaction { inner })
    }
}

/// Transaction on a [`PostgresGraphStore`]. Rolled back when dropped uncommitted.
pub struct PostgresTransaction {
    inner: Transaction<'static, Postgres>,
}

fn port(value: i32) -> u32 {
    value as u32
}

fn vlan(value: i32) -> u16 {
    value as u16
}

fn parse_flow_row(row: &PgRow) -> Result<Flow, PostgresError> {
    let flowpath: String = row.try_get("flowpath")?;
    let meter_id: Option<i32> = row.try_get("meter_id")?;
    Ok(Flow {
        flowid: row.try_get("flowid")?,
        cookie: Cookie::from_signed(row.try_get("cookie")?),
        meter_id: meter_id.map(|m| m as u32),
        bandwidth: row.try_get("bandwidth")?,
        ignore_bandwidth: row.try_get("ignore_bandwidth")?,
        src_switch: SwitchId::new(row.try_get::<String, _>("src_switch")?),
        src_port: port(row.try_get("src_port")?),
        src_vlan: vlan(row.try_get("src_vlan")?),
        dst_switch: SwitchId::new(row.try_get::<String, _>("dst_switch")?),
        dst_port: port(row.try_get("dst_port")?),
        dst_vlan: vlan(row.try_get("dst_vlan")?),
        transit_vlan: vlan(row.try_get("transit_vlan")?),
        description: row.try_get("description")?,
        last_updated: row.try_get("last_updated")?,
        flowpath: FlowPath::decode(&flowpath)?,
        state: None,
    })
}

fn parse_segment_row(row: &PgRow) -> Result<FlowSegment, PostgresError> {
    Ok(FlowSegment {
        flowid: row.try_get("flowid")?,
        parent_cookie: Cookie::from_signed(row.try_get("parent_cookie")?),
        cookie: Cookie::from_signed(row.try_get("cookie")?),
        src_switch: SwitchId::new(row.try_get::<String, _>("src_switch")?),
        src_port: port(row.try_get("src_port")?),
        dst_switch: SwitchId::new(row.try_get::<String, _>("dst_switch")?),
        dst_port: port(row.try_get("dst_port")?),
        seq_id: row.try_get::<i32, _>("seq_id")? as u32,
        segment_latency: row.try_get("segment_latency")?,
        bandwidth: row.try_get("bandwidth")?,
        ignore_bandwidth: row.try_get("ignore_bandwidth")?,
    })
}

#[async_trait]
impl GraphTransaction for PostgresTransaction {
    type Error = PostgresError;

    async fn merge_switch(&mut self, id: &SwitchId) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO switches (name, state) VALUES ($1, 'inactive') ON CONFLICT (name) DO NOTHING",
        )
        .bind(id.as_str())
        .execute(&mut *self.inner)
        .await?;
        Ok(())
    }

    async fn merge_isl(&mut self, isl: &IslInfo) -> Result<(), Self::Error> {
        self.merge_switch(&isl.key.src_switch).await?;
        self.merge_switch(&isl.key.dst_switch).await?;
        sqlx::query(
            r#"
            INSERT INTO isls (src_switch, src_port, dst_switch, dst_port,
                              max_bandwidth, available_bandwidth, status)
            VALUES ($1, $2, $3, $4, $5, $5, 'inactive')
            ON CONFLICT (src_switch, src_port, dst_switch, dst_port) DO NOTHING
            "#,
        )
        .bind(isl.key.src_switch.as_str())
        .bind(isl.key.src_port as i32)
        .bind(isl.key.dst_switch.as_str())
        .bind(isl.key.dst_port as i32)
        .bind(isl.max_bandwidth)
        .execute(&mut *self.inner)
        .await?;
        Ok(())
    }

    async fn merge_flow(&mut self, flow: &Flow) -> Result<(), Self::Error> {
        let flowpath = flow.flowpath.encode()?;
        sqlx::query(
            r#"
            INSERT INTO flows (flowid, cookie, src_switch, dst_switch, meter_id, bandwidth,
                               ignore_bandwidth, src_port, dst_port, src_vlan, dst_vlan,
                               transit_vlan, description, last_updated, flowpath)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (flowid, cookie) DO UPDATE SET
                src_switch = EXCLUDED.src_switch,
                dst_switch = EXCLUDED.dst_switch,
                meter_id = EXCLUDED.meter_id,
                bandwidth = EXCLUDED.bandwidth,
                ignore_bandwidth = EXCLUDED.ignore_bandwidth,
                src_port = EXCLUDED.src_port,
                dst_port = EXCLUDED.dst_port,
                src_vlan = EXCLUDED.src_vlan,
                dst_vlan = EXCLUDED.dst_vlan,
                transit_vlan = EXCLUDED.transit_vlan,
                description = EXCLUDED.description,
                last_updated = EXCLUDED.last_updated,
                flowpath = EXCLUDED.flowpath
            "#,
        )
        .bind(&flow.flowid)
        .bind(flow.cookie.as_signed())
        .bind(flow.src_switch.as_str())
        .bind(flow.dst_switch.as_str())
        .bind(flow.meter_id.map(|m| m as i32))
        .bind(flow.bandwidth)
        .bind(flow.ignore_bandwidth)
        .bind(flow.src_port as i32)
        .bind(flow.dst_port as i32)
        .bind(i32::from(flow.src_vlan))
        .bind(i32::from(flow.dst_vlan))
        .bind(i32::from(flow.transit_vlan))
        .bind(&flow.description)
        .bind(flow.last_updated)
        .bind(flowpath)
        .execute(&mut *self.inner)
        .await?;
        Ok(())
    }

    async fn delete_flow(&mut self, flowid: &str, cookie: Cookie) -> Result<u64, Self::Error> {
        let result = sqlx::query("DELETE FROM flows WHERE flowid = $1 AND cookie = $2")
            .bind(flowid)
            .bind(cookie.as_signed())
            .execute(&mut *self.inner)
            .await?;
        Ok(result.rows_affected())
    }

    async fn merge_segment(&mut self, segment: &FlowSegment) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO flow_segments (flowid, parent_cookie, cookie, src_switch, src_port,
                                       dst_switch, dst_port, seq_id, segment_latency,
                                       bandwidth, ignore_bandwidth)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (flowid, parent_cookie, src_switch, src_port, dst_switch, dst_port)
            DO UPDATE SET
                cookie = EXCLUDED.cookie,
                seq_id = EXCLUDED.seq_id,
                segment_latency = EXCLUDED.segment_latency,
                bandwidth = EXCLUDED.bandwidth,
                ignore_bandwidth = EXCLUDED.ignore_bandwidth
            "#,
        )
        .bind(&segment.flowid)
        .bind(segment.parent_cookie.as_signed())
        .bind(segment.cookie.as_signed())
        .bind(segment.src_switch.as_str())
        .bind(segment.src_port as i32)
        .bind(segment.dst_switch.as_str())
        .bind(segment.dst_port as i32)
        .bind(segment.seq_id as i32)
        .bind(segment.segment_latency)
        .bind(segment.bandwidth)
        .bind(segment.ignore_bandwidth)
        .execute(&mut *self.inner)
        .await?;
        Ok(())
    }

    async fn delete_segments(
        &mut self,
        flowid: &str,
        parent_cookie: Cookie,
    ) -> Result<Vec<FlowSegment>, Self::Error> {
        let query = format!(
            "DELETE FROM flow_segments WHERE flowid = $1 AND parent_cookie = $2 RETURNING {}",
            SEGMENT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(flowid)
            .bind(parent_cookie.as_signed())
            .fetch_all(&mut *self.inner)
            .await?;
        let mut segments = rows
            .iter()
            .map(parse_segment_row)
            .collect::<Result<Vec<_>, _>>()?;
        segments.sort_by_key(|s| s.seq_id);
        Ok(segments)
    }

    async fn recompute_isl_bandwidth(&mut self, key: &IslKey) -> Result<Option<i64>, Self::Error> {
        let row = sqlx::query(
            r#"
            UPDATE isls SET available_bandwidth = max_bandwidth - COALESCE((
                SELECT SUM(fs.bandwidth) FROM flow_segments fs
                WHERE fs.src_switch = $1 AND fs.src_port = $2
                  AND fs.dst_switch = $3 AND fs.dst_port = $4
                  AND NOT fs.ignore_bandwidth
            ), 0)
            WHERE src_switch = $1 AND src_port = $2 AND dst_switch = $3 AND dst_port = $4
            RETURNING available_bandwidth
            "#,
        )
        .bind(key.src_switch.as_str())
        .bind(key.src_port as i32)
        .bind(key.dst_switch.as_str())
        .bind(key.dst_port as i32)
        .fetch_optional(&mut *self.inner)
        .await?;
        Ok(match row {
            Some(r) => Some(r.try_get("available_bandwidth")?),
            None => None,
        })
    }

    async fn get_switch(&mut self, id: &SwitchId) -> Result<Option<Switch>, Self::Error> {
        let row = sqlx::query("SELECT name, state FROM switches WHERE name = $1")
            .bind(id.as_str())
            .fetch_optional(&mut *self.inner)
            .await?;
        match row {
            Some(r) => {
                let state: String = r.try_get("state")?;
                Ok(Some(Switch {
                    id: SwitchId::new(r.try_get::<String, _>("name")?),
                    state: SwitchState::from_str(&state).unwrap_or_default(),
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_isl(&mut self, key: &IslKey) -> Result<Option<Isl>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT max_bandwidth, available_bandwidth, status FROM isls
            WHERE src_switch = $1 AND src_port = $2 AND dst_switch = $3 AND dst_port = $4
            "#,
        )
        .bind(key.src_switch.as_str())
        .bind(key.src_port as i32)
        .bind(key.dst_switch.as_str())
        .bind(key.dst_port as i32)
        .fetch_optional(&mut *self.inner)
        .await?;
        match row {
            Some(r) => {
                let status: String = r.try_get("status")?;
                Ok(Some(Isl {
                    key: key.clone(),
                    max_bandwidth: r.try_get("max_bandwidth")?,
                    available_bandwidth: r.try_get("available_bandwidth")?,
                    status: IslStatus::from_str(&status).unwrap_or_default(),
                }))
            }
            None => Ok(None),
        }
    }

    async fn get_flow(&mut self, flowid: &str, cookie: Cookie) -> Result<Option<Flow>, Self::Error> {
        let query = format!("SELECT {} FROM flows WHERE flowid = $1 AND cookie = $2", FLOW_COLUMNS);
        let row = sqlx::query(&query)
            .bind(flowid)
            .bind(cookie.as_signed())
            .fetch_optional(&mut *self.inner)
            .await?;
        row.as_ref().map(parse_flow_row).transpose()
    }

    async fn get_flows_except(
        &mut self,
        flowid: &str,
        cookie: Cookie,
    ) -> Result<Vec<Flow>, Self::Error> {
        let query = format!(
            "SELECT {} FROM flows WHERE flowid = $1 AND cookie <> $2 ORDER BY cookie",
            FLOW_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(flowid)
            .bind(cookie.as_signed())
            .fetch_all(&mut *self.inner)
            .await?;
        rows.iter().map(parse_flow_row).collect()
    }

    async fn get_all_flows(&mut self) -> Result<Vec<Flow>, Self::Error> {
        let query = format!("SELECT {} FROM flows ORDER BY flowid, cookie", FLOW_COLUMNS);
        let rows = sqlx::query(&query).fetch_all(&mut *self.inner).await?;
        rows.iter().map(parse_flow_row).collect()
    }

    async fn get_one_switch_flows(&mut self, id: &SwitchId) -> Result<Vec<Flow>, Self::Error> {
        let query = format!(
            "SELECT {} FROM flows WHERE src_switch = $1 AND dst_switch = $1 ORDER BY flowid, cookie",
            FLOW_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_all(&mut *self.inner)
            .await?;
        rows.iter().map(parse_flow_row).collect()
    }

    async fn get_flow_segments(
        &mut self,
        flowid: &str,
        parent_cookie: Cookie,
    ) -> Result<Vec<FlowSegment>, Self::Error> {
        let query = format!(
            "SELECT {} FROM flow_segments WHERE flowid = $1 AND parent_cookie = $2 ORDER BY seq_id",
            SEGMENT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(flowid)
            .bind(parent_cookie.as_signed())
            .fetch_all(&mut *self.inner)
            .await?;
        rows.iter().map(parse_segment_row).collect()
    }

    async fn get_switch_segments(&mut self, id: &SwitchId) -> Result<Vec<FlowSegment>, Self::Error> {
        let query = format!(
            "SELECT {} FROM flow_segments WHERE src_switch = $1 OR dst_switch = $1 \
             ORDER BY parent_cookie, seq_id",
            SEGMENT_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(id.as_str())
            .fetch_all(&mut *self.inner)
            .await?;
        let mut segments = rows
            .iter()
            .map(parse_segment_row)
            .collect::<Result<Vec<_>, _>>()?;
        // BIGINT ordering is signed; callers expect unsigned cookie order
        segments.sort_by(|a, b| {
            a.parent_cookie
                .cmp(&b.parent_cookie)
                .then_with(|| a.seq_id.cmp(&b.seq_id))
        });
        Ok(segments)
    }

    async fn commit(self) -> Result<(), Self::Error> {
        self.inner.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), Self::Error> {
        self.inner.rollback().await?;
        Ok(())
    }
}
