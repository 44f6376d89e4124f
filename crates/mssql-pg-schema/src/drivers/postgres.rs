//! PostgreSQL target executor.
//!
//! Every parameter is sent as text and cast by the statement itself
//! (`$1::integer`), so one prepared shape works for any column type.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::TargetConfig;
use crate::error::{MigrateError, Result};
use crate::exec::{ExecError, ExecErrorKind, SqlValue, TargetExecutor, TargetTransaction};

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL target executor.
pub struct PgExecutor {
    pool: Pool,
}

impl PgExecutor {
    /// Create the pool and test one connection.
    pub async fn new(config: &TargetConfig, max_conns: usize) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        if config.ssl_mode == "disable" {
            warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
        }

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(max_conns)
            .build()
            .map_err(|e| MigrateError::pool(e.to_string(), "creating PostgreSQL target pool"))?;

        // Test connection
        let client = pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "testing PostgreSQL target connection"))?;
        client.simple_query("SELECT 1").await?;

        info!(
            "Connected to PostgreSQL target: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_conns
        );

        Ok(Self { pool })
    }
}

#[async_trait]
impl TargetExecutor for PgExecutor {
    async fn begin(&self) -> std::result::Result<Box<dyn TargetTransaction>, ExecError> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|e| ExecError::connection_lost(format!("getting PostgreSQL connection: {}", e)))?;
        client.batch_execute("BEGIN").await.map_err(exec_error)?;
        Ok(Box::new(PgTransaction {
            client: Some(client),
        }))
    }

    fn executor_type(&self) -> &'static str {
        "postgres"
    }
}

/// An explicit BEGIN ... COMMIT block on one pooled connection.
///
/// If the transaction is dropped unfinished, the connection is detached from
/// the pool and closed so the server rolls it back.
struct PgTransaction {
    client: Option<Object>,
}

impl PgTransaction {
    fn client(&self) -> std::result::Result<&Object, ExecError> {
        self.client
            .as_ref()
            .ok_or_else(|| ExecError::new(ExecErrorKind::Other, "transaction already finished"))
    }

    async fn finish(mut self: Box<Self>, sql: &str) -> std::result::Result<(), ExecError> {
        let client = self
            .client
            .take()
            .ok_or_else(|| ExecError::new(ExecErrorKind::Other, "transaction already finished"))?;
        match client.batch_execute(sql).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = Object::take(client);
                Err(exec_error(e))
            }
        }
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            debug!("Discarding connection with an unfinished transaction");
            let _ = Object::take(client);
        }
    }
}

#[async_trait]
impl TargetTransaction for PgTransaction {
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> std::result::Result<u64, ExecError> {
        let client = self.client()?;
        if params.is_empty() {
            client.batch_execute(sql).await.map_err(exec_error)?;
            return Ok(0);
        }

        let types = vec![Type::TEXT; params.len()];
        let statement = client.prepare_typed(sql, &types).await.map_err(exec_error)?;
        let values: Vec<Option<String>> = params.iter().map(to_text).collect();
        let refs: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
        client.execute(&statement, &refs).await.map_err(exec_error)
    }

    async fn commit(self: Box<Self>) -> std::result::Result<(), ExecError> {
        self.finish("COMMIT").await
    }

    async fn rollback(self: Box<Self>) -> std::result::Result<(), ExecError> {
        self.finish("ROLLBACK").await
    }
}

/// Map a driver error to a typed execution error.
fn exec_error(e: tokio_postgres::Error) -> ExecError {
    if let Some(db) = e.as_db_error() {
        return ExecError::with_sqlstate(db.code().code(), db.message());
    }
    if e.is_closed() {
        return ExecError::connection_lost(e.to_string());
    }
    match e.code() {
        Some(state) => ExecError::with_sqlstate(state.code(), e.to_string()),
        // No SQLSTATE and not closed: an I/O failure underneath the client.
        None => ExecError::connection_lost(e.to_string()),
    }
}

/// Text form of a value, as PostgreSQL parses it for the column's cast.
fn to_text(value: &SqlValue) -> Option<String> {
    let text = match value {
        SqlValue::Null => return None,
        SqlValue::Bool(v) => v.to_string(),
        SqlValue::I16(v) => v.to_string(),
        SqlValue::I32(v) => v.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F32(v) => float_text(*v as f64, v.to_string()),
        SqlValue::F64(v) => float_text(*v, v.to_string()),
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::Text(v) => v.clone(),
        SqlValue::Bytes(v) => format!("\\x{}", hex::encode(v)),
        SqlValue::Uuid(v) => v.to_string(),
        SqlValue::Date(v) => v.format("%Y-%m-%d").to_string(),
        SqlValue::Time(v) => v.format("%H:%M:%S%.f").to_string(),
        SqlValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
        SqlValue::DateTimeOffset(v) => v.to_rfc3339(),
    };
    Some(text)
}

fn float_text(v: f64, display: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        let text = if v > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else {
        display
    }
}
