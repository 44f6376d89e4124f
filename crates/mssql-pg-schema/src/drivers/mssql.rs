//! SQL Server row source.
//!
//! Uses Tiberius with bb8 connection pooling. Batches are read with
//! `ORDER BY <key> OFFSET .. FETCH NEXT ..`, so batch `n` always covers the
//! same rows as long as the source is not written to during the run.

use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::catalog::QualifiedName;
use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use crate::exec::{BatchRequest, ExecError, ExecErrorKind, RowSource, SqlValue};

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
struct TiberiusConnectionManager {
    config: SourceConfig,
}

impl TiberiusConnectionManager {
    fn new(config: SourceConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        if encrypt_enabled(&self.config.encrypt) {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        config
    }
}

/// `encrypt` accepts the usual connection-string spellings.
fn encrypt_enabled(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "false" | "no" | "0" | "disable" | "optional"
    )
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;
        tcp.set_nodelay(true).ok();
        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Row source reading deterministic batches from SQL Server.
pub struct MssqlRowSource {
    pool: Pool<TiberiusConnectionManager>,
}

impl MssqlRowSource {
    /// Create the pool and test one connection.
    pub async fn new(config: SourceConfig, max_size: u32) -> Result<Self> {
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| MigrateError::pool(e.to_string(), "creating MSSQL connection pool"))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| MigrateError::pool(e.to_string(), "testing MSSQL connection"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            "Connected to MSSQL: {}:{}/{} (pool_size={})",
            config.host, config.port, config.database, max_size
        );

        Ok(Self { pool })
    }

    async fn get_client(
        &self,
    ) -> std::result::Result<PooledConnection<'_, TiberiusConnectionManager>, ExecError> {
        self.pool
            .get()
            .await
            .map_err(|e| ExecError::connection_lost(format!("getting MSSQL connection: {}", e)))
    }
}

#[async_trait]
impl RowSource for MssqlRowSource {
    async fn row_count(&self, table: &QualifiedName) -> std::result::Result<i64, ExecError> {
        let mut client = self.get_client().await?;
        let sql = format!("SELECT COUNT_BIG(*) FROM {}", quote_table(table));
        let row = client
            .simple_query(sql)
            .await
            .map_err(exec_error)?
            .into_row()
            .await
            .map_err(exec_error)?;
        Ok(row
            .and_then(|r| r.try_get::<i64, _>(0).ok().flatten())
            .unwrap_or(0))
    }

    async fn fetch_batch(
        &self,
        request: &BatchRequest,
    ) -> std::result::Result<Vec<Vec<SqlValue>>, ExecError> {
        let mut client = self.get_client().await?;
        let sql = batch_query(request);
        debug!("{}: fetching batch {}", request.table, request.batch_index);

        let mut query = Query::new(sql);
        query.bind(request.offset() as i64);
        query.bind(request.batch_size as i64);

        let rows = query
            .query(&mut *client)
            .await
            .map_err(exec_error)?
            .into_first_result()
            .await
            .map_err(exec_error)?;

        rows.into_iter()
            .map(|row| {
                row.into_iter()
                    .map(convert_value)
                    .collect::<std::result::Result<Vec<_>, _>>()
            })
            .collect()
    }
}

fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

fn quote_table(table: &QualifiedName) -> String {
    format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.name))
}

/// Paged SELECT for one batch; `@P1` is the offset, `@P2` the batch size.
fn batch_query(request: &BatchRequest) -> String {
    let columns: Vec<String> = request.columns.iter().map(|c| quote_ident(c)).collect();
    let order: Vec<String> = request.order_by.iter().map(|c| quote_ident(c)).collect();
    format!(
        "SELECT {} FROM {} ORDER BY {} OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY",
        columns.join(", "),
        quote_table(&request.table),
        order.join(", ")
    )
}

fn exec_error(e: tiberius::error::Error) -> ExecError {
    match &e {
        tiberius::error::Error::Io { .. } => ExecError::connection_lost(e.to_string()),
        tiberius::error::Error::Server(token) => {
            let kind = match token.code() {
                // deadlock victim
                1205 => ExecErrorKind::Deadlock,
                // snapshot isolation update conflict
                3960 => ExecErrorKind::SerializationFailure,
                _ => ExecErrorKind::Other,
            };
            ExecError::new(kind, e.to_string())
        }
        _ => ExecError::new(ExecErrorKind::Other, e.to_string()),
    }
}

fn conversion_error(e: tiberius::error::Error) -> ExecError {
    ExecError::new(ExecErrorKind::Other, format!("value conversion failed: {}", e))
}

/// Convert one Tiberius column value to a [`SqlValue`].
fn convert_value(data: ColumnData<'static>) -> std::result::Result<SqlValue, ExecError> {
    let value = match &data {
        ColumnData::U8(v) => v.map(|v| SqlValue::I16(v as i16)),
        ColumnData::I16(v) => v.map(SqlValue::I16),
        ColumnData::I32(v) => v.map(SqlValue::I32),
        ColumnData::I64(v) => v.map(SqlValue::I64),
        ColumnData::F32(v) => v.map(SqlValue::F32),
        ColumnData::F64(v) => v.map(SqlValue::F64),
        ColumnData::Bit(v) => v.map(SqlValue::Bool),
        ColumnData::String(v) => v.as_ref().map(|s| SqlValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map(SqlValue::Uuid),
        ColumnData::Binary(v) => v.as_ref().map(|b| SqlValue::Bytes(b.to_vec())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map(|x| SqlValue::Text(x.clone().into_owned().into_string())),
        ColumnData::Numeric(_) => Decimal::from_sql(&data)
            .map_err(conversion_error)?
            .map(SqlValue::Decimal),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)
                .map_err(conversion_error)?
                .map(SqlValue::DateTime)
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)
            .map_err(conversion_error)?
            .map(SqlValue::Date),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)
            .map_err(conversion_error)?
            .map(SqlValue::Time),
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(&data)
            .map_err(conversion_error)?
            .map(SqlValue::DateTimeOffset),
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
