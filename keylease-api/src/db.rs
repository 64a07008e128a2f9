//! Database Connection Pool Module
//!
//! PostgreSQL connection pooling using deadpool-postgres, plus the
//! PostgreSQL implementation of the lease and chunk stores.
//!
//! Every operation that touches both a lease row and a pool counter runs in
//! one transaction. Allocation locks the chosen key row with
//! `FOR UPDATE SKIP LOCKED` and increments it with a conditional update, so
//! concurrent allocations cannot push a key past capacity.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use keylease_core::{
    new_lease_id, AllocationRequest, ChunkRecord, CountCorrection, EntityKind, KeyIndex,
    KeyleaseError, KeyleaseResult, Lease, LeaseId, LeasePolicy, LeaseStatus, PoolError,
    PoolResource, ReclaimedLease, ReleaseOutcome, StorageError, Timestamp, UploadRecord,
    ValidationError,
};
use keylease_storage::{ChunkStore, LeaseStore};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

/// Schema applied by [`DbClient::migrate`].
const SCHEMA_SQL: &str = include_str!("../migrations/V1__lease_pool.sql");

const RESOURCE_COLUMNS: &str = "key_index, is_active, active_lease_count, last_used_at, \
     available_credits, last_credit_check, created_at, updated_at";

const LEASE_COLUMNS: &str = "lease_id, key_index, holder_id, context_id, issued_at, \
     expires_at, last_heartbeat_at, updated_at, status";

const CHUNK_COLUMNS: &str = "upload_id, chunk_index, total_chunks, holder_id, context_id, \
     chunk_size, content_type, received_at";

const UPLOAD_COLUMNS: &str = "upload_id, holder_id, context_id, chunk_count, finalized_at";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Connection timeout
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "keylease".to_string(),
            user: "postgres".to_string(),
            password: "".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Create a new database configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("KEYLEASE_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("KEYLEASE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5432),
            dbname: std::env::var("KEYLEASE_DB_NAME").unwrap_or_else(|_| "keylease".to_string()),
            user: std::env::var("KEYLEASE_DB_USER").unwrap_or_else(|_| "postgres".to_string()),
            password: std::env::var("KEYLEASE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("KEYLEASE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(16),
            timeout: Duration::from_secs(
                std::env::var("KEYLEASE_DB_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> ApiResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());
        cfg.connect_timeout = Some(self.timeout);

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_cfg = deadpool_postgres::PoolConfig::new(self.max_size);
        pool_cfg.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| ApiError::database_error(format!("Failed to create pool: {}", e)))?;

        Ok(pool)
    }
}

// ============================================================================
// DATABASE CLIENT WRAPPER
// ============================================================================

/// Database client that wraps a connection pool.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
}

impl DbClient {
    /// Create a new database client with the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create a new database client from configuration.
    pub fn from_config(config: &DbConfig) -> ApiResult<Self> {
        let pool = config.create_pool()?;
        Ok(Self::new(pool))
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> ApiResult<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA_SQL).await?;
        tracing::info!("Database schema is up to date");
        Ok(())
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> KeyleaseResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(pool_err)
    }
}

impl std::fmt::Debug for DbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbClient")
            .field("pool_size", &self.pool_size())
            .finish()
    }
}

// ============================================================================
// ERROR AND ROW MAPPING
// ============================================================================

fn db_err(err: tokio_postgres::Error) -> KeyleaseError {
    if err.is_closed() {
        StorageError::Unavailable {
            reason: err.to_string(),
        }
        .into()
    } else {
        StorageError::TransactionFailed {
            reason: err.to_string(),
        }
        .into()
    }
}

fn pool_err(err: deadpool_postgres::PoolError) -> KeyleaseError {
    StorageError::Unavailable {
        reason: err.to_string(),
    }
    .into()
}

fn column_i32(field: &str, value: u32) -> KeyleaseResult<i32> {
    i32::try_from(value).map_err(|_| {
        ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("{} is out of range", value),
        }
        .into()
    })
}

fn column_u32(field: &str, value: i64) -> KeyleaseResult<u32> {
    u32::try_from(value).map_err(|_| {
        StorageError::Corrupt {
            reason: format!("{} holds {}", field, value),
        }
        .into()
    })
}

fn resource_from_row(row: &Row) -> PoolResource {
    PoolResource {
        key_index: row.get("key_index"),
        is_active: row.get("is_active"),
        active_lease_count: row.get("active_lease_count"),
        last_used_at: row.get("last_used_at"),
        available_credits: row.get("available_credits"),
        last_credit_check: row.get("last_credit_check"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn lease_from_row(row: &Row) -> KeyleaseResult<Lease> {
    let status: String = row.get("status");
    let status = LeaseStatus::from_db_str(&status).map_err(|e| StorageError::Corrupt {
        reason: e.to_string(),
    })?;
    Ok(Lease {
        lease_id: row.get("lease_id"),
        key_index: row.get("key_index"),
        holder_id: row.get("holder_id"),
        context_id: row.get("context_id"),
        issued_at: row.get("issued_at"),
        expires_at: row.get("expires_at"),
        last_heartbeat_at: row.get("last_heartbeat_at"),
        updated_at: row.get("updated_at"),
        status,
    })
}

fn chunk_from_row(row: &Row) -> KeyleaseResult<ChunkRecord> {
    let chunk_index: i32 = row.get("chunk_index");
    let total_chunks: i32 = row.get("total_chunks");
    let chunk_size: i64 = row.get("chunk_size");
    Ok(ChunkRecord {
        upload_id: row.get("upload_id"),
        chunk_index: column_u32("chunk_index", i64::from(chunk_index))?,
        total_chunks: column_u32("total_chunks", i64::from(total_chunks))?,
        holder_id: row.get("holder_id"),
        context_id: row.get("context_id"),
        chunk_size: u64::try_from(chunk_size).map_err(|_| StorageError::Corrupt {
            reason: format!("chunk_size holds {}", chunk_size),
        })?,
        content_type: row.get("content_type"),
        received_at: row.get("received_at"),
    })
}

fn upload_from_row(row: &Row) -> KeyleaseResult<UploadRecord> {
    let chunk_count: i32 = row.get("chunk_count");
    Ok(UploadRecord {
        upload_id: row.get("upload_id"),
        holder_id: row.get("holder_id"),
        context_id: row.get("context_id"),
        chunk_count: column_u32("chunk_count", i64::from(chunk_count))?,
        finalized_at: row.get("finalized_at"),
    })
}

// ============================================================================
// LEASE STORE
// ============================================================================

#[async_trait]
impl LeaseStore for DbClient {
    async fn health_check(&self) -> KeyleaseResult<()> {
        let conn = self.get_conn().await?;
        conn.query_one("SELECT 1", &[]).await.map_err(db_err)?;
        Ok(())
    }

    async fn ensure_resources(
        &self,
        key_indices: &[KeyIndex],
        now: Timestamp,
    ) -> KeyleaseResult<usize> {
        let conn = self.get_conn().await?;
        let mut inserted = 0usize;
        for key_index in key_indices {
            let rows = conn
                .execute(
                    "INSERT INTO pool_resources (key_index, is_active, active_lease_count, created_at, updated_at) \
                     VALUES ($1, TRUE, 0, $2, $2) ON CONFLICT (key_index) DO NOTHING",
                    &[key_index, &now],
                )
                .await
                .map_err(db_err)?;
            inserted += rows as usize;
        }
        Ok(inserted)
    }

    async fn resource_list(&self) -> KeyleaseResult<Vec<PoolResource>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                &format!("SELECT {} FROM pool_resources ORDER BY key_index", RESOURCE_COLUMNS),
                &[],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.iter().map(resource_from_row).collect())
    }

    async fn resource_get(&self, key_index: KeyIndex) -> KeyleaseResult<Option<PoolResource>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM pool_resources WHERE key_index = $1", RESOURCE_COLUMNS),
                &[&key_index],
            )
            .await
            .map_err(db_err)?;
        Ok(row.as_ref().map(resource_from_row))
    }

    async fn resource_set_active(
        &self,
        key_index: KeyIndex,
        is_active: bool,
        now: Timestamp,
    ) -> KeyleaseResult<PoolResource> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!(
                    "UPDATE pool_resources SET is_active = $2, updated_at = $3 \
                     WHERE key_index = $1 RETURNING {}",
                    RESOURCE_COLUMNS
                ),
                &[&key_index, &is_active, &now],
            )
            .await
            .map_err(db_err)?;
        row.as_ref()
            .map(resource_from_row)
            .ok_or(PoolError::UnknownKey { key_index }.into())
    }

    async fn record_credits(
        &self,
        key_index: KeyIndex,
        available_credits: i64,
        now: Timestamp,
    ) -> KeyleaseResult<()> {
        let conn = self.get_conn().await?;
        let rows = conn
            .execute(
                "UPDATE pool_resources SET available_credits = $2, last_credit_check = $3, updated_at = $3 \
                 WHERE key_index = $1",
                &[&key_index, &available_credits, &now],
            )
            .await
            .map_err(db_err)?;
        if rows == 0 {
            return Err(PoolError::UnknownKey { key_index }.into());
        }
        Ok(())
    }

    async fn reconcile_counts(&self, now: Timestamp) -> KeyleaseResult<Vec<CountCorrection>> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(db_err)?;

        // Lock every counter so allocations and releases wait for the repair
        tx.query("SELECT key_index FROM pool_resources ORDER BY key_index FOR UPDATE", &[])
            .await
            .map_err(db_err)?;

        let rows = tx
            .query(
                "SELECT r.key_index, r.active_lease_count, COUNT(l.lease_id)::INT4 AS actual \
                 FROM pool_resources r \
                 LEFT JOIN leases l ON l.key_index = r.key_index AND l.status = 'active' \
                 GROUP BY r.key_index, r.active_lease_count \
                 ORDER BY r.key_index",
                &[],
            )
            .await
            .map_err(db_err)?;

        let mut corrections = Vec::new();
        for row in &rows {
            let correction = CountCorrection {
                key_index: row.get("key_index"),
                recorded: row.get("active_lease_count"),
                actual: row.get("actual"),
            };
            if correction.recorded != correction.actual {
                tx.execute(
                    "UPDATE pool_resources SET active_lease_count = $2, updated_at = $3 WHERE key_index = $1",
                    &[&correction.key_index, &correction.actual, &now],
                )
                .await
                .map_err(db_err)?;
                corrections.push(correction);
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(corrections)
    }

    async fn allocate(
        &self,
        request: &AllocationRequest,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Lease> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let select = "SELECT key_index FROM pool_resources \
                      WHERE is_active AND active_lease_count < $1 \
                      ORDER BY last_used_at ASC NULLS FIRST, key_index ASC \
                      LIMIT 1 FOR UPDATE";

        let mut candidate = tx
            .query_opt(&format!("{} SKIP LOCKED", select), &[&policy.capacity])
            .await
            .map_err(db_err)?;
        if candidate.is_none() {
            // Every eligible key may be locked by a concurrent allocation; wait for one
            candidate = tx
                .query_opt(select, &[&policy.capacity])
                .await
                .map_err(db_err)?;
        }
        let key_index: KeyIndex = match candidate {
            Some(row) => row.get("key_index"),
            None => {
                return Err(PoolError::Exhausted {
                    capacity: policy.capacity,
                }
                .into())
            }
        };

        let taken = tx
            .execute(
                "UPDATE pool_resources \
                 SET active_lease_count = active_lease_count + 1, last_used_at = $2, updated_at = $2 \
                 WHERE key_index = $1 AND active_lease_count < $3",
                &[&key_index, &now, &policy.capacity],
            )
            .await
            .map_err(db_err)?;
        if taken == 0 {
            return Err(PoolError::Exhausted {
                capacity: policy.capacity,
            }
            .into());
        }

        let lease = Lease::issue(new_lease_id(), key_index, request, policy, now);
        tx.execute(
            &format!(
                "INSERT INTO leases ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
                LEASE_COLUMNS
            ),
            &[
                &lease.lease_id,
                &lease.key_index,
                &lease.holder_id,
                &lease.context_id,
                &lease.issued_at,
                &lease.expires_at,
                &lease.last_heartbeat_at,
                &lease.updated_at,
                &lease.status.as_db_str(),
            ],
        )
        .await
        .map_err(|e| StorageError::InsertFailed {
            entity: EntityKind::Lease,
            reason: e.to_string(),
        })?;

        tx.commit().await.map_err(db_err)?;
        Ok(lease)
    }

    async fn lease_get(&self, lease_id: LeaseId) -> KeyleaseResult<Option<Lease>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM leases WHERE lease_id = $1", LEASE_COLUMNS),
                &[&lease_id],
            )
            .await
            .map_err(db_err)?;
        row.as_ref().map(lease_from_row).transpose()
    }

    async fn lease_list_active(&self) -> KeyleaseResult<Vec<Lease>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM leases WHERE status = 'active' ORDER BY issued_at",
                    LEASE_COLUMNS
                ),
                &[],
            )
            .await
            .map_err(db_err)?;
        rows.iter().map(lease_from_row).collect()
    }

    async fn renew(
        &self,
        lease_id: LeaseId,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Option<Lease>> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let row = tx
            .query_opt(
                &format!("SELECT {} FROM leases WHERE lease_id = $1 FOR UPDATE", LEASE_COLUMNS),
                &[&lease_id],
            )
            .await
            .map_err(db_err)?;
        let mut lease = match row.as_ref().map(lease_from_row).transpose()? {
            Some(lease) if lease.is_renewable(policy, now) => lease,
            _ => return Ok(None),
        };

        lease.renew(policy, now);
        tx.execute(
            "UPDATE leases SET last_heartbeat_at = $2, expires_at = $3, updated_at = $2 WHERE lease_id = $1",
            &[&lease.lease_id, &now, &lease.expires_at],
        )
        .await
        .map_err(|e| StorageError::UpdateFailed {
            entity: EntityKind::Lease,
            id: lease_id.to_string(),
            reason: e.to_string(),
        })?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(lease))
    }

    async fn release(&self, lease_id: LeaseId, now: Timestamp) -> KeyleaseResult<ReleaseOutcome> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(db_err)?;

        let row = tx
            .query_opt(
                "UPDATE leases SET status = 'completed', updated_at = $2 \
                 WHERE lease_id = $1 AND status = 'active' RETURNING key_index",
                &[&lease_id, &now],
            )
            .await
            .map_err(db_err)?;
        let key_index: KeyIndex = match row {
            Some(row) => row.get("key_index"),
            None => return Ok(ReleaseOutcome::AlreadyInactive),
        };

        tx.execute(
            "UPDATE pool_resources \
             SET active_lease_count = GREATEST(active_lease_count - 1, 0), updated_at = $2 \
             WHERE key_index = $1",
            &[&key_index, &now],
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(ReleaseOutcome::Released { key_index })
    }

    async fn reclaim_stale(
        &self,
        policy: &LeasePolicy,
        now: Timestamp,
    ) -> KeyleaseResult<Vec<ReclaimedLease>> {
        let mut conn = self.get_conn().await?;
        let tx = conn.transaction().await.map_err(db_err)?;

        // The status guard makes concurrent sweeps count each lease once
        let rows = tx
            .query(
                &format!(
                    "UPDATE leases SET status = 'expired', updated_at = $1 \
                     WHERE status = 'active' AND (last_heartbeat_at < $2 OR expires_at < $1) \
                     RETURNING {}",
                    LEASE_COLUMNS
                ),
                &[&now, &policy.stale_before(now)],
            )
            .await
            .map_err(db_err)?;

        let mut expired = rows
            .iter()
            .map(lease_from_row)
            .collect::<KeyleaseResult<Vec<Lease>>>()?;
        // Lock counters in key order
        expired.sort_by_key(|l| (l.key_index, l.issued_at));

        let mut reclaimed = Vec::with_capacity(expired.len());
        for lease in &expired {
            let after: i32 = tx
                .query_one(
                    "UPDATE pool_resources \
                     SET active_lease_count = GREATEST(active_lease_count - 1, 0), updated_at = $2 \
                     WHERE key_index = $1 RETURNING active_lease_count",
                    &[&lease.key_index, &now],
                )
                .await
                .map_err(db_err)?
                .get("active_lease_count");
            reclaimed.push(ReclaimedLease::from_lease(lease, after, now));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(reclaimed)
    }
}

// ============================================================================
// CHUNK STORE
// ============================================================================

#[async_trait]
impl ChunkStore for DbClient {
    async fn chunk_upsert(&self, chunk: &ChunkRecord) -> KeyleaseResult<u32> {
        let chunk_index = column_i32("chunkIndex", chunk.chunk_index)?;
        let total_chunks = column_i32("totalChunks", chunk.total_chunks)?;
        let chunk_size = i64::try_from(chunk.chunk_size).map_err(|_| ValidationError::InvalidValue {
            field: "chunkData".to_string(),
            reason: "chunk is too large to record".to_string(),
        })?;

        let conn = self.get_conn().await?;
        conn.execute(
            &format!(
                "INSERT INTO upload_chunks ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 ON CONFLICT (upload_id, chunk_index) DO UPDATE SET \
                 total_chunks = EXCLUDED.total_chunks, holder_id = EXCLUDED.holder_id, \
                 context_id = EXCLUDED.context_id, chunk_size = EXCLUDED.chunk_size, \
                 content_type = EXCLUDED.content_type, received_at = EXCLUDED.received_at",
                CHUNK_COLUMNS
            ),
            &[
                &chunk.upload_id,
                &chunk_index,
                &total_chunks,
                &chunk.holder_id,
                &chunk.context_id,
                &chunk_size,
                &chunk.content_type,
                &chunk.received_at,
            ],
        )
        .await
        .map_err(|e| StorageError::InsertFailed {
            entity: EntityKind::Chunk,
            reason: e.to_string(),
        })?;

        let count: i64 = conn
            .query_one(
                "SELECT COUNT(*) FROM upload_chunks WHERE upload_id = $1",
                &[&chunk.upload_id],
            )
            .await
            .map_err(db_err)?
            .get(0);
        column_u32("chunk count", count)
    }

    async fn chunk_count(&self, upload_id: &str) -> KeyleaseResult<u32> {
        let conn = self.get_conn().await?;
        let count: i64 = conn
            .query_one(
                "SELECT COUNT(*) FROM upload_chunks WHERE upload_id = $1",
                &[&upload_id],
            )
            .await
            .map_err(db_err)?
            .get(0);
        column_u32("chunk count", count)
    }

    async fn chunk_list(&self, upload_id: &str) -> KeyleaseResult<Vec<ChunkRecord>> {
        let conn = self.get_conn().await?;
        let rows = conn
            .query(
                &format!(
                    "SELECT {} FROM upload_chunks WHERE upload_id = $1 ORDER BY chunk_index",
                    CHUNK_COLUMNS
                ),
                &[&upload_id],
            )
            .await
            .map_err(db_err)?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn upload_finalize(&self, record: &UploadRecord) -> KeyleaseResult<UploadRecord> {
        let chunk_count = column_i32("totalChunks", record.chunk_count)?;
        let conn = self.get_conn().await?;
        conn.execute(
            &format!(
                "INSERT INTO uploads ({}) VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (upload_id) DO NOTHING",
                UPLOAD_COLUMNS
            ),
            &[
                &record.upload_id,
                &record.holder_id,
                &record.context_id,
                &chunk_count,
                &record.finalized_at,
            ],
        )
        .await
        .map_err(|e| StorageError::InsertFailed {
            entity: EntityKind::Upload,
            reason: e.to_string(),
        })?;

        let row = conn
            .query_one(
                &format!("SELECT {} FROM uploads WHERE upload_id = $1", UPLOAD_COLUMNS),
                &[&record.upload_id],
            )
            .await
            .map_err(db_err)?;
        upload_from_row(&row)
    }

    async fn upload_get(&self, upload_id: &str) -> KeyleaseResult<Option<UploadRecord>> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(
                &format!("SELECT {} FROM uploads WHERE upload_id = $1", UPLOAD_COLUMNS),
                &[&upload_id],
            )
            .await
            .map_err(db_err)?;
        row.as_ref().map(upload_from_row).transpose()
    }
}
