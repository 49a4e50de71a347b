use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::models::{ActivityKind, Metadata, ScoreRecord, UserId};

/// Page size for raw listings. Aggregation reads are unbounded.
pub const RAW_LISTING_PAGE_SIZE: usize = 50;

/// Append-only persistence of score records. No update or delete path exists.
pub trait ScoreStore: Send + Sync {
    fn insert(&self, record: ScoreRecord) -> impl Future<Output = EngineResult<ScoreRecord>> + Send;

    /// Newest first. `limit: None` returns the full history.
    fn list_by_user(
        &self,
        user_id: &UserId,
        kind: Option<ActivityKind>,
        limit: Option<usize>,
    ) -> impl Future<Output = EngineResult<Vec<ScoreRecord>>> + Send;
}

#[derive(Debug, Clone)]
pub struct PgScoreStore {
    pool: PgPool,
}

impl PgScoreStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn init_db(&self) -> EngineResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("score record schema ready");
        Ok(())
    }
}

impl ScoreStore for PgScoreStore {
    async fn insert(&self, record: ScoreRecord) -> EngineResult<ScoreRecord> {
        let result = sqlx::query(
            r#"
            INSERT INTO progress.score_records
            (id, user_id, kind, value, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.user_id.as_str())
        .bind(record.kind.as_str())
        .bind(record.value)
        .bind(Value::Object(record.metadata.clone()))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let owner: String =
                sqlx::query("SELECT user_id FROM progress.score_records WHERE id = $1")
                    .bind(record.id)
                    .fetch_one(&self.pool)
                    .await?
                    .try_get("user_id")?;
            ensure_same_owner(&record, &owner)?;
            debug!(id = %record.id, "score record already stored");
            return Ok(record);
        }

        debug!(id = %record.id, kind = %record.kind, "score record inserted");
        Ok(record)
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        kind: Option<ActivityKind>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<ScoreRecord>> {
        let mut query = String::from(
            "SELECT id, user_id, kind, value, metadata, created_at \
             FROM progress.score_records \
             WHERE user_id = $1",
        );

        if kind.is_some() {
            query.push_str(" AND kind = $2");
        }
        query.push_str(" ORDER BY created_at DESC, id");
        if let Some(limit) = limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut rows = sqlx::query(&query).bind(user_id.as_str());
        if let Some(kind) = kind {
            rows = rows.bind(kind.as_str());
        }

        rows.fetch_all(&self.pool)
            .await?
            .iter()
            .map(record_from_row)
            .collect()
    }
}

/// A replayed insert is only a success if the stored row is the caller's.
fn ensure_same_owner(record: &ScoreRecord, stored_owner: &str) -> EngineResult<()> {
    if stored_owner == record.user_id.as_str() {
        Ok(())
    } else {
        Err(EngineError::Storage(format!(
            "score record id {} already belongs to another user",
            record.id
        )))
    }
}

fn record_from_row(row: &PgRow) -> EngineResult<ScoreRecord> {
    let kind: String = row.try_get("kind")?;
    let kind = kind
        .parse::<ActivityKind>()
        .map_err(|err| EngineError::Storage(format!("corrupt row: {err}")))?;

    let metadata = match row.try_get::<Value, _>("metadata")? {
        Value::Object(map) => map,
        _ => Metadata::new(),
    };

    Ok(ScoreRecord {
        id: row.try_get("id")?,
        user_id: UserId::new(row.try_get::<String, _>("user_id")?),
        kind,
        value: row.try_get("value")?,
        metadata,
        created_at: row.try_get("created_at")?,
    })
}

/// Process-local store for tests and offline runs.
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    records: RwLock<Vec<ScoreRecord>>,
    failing_writes: AtomicUsize,
    lost_acks: AtomicUsize,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` inserts fail with a persistence error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` inserts commit and then report a lost
    /// connection, as when the acknowledgement never reaches the caller.
    pub fn lose_next_acks(&self, count: usize) {
        self.lost_acks.store(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl ScoreStore for MemoryScoreStore {
    async fn insert(&self, record: ScoreRecord) -> EngineResult<ScoreRecord> {
        if take_one(&self.failing_writes) {
            return Err(EngineError::Persistence("simulated write failure".to_string()));
        }

        {
            let mut records = self.records.write().await;
            match records.iter().find(|existing| existing.id == record.id) {
                Some(existing) => ensure_same_owner(&record, existing.user_id.as_str())?,
                None => records.push(record.clone()),
            }
        }

        if take_one(&self.lost_acks) {
            return Err(EngineError::Persistence("connection reset".to_string()));
        }
        Ok(record)
    }

    async fn list_by_user(
        &self,
        user_id: &UserId,
        kind: Option<ActivityKind>,
        limit: Option<usize>,
    ) -> EngineResult<Vec<ScoreRecord>> {
        let mut records: Vec<ScoreRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|record| &record.user_id == user_id)
            .filter(|record| kind.map_or(true, |kind| record.kind == kind))
            .cloned()
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
