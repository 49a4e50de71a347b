use std::future::Future;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::mirror::LocalMirror;
use crate::models::{DailyProgress, LearnerProgressionSnapshot, ScoreRecord, UserId};
use crate::normalizer::{self, ActivityOutcome};
use crate::progression;
use crate::store::{ScoreStore, RAW_LISTING_PAGE_SIZE};

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressOverview {
    pub snapshot: LearnerProgressionSnapshot,
    pub recent: Vec<ScoreRecord>,
    pub daily: Vec<DailyProgress>,
}

/// Operations exposed to presentation adapters.
pub struct ProgressService<S> {
    store: S,
    offset: FixedOffset,
    mirror: Option<LocalMirror>,
}

impl<S: ScoreStore> ProgressService<S> {
    /// `offset` is the server-observed timezone used for calendar days.
    pub fn new(store: S, offset: FixedOffset) -> Self {
        Self {
            store,
            offset,
            mirror: None,
        }
    }

    pub fn with_mirror(mut self, mirror: LocalMirror) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn submit_attempt(
        &self,
        user_id: Option<&UserId>,
        outcome: ActivityOutcome,
    ) -> EngineResult<ScoreRecord> {
        let user_id = user_id.ok_or(EngineError::Unauthenticated)?;
        let record = normalizer::normalize(user_id, outcome)?;

        let stored = with_retry("insert", || self.store.insert(record.clone())).await?;
        info!(user = %user_id, kind = %stored.kind, value = stored.value, "score recorded");

        if let Some(mirror) = &self.mirror {
            mirror.record(&stored);
        }
        Ok(stored)
    }

    pub async fn get_progression(&self, user_id: &UserId) -> EngineResult<LearnerProgressionSnapshot> {
        self.get_progression_at(user_id, Utc::now()).await
    }

    pub async fn get_progression_at(
        &self,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> EngineResult<LearnerProgressionSnapshot> {
        let history = self.full_history(user_id).await?;
        Ok(progression::aggregate(&history, now.with_timezone(&self.offset)))
    }

    /// Newest first, at most one listing page.
    pub async fn get_recent_activity(
        &self,
        user_id: &UserId,
        limit: usize,
    ) -> EngineResult<Vec<ScoreRecord>> {
        let limit = limit.clamp(1, RAW_LISTING_PAGE_SIZE);
        with_retry("list", || self.store.list_by_user(user_id, None, Some(limit))).await
    }

    pub async fn get_progress_by_day(
        &self,
        user_id: &UserId,
        window_days: u32,
    ) -> EngineResult<Vec<DailyProgress>> {
        self.get_progress_by_day_at(user_id, window_days, Utc::now()).await
    }

    pub async fn get_progress_by_day_at(
        &self,
        user_id: &UserId,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> EngineResult<Vec<DailyProgress>> {
        let history = self.full_history(user_id).await?;
        let today = now.with_timezone(&self.offset).date_naive();
        Ok(progression::progress_by_day(&history, today, &self.offset, window_days))
    }

    /// Snapshot, latest attempts and per-day rows from a single history read.
    pub async fn overview_at(
        &self,
        user_id: &UserId,
        window_days: u32,
        recent_limit: usize,
        now: DateTime<Utc>,
    ) -> EngineResult<ProgressOverview> {
        let history = self.full_history(user_id).await?;
        let local_now = now.with_timezone(&self.offset);

        Ok(ProgressOverview {
            snapshot: progression::aggregate(&history, local_now),
            recent: progression::recent_activity(&history, recent_limit),
            daily: progression::progress_by_day(
                &history,
                local_now.date_naive(),
                &self.offset,
                window_days,
            ),
        })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub async fn full_history(&self, user_id: &UserId) -> EngineResult<Vec<ScoreRecord>> {
        with_retry("list", || self.store.list_by_user(user_id, None, None)).await
    }
}

/// Retries a transient persistence failure exactly once.
async fn with_retry<T, F, Fut>(operation: &str, mut call: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    match call().await {
        Err(err) if err.is_transient() => {
            warn!("{operation} failed, retrying once: {err}");
            call().await
        }
        result => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityKind, Level};
    use crate::store::MemoryScoreStore;
    use serde_json::{json, Value};

    fn service() -> ProgressService<MemoryScoreStore> {
        ProgressService::new(MemoryScoreStore::new(), FixedOffset::east_opt(0).unwrap())
    }

    fn quiz(value: f64) -> ActivityOutcome {
        ActivityOutcome {
            kind: "quiz".to_string(),
            value,
            metadata: json!({"title": "Borrowing"}),
        }
    }

    #[tokio::test]
    async fn submit_requires_identity() {
        let service = service();
        let err = service.submit_attempt(None, quiz(80.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::Unauthenticated));
        assert!(service.store().is_empty().await);
    }

    #[tokio::test]
    async fn invalid_outcome_is_not_persisted() {
        let service = service();
        let user = UserId::new("u1");
        let outcome = ActivityOutcome {
            kind: "essay".to_string(),
            value: 10.0,
            metadata: Value::Null,
        };

        let err = service.submit_attempt(Some(&user), outcome).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidActivityOutcome(_)));
        assert!(service.store().is_empty().await);
    }

    #[tokio::test]
    async fn single_write_failure_is_retried() {
        let service = service();
        let user = UserId::new("u1");
        service.store().fail_next_writes(1);

        let record = service.submit_attempt(Some(&user), quiz(75.0)).await.unwrap();
        assert_eq!(record.kind, ActivityKind::Quiz);
        assert_eq!(service.store().len().await, 1);
    }

    #[tokio::test]
    async fn committed_write_with_lost_ack_is_reported_as_recorded() {
        let service = service();
        let user = UserId::new("u1");
        service.store().lose_next_acks(1);

        let record = service.submit_attempt(Some(&user), quiz(75.0)).await.unwrap();
        assert_eq!(service.store().len().await, 1);
        assert_eq!(service.full_history(&user).await.unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn overview_combines_snapshot_recent_and_daily() {
        let service = service();
        let user = UserId::new("u1");
        for value in [55.0, 60.0, 65.0] {
            service.submit_attempt(Some(&user), quiz(value)).await.unwrap();
        }

        let overview = service.overview_at(&user, 7, 2, Utc::now()).await.unwrap();
        assert_eq!(overview.snapshot.level, Level::Pro);
        assert_eq!(overview.recent.len(), 2);
        assert_eq!(overview.daily.len(), 7);
        assert_eq!(overview.daily.last().unwrap().quiz_count, 3);
    }

    #[tokio::test]
    async fn second_write_failure_surfaces() {
        let service = service();
        let user = UserId::new("u1");
        service.store().fail_next_writes(2);

        let err = service.submit_attempt(Some(&user), quiz(75.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::Persistence(_)));
        assert!(service.store().is_empty().await);
    }

    #[tokio::test]
    async fn progression_reflects_submissions() {
        let service = service();
        let user = UserId::new("u1");
        for value in [55.0, 60.0, 65.0] {
            service.submit_attempt(Some(&user), quiz(value)).await.unwrap();
        }

        let first = service.get_progression(&user).await.unwrap();
        let second = service.get_progression(&user).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.level, Level::Pro);
        assert_eq!(first.streak_days, 1);
    }

    #[tokio::test]
    async fn recent_activity_is_capped_at_page_size() {
        let service = service();
        let user = UserId::new("u1");
        for _ in 0..(RAW_LISTING_PAGE_SIZE + 5) {
            service.submit_attempt(Some(&user), quiz(50.0)).await.unwrap();
        }

        let recent = service.get_recent_activity(&user, 500).await.unwrap();
        assert_eq!(recent.len(), RAW_LISTING_PAGE_SIZE);
        let snapshot = service.get_progression(&user).await.unwrap();
        assert_eq!(snapshot.total_quizzes, RAW_LISTING_PAGE_SIZE + 5);
    }

    #[tokio::test]
    async fn progress_by_day_counts_today() {
        let service = service();
        let user = UserId::new("u1");
        service.submit_attempt(Some(&user), quiz(50.0)).await.unwrap();

        let days = service.get_progress_by_day(&user, 7).await.unwrap();
        assert_eq!(days.len(), 7);
        assert_eq!(days.last().unwrap().quiz_count, 1);
    }

    #[tokio::test]
    async fn successful_submit_updates_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().join("history.json"));
        let service = service().with_mirror(mirror.clone());
        let user = UserId::new("u1");

        let record = service.submit_attempt(Some(&user), quiz(90.0)).await.unwrap();
        assert_eq!(mirror.load(), vec![record]);
    }
}
