//! Best-effort copy of recent attempts on the current device.
//!
//! The mirror is never authoritative. Read or write failures are logged and
//! swallowed so they cannot block a submission that the store already
//! accepted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, warn};

use crate::models::ScoreRecord;

pub const MIRROR_CAPACITY: usize = 50;

#[derive(Debug, Clone)]
pub struct LocalMirror {
    path: PathBuf,
    capacity: usize,
}

impl LocalMirror {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            capacity: MIRROR_CAPACITY,
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Newest first. Missing or unreadable files yield an empty history.
    pub fn load(&self) -> Vec<ScoreRecord> {
        match self.try_load() {
            Ok(records) => records,
            Err(err) => {
                warn!("local mirror unreadable, ignoring: {err:#}");
                Vec::new()
            }
        }
    }

    pub fn record(&self, record: &ScoreRecord) {
        if let Err(err) = self.try_record(record) {
            warn!("failed to update local mirror: {err:#}");
        }
    }

    fn try_load(&self) -> anyhow::Result<Vec<ScoreRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let records = serde_json::from_str(&raw).context("mirror file is not valid JSON")?;
        Ok(records)
    }

    fn try_record(&self, record: &ScoreRecord) -> anyhow::Result<()> {
        let mut records = self.try_load().unwrap_or_default();
        records.retain(|existing| existing.id != record.id);
        records.insert(0, record.clone());
        records.truncate(self.capacity);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let body = serde_json::to_string_pretty(&records)?;
        fs::write(&self.path, body)
            .with_context(|| format!("failed to write {}", self.path.display()))?;

        debug!(entries = records.len(), "local mirror updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityKind, Metadata, UserId};
    use chrono::Utc;
    use uuid::Uuid;

    fn record(value: f64) -> ScoreRecord {
        ScoreRecord {
            id: Uuid::new_v4(),
            user_id: UserId::new("device-user"),
            kind: ActivityKind::Typing,
            value,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn keeps_newest_entries_up_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = LocalMirror::new(dir.path().join("nested/history.json")).with_capacity(2);

        for value in [1.0, 2.0, 3.0] {
            mirror.record(&record(value));
        }

        let values: Vec<f64> = mirror.load().iter().map(|r| r.value).collect();
        assert_eq!(values, vec![3.0, 2.0]);
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "not json").unwrap();

        let mirror = LocalMirror::new(&path);
        assert!(mirror.load().is_empty());

        mirror.record(&record(5.0));
        assert_eq!(mirror.load().len(), 1);
    }
}
