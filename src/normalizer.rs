use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{ActivityKind, Metadata, ScoreRecord, UserId};

/// Raw, unvalidated result of any finished attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityOutcome {
    pub kind: String,
    pub value: f64,
    #[serde(default)]
    pub metadata: Value,
}

/// Metadata keys with a documented numeric meaning.
const PERCENT_KEYS: &[&str] = &["accuracy"];
const COUNT_KEYS: &[&str] = &["errors", "elapsedSeconds"];

pub fn normalize(user_id: &UserId, outcome: ActivityOutcome) -> EngineResult<ScoreRecord> {
    normalize_at(user_id, outcome, Utc::now())
}

/// `created_at` is the normalization instant, never the attempt's own clock.
pub fn normalize_at(
    user_id: &UserId,
    outcome: ActivityOutcome,
    now: DateTime<Utc>,
) -> EngineResult<ScoreRecord> {
    let kind: ActivityKind = outcome.kind.trim().parse()?;

    if !outcome.value.is_finite() || outcome.value < 0.0 {
        return Err(EngineError::InvalidActivityOutcome(format!(
            "value must be a finite number >= 0, got {}",
            outcome.value
        )));
    }

    let metadata = validate_metadata(outcome.metadata)?;

    Ok(ScoreRecord {
        id: Uuid::new_v4(),
        user_id: user_id.clone(),
        kind,
        value: outcome.value,
        metadata,
        created_at: now,
    })
}

fn validate_metadata(metadata: Value) -> EngineResult<Metadata> {
    let map = match metadata {
        Value::Null => return Ok(Metadata::new()),
        Value::Object(map) => map,
        other => {
            return Err(EngineError::InvalidActivityOutcome(format!(
                "metadata must be an object, got {other}"
            )))
        }
    };

    for key in PERCENT_KEYS {
        if let Some(value) = map.get(*key) {
            let in_range = value.as_f64().is_some_and(|v| (0.0..=100.0).contains(&v));
            if !in_range {
                return Err(EngineError::InvalidActivityOutcome(format!(
                    "metadata '{key}' must be a percentage, got {value}"
                )));
            }
        }
    }

    for key in COUNT_KEYS {
        if let Some(value) = map.get(*key) {
            let valid = value.as_f64().is_some_and(|v| v.is_finite() && v >= 0.0);
            if !valid {
                return Err(EngineError::InvalidActivityOutcome(format!(
                    "metadata '{key}' must be a non-negative number, got {value}"
                )));
            }
        }
    }

    Ok(map)
}
