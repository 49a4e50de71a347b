//! Live typing attempt: lazy-start clock, per-character diff against the
//! reference text, words-per-minute and accuracy on every input and tick.
//!
//! The tracker is driven by the caller. Each input change goes through
//! [`TypingTracker::on_input`] and a once-per-second [`TypingTracker::tick`]
//! keeps WPM honest while the user pauses. An attempt ends either when the
//! typed text equals the reference exactly or when the remaining time hits
//! zero. Both paths yield a single [`AttemptOutcome`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::normalizer::ActivityOutcome;

pub const DEFAULT_TIME_LIMIT_SECS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Completion {
    Match,
    Timeout,
}

impl Completion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Completion::Match => "match",
            Completion::Timeout => "timeout",
        }
    }
}

/// Transient state of the open attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveAttemptState {
    pub reference_text: String,
    pub typed_so_far: String,
    pub started_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: u64,
    pub error_count: usize,
    pub accuracy_percent: u8,
    pub current_wpm: u32,
    pub remaining_secs: Option<u32>,
    #[serde(skip)]
    finished: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub wpm: u32,
    pub accuracy_percent: u8,
    pub error_count: usize,
    pub elapsed_seconds: u64,
    pub completion: Completion,
    pub typed: String,
}

impl AttemptOutcome {
    /// Builds the normalizer input for a finished typing attempt.
    pub fn to_activity_outcome(&self, title: Option<&str>) -> ActivityOutcome {
        let mut metadata = json!({
            "accuracy": self.accuracy_percent,
            "errors": self.error_count,
            "elapsedSeconds": self.elapsed_seconds,
            "completion": self.completion.as_str(),
        });
        if let Some(title) = title {
            metadata["title"] = json!(title);
        }

        ActivityOutcome {
            kind: "typing".to_string(),
            value: f64::from(self.wpm),
            metadata,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TypingTracker {
    time_limit_secs: Option<u32>,
    attempt: Option<LiveAttemptState>,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(Some(DEFAULT_TIME_LIMIT_SECS))
    }
}

impl TypingTracker {
    /// `None` runs untimed attempts that only end on an exact match.
    pub fn new(time_limit_secs: Option<u32>) -> Self {
        Self {
            time_limit_secs,
            attempt: None,
        }
    }

    /// Opens a fresh attempt, discarding any unfinished one. The clock does
    /// not run until the first non-empty input.
    pub fn start(&mut self, reference_text: &str) -> EngineResult<()> {
        if reference_text.is_empty() {
            return Err(EngineError::InvalidReferenceText);
        }

        self.attempt = Some(LiveAttemptState {
            reference_text: reference_text.to_string(),
            typed_so_far: String::new(),
            started_at: None,
            elapsed_seconds: 0,
            error_count: 0,
            accuracy_percent: 100,
            current_wpm: 0,
            remaining_secs: self.time_limit_secs,
            finished: false,
        });
        Ok(())
    }

    pub fn reset(&mut self) {
        self.attempt = None;
    }

    pub fn state(&self) -> Option<&LiveAttemptState> {
        self.attempt.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.attempt.as_ref().is_some_and(|attempt| !attempt.finished)
    }

    /// Returns the outcome exactly once, on the input that makes the typed
    /// text equal to the reference.
    pub fn on_input(&mut self, typed: &str, now: DateTime<Utc>) -> Option<AttemptOutcome> {
        let attempt = self.attempt.as_mut().filter(|attempt| !attempt.finished)?;

        if attempt.started_at.is_none() && !typed.is_empty() {
            attempt.started_at = Some(now);
        }

        attempt.typed_so_far = typed.to_string();
        attempt.error_count = error_count(typed, &attempt.reference_text);
        attempt.accuracy_percent = accuracy_percent(&attempt.reference_text, attempt.error_count);
        attempt.refresh_timing(now);

        if attempt.typed_so_far == attempt.reference_text {
            return Some(attempt.finish(Completion::Match));
        }
        None
    }

    /// Once-per-second heartbeat. Does nothing before the first keystroke.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<AttemptOutcome> {
        let attempt = self
            .attempt
            .as_mut()
            .filter(|attempt| !attempt.finished && attempt.started_at.is_some())?;

        attempt.refresh_timing(now);

        let remaining = attempt.remaining_secs.as_mut()?;
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            return Some(attempt.finish(Completion::Timeout));
        }
        None
    }
}

impl LiveAttemptState {
    fn refresh_timing(&mut self, now: DateTime<Utc>) {
        let Some(started_at) = self.started_at else {
            self.current_wpm = 0;
            return;
        };

        let elapsed_ms = (now - started_at).num_milliseconds().max(0);
        self.elapsed_seconds = (elapsed_ms / 1000) as u64;
        self.current_wpm = words_per_minute(&self.typed_so_far, elapsed_ms as f64 / 60_000.0);
    }

    fn finish(&mut self, completion: Completion) -> AttemptOutcome {
        self.finished = true;
        debug!(
            completion = completion.as_str(),
            wpm = self.current_wpm,
            errors = self.error_count,
            "typing attempt finished"
        );

        AttemptOutcome {
            wpm: self.current_wpm,
            accuracy_percent: self.accuracy_percent,
            error_count: self.error_count,
            elapsed_seconds: self.elapsed_seconds,
            completion,
            typed: self.typed_so_far.clone(),
        }
    }
}

/// Mismatches over the overlapping prefix only.
pub fn error_count(typed: &str, reference: &str) -> usize {
    typed
        .chars()
        .zip(reference.chars())
        .filter(|(typed, expected)| typed != expected)
        .count()
}

pub fn accuracy_percent(reference: &str, errors: usize) -> u8 {
    let length = reference.chars().count();
    if length == 0 {
        return 0;
    }

    let correct = length.saturating_sub(errors) as f64;
    (100.0 * correct / length as f64).round().clamp(0.0, 100.0) as u8
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn words_per_minute(typed: &str, elapsed_minutes: f64) -> u32 {
    if elapsed_minutes <= 0.0 {
        return 0;
    }
    (word_count(typed) as f64 / elapsed_minutes).round() as u32
}
