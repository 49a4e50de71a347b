use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Days, FixedOffset, NaiveDate, TimeZone, Utc};

use crate::models::{
    ActivityKind, DailyProgress, KindSummary, LearnerProgressionSnapshot, Level, LevelProgress,
    ScoreRecord,
};

pub const STREAK_LOOKBACK_DAYS: u64 = 365;
pub const DEFAULT_DAILY_WINDOW: u32 = 14;
pub const MAX_DAILY_WINDOW: u32 = 365;

/// Classification requires volume AND quality: (level, min quizzes, min average).
/// Evaluated top-down, first match wins.
const CLASSIFICATION_RULES: [(Level, usize, f64); 3] = [
    (Level::UltraLegend, 10, 85.0),
    (Level::Legend, 5, 70.0),
    (Level::Pro, 3, 50.0),
];

/// Unlocking needs volume OR quality: (level, min average, min quizzes).
const UNLOCK_RULES: [(Level, f64, usize); 3] = [
    (Level::Pro, 60.0, 3),
    (Level::Legend, 70.0, 5),
    (Level::UltraLegend, 85.0, 10),
];

/// Pure projection of a user's full history as seen at `now`.
pub fn aggregate(records: &[ScoreRecord], now: DateTime<FixedOffset>) -> LearnerProgressionSnapshot {
    let offset = *now.offset();
    let today = now.date_naive();

    let quiz_scores: Vec<f64> = values_of(records, ActivityKind::Quiz);
    let typing_wpm: Vec<f64> = values_of(records, ActivityKind::Typing);

    let total_quizzes = quiz_scores.len();
    let average_quiz_score = mean(&quiz_scores);
    let average_typing_wpm = mean(&typing_wpm).round() as u32;
    let puzzles_solved = records
        .iter()
        .filter(|record| record.kind == ActivityKind::Puzzle)
        .count();

    let unlocked = unlocked_levels(total_quizzes, average_quiz_score);

    LearnerProgressionSnapshot {
        level: classify_level(total_quizzes, average_quiz_score),
        per_level_progress: level_progress(&unlocked, average_quiz_score),
        unlocked_levels: unlocked,
        streak_days: streak_days(records, today, &offset),
        average_quiz_score,
        average_typing_wpm,
        puzzles_solved,
        total_quizzes,
        kind_summaries: summarize_by_kind(records),
    }
}

pub fn classify_level(total_quizzes: usize, average_quiz_score: f64) -> Level {
    CLASSIFICATION_RULES
        .iter()
        .find(|(_, min_quizzes, min_average)| {
            total_quizzes >= *min_quizzes && average_quiz_score >= *min_average
        })
        .map(|(level, _, _)| *level)
        .unwrap_or(Level::Beginner)
}

/// Ascending; beginner is always present.
pub fn unlocked_levels(total_quizzes: usize, average_quiz_score: f64) -> Vec<Level> {
    let mut unlocked = vec![Level::Beginner];
    unlocked.extend(
        UNLOCK_RULES
            .iter()
            .filter(|(_, min_average, min_quizzes)| {
                average_quiz_score >= *min_average || total_quizzes >= *min_quizzes
            })
            .map(|(level, _, _)| *level),
    );
    unlocked
}

pub fn level_progress(unlocked: &[Level], average_quiz_score: f64) -> Vec<LevelProgress> {
    Level::ALL
        .iter()
        .map(|level| {
            let is_unlocked = unlocked.contains(level);
            let percent = if is_unlocked {
                100
            } else {
                let required = required_score(*level);
                (100.0 * average_quiz_score / required).round().clamp(0.0, 100.0) as u8
            };

            LevelProgress {
                level: *level,
                unlocked: is_unlocked,
                percent,
            }
        })
        .collect()
}

fn required_score(level: Level) -> f64 {
    UNLOCK_RULES
        .iter()
        .find(|(rule_level, _, _)| *rule_level == level)
        .map(|(_, min_average, _)| *min_average)
        .unwrap_or(0.0)
}

/// Consecutive active days ending today. A day without activity today
/// yields 0 even if yesterday was active.
pub fn streak_days(records: &[ScoreRecord], today: NaiveDate, offset: &FixedOffset) -> u32 {
    let active_days: HashSet<NaiveDate> = records
        .iter()
        .map(|record| local_date(&record.created_at, offset))
        .collect();

    let mut streak = 0;
    for days_back in 0..STREAK_LOOKBACK_DAYS {
        let Some(day) = today.checked_sub_days(Days::new(days_back)) else {
            break;
        };
        if !active_days.contains(&day) {
            break;
        }
        streak += 1;
    }
    streak
}

/// Zero-filled, ascending, `window_days` days ending today. The window is
/// clamped to `1..=MAX_DAILY_WINDOW`.
pub fn progress_by_day(
    records: &[ScoreRecord],
    today: NaiveDate,
    offset: &FixedOffset,
    window_days: u32,
) -> Vec<DailyProgress> {
    let window = u64::from(window_days.clamp(1, MAX_DAILY_WINDOW));

    let mut days: BTreeMap<NaiveDate, DailyProgress> = (0..window)
        .filter_map(|days_back| today.checked_sub_days(Days::new(days_back)))
        .map(|date| (date, DailyProgress::empty(date)))
        .collect();

    for record in records {
        let date = local_date(&record.created_at, offset);
        if let Some(day) = days.get_mut(&date) {
            match record.kind {
                ActivityKind::Quiz => day.quiz_count += 1,
                ActivityKind::Typing => day.typing_count += 1,
                ActivityKind::Puzzle => day.puzzle_count += 1,
            }
        }
    }

    days.into_values().collect()
}

/// Newest first.
pub fn recent_activity(records: &[ScoreRecord], limit: usize) -> Vec<ScoreRecord> {
    let mut recent = records.to_vec();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent.truncate(limit);
    recent
}

pub fn summarize_by_kind(records: &[ScoreRecord]) -> Vec<KindSummary> {
    let mut map: HashMap<ActivityKind, (usize, f64, f64)> = HashMap::new();

    for record in records {
        let entry = map.entry(record.kind).or_insert((0, 0.0, 0.0));
        entry.0 += 1;
        entry.1 += record.value;
        entry.2 = entry.2.max(record.value);
    }

    let mut summaries: Vec<KindSummary> = map
        .into_iter()
        .map(|(kind, (count, total, best))| KindSummary {
            kind,
            count,
            average: if count == 0 { 0.0 } else { total / count as f64 },
            best,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.kind.cmp(&b.kind)));
    summaries
}

pub fn local_date(timestamp: &DateTime<Utc>, offset: &FixedOffset) -> NaiveDate {
    offset.from_utc_datetime(&timestamp.naive_utc()).date_naive()
}

fn values_of(records: &[ScoreRecord], kind: ActivityKind) -> Vec<f64> {
    records
        .iter()
        .filter(|record| record.kind == kind)
        .map(|record| record.value)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Metadata, UserId};
    use chrono::Duration;
    use uuid::Uuid;

    fn now() -> DateTime<FixedOffset> {
        let offset = FixedOffset::east_opt(0).unwrap();
        offset.with_ymd_and_hms(2026, 3, 10, 15, 0, 0).unwrap()
    }

    fn record(kind: ActivityKind, value: f64, days_ago: i64) -> ScoreRecord {
        ScoreRecord {
            id: Uuid::new_v4(),
            user_id: UserId::new("learner"),
            kind,
            value,
            metadata: Metadata::new(),
            created_at: now().with_timezone(&Utc) - Duration::days(days_ago),
        }
    }

    fn quizzes(values: &[f64]) -> Vec<ScoreRecord> {
        values
            .iter()
            .map(|value| record(ActivityKind::Quiz, *value, 0))
            .collect()
    }

    #[test]
    fn empty_history_is_beginner() {
        let snapshot = aggregate(&[], now());
        assert_eq!(snapshot.level, Level::Beginner);
        assert_eq!(snapshot.unlocked_levels, vec![Level::Beginner]);
        assert_eq!(snapshot.streak_days, 0);
        assert_eq!(snapshot.average_quiz_score, 0.0);
        assert_eq!(snapshot.average_typing_wpm, 0);
        assert!(snapshot.kind_summaries.is_empty());
    }

    #[test]
    fn three_modest_quizzes_reach_pro() {
        let snapshot = aggregate(&quizzes(&[55.0, 60.0, 65.0]), now());
        assert_eq!(snapshot.total_quizzes, 3);
        assert_eq!(snapshot.average_quiz_score, 60.0);
        assert_eq!(snapshot.level, Level::Pro);
        assert!(snapshot.unlocked_levels.contains(&Level::Pro));
    }

    #[test]
    fn ten_strong_quizzes_reach_ultra_legend() {
        let snapshot = aggregate(&quizzes(&[90.0; 10]), now());
        assert_eq!(snapshot.level, Level::UltraLegend);
        assert_eq!(snapshot.unlocked_levels, Level::ALL.to_vec());
        assert!(snapshot.per_level_progress.iter().all(|p| p.percent == 100));
    }

    #[test]
    fn single_perfect_score_unlocks_but_does_not_classify() {
        let snapshot = aggregate(&quizzes(&[100.0]), now());
        assert_eq!(snapshot.level, Level::Beginner);
        assert_eq!(snapshot.unlocked_levels, Level::ALL.to_vec());
    }

    #[test]
    fn unlocked_legend_implies_lower_levels() {
        for total in 0..12 {
            for average in [0.0, 30.0, 59.9, 60.0, 69.9, 70.0, 84.9, 85.0, 100.0] {
                let unlocked = unlocked_levels(total, average);
                if unlocked.contains(&Level::UltraLegend) {
                    assert!(unlocked.contains(&Level::Legend));
                }
                if unlocked.contains(&Level::Legend) {
                    assert!(unlocked.contains(&Level::Pro));
                }
                assert!(unlocked.contains(&Level::Beginner));
            }
        }
    }

    #[test]
    fn locked_levels_report_partial_progress() {
        let progress = level_progress(&unlocked_levels(1, 42.0), 42.0);
        let percent = |level: Level| progress.iter().find(|p| p.level == level).unwrap().percent;

        assert_eq!(percent(Level::Beginner), 100);
        assert_eq!(percent(Level::Pro), 70);
        assert_eq!(percent(Level::Legend), 60);
        assert_eq!(percent(Level::UltraLegend), 49);
    }

    #[test]
    fn streak_counts_consecutive_days_ending_today() {
        let records = vec![
            record(ActivityKind::Quiz, 70.0, 0),
            record(ActivityKind::Typing, 40.0, 1),
            record(ActivityKind::Puzzle, 1.0, 3),
        ];
        assert_eq!(aggregate(&records, now()).streak_days, 2);
    }

    #[test]
    fn streak_requires_activity_today() {
        let records = vec![
            record(ActivityKind::Quiz, 70.0, 1),
            record(ActivityKind::Quiz, 70.0, 2),
        ];
        assert_eq!(aggregate(&records, now()).streak_days, 0);
    }

    #[test]
    fn streak_uses_configured_offset_for_day_boundaries() {
        // 23:30 UTC on the 9th is already the 10th at UTC+2.
        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let mut late = record(ActivityKind::Quiz, 50.0, 0);
        late.created_at = Utc.with_ymd_and_hms(2026, 3, 9, 23, 30, 0).unwrap();

        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        assert_eq!(streak_days(&[late.clone()], today, &plus_two), 1);
        assert_eq!(streak_days(&[late], today, &FixedOffset::east_opt(0).unwrap()), 0);
    }

    #[test]
    fn streak_is_capped() {
        let records: Vec<ScoreRecord> = (0..400)
            .map(|days_ago| record(ActivityKind::Puzzle, 1.0, days_ago))
            .collect();
        assert_eq!(aggregate(&records, now()).streak_days, 365);
    }

    #[test]
    fn averages_and_counts_per_kind() {
        let records = vec![
            record(ActivityKind::Typing, 41.0, 0),
            record(ActivityKind::Typing, 44.0, 2),
            record(ActivityKind::Puzzle, 3.0, 5),
            record(ActivityKind::Puzzle, 1.0, 6),
            record(ActivityKind::Quiz, 80.0, 1),
        ];
        let snapshot = aggregate(&records, now());

        assert_eq!(snapshot.average_typing_wpm, 43);
        assert_eq!(snapshot.puzzles_solved, 2);
        assert_eq!(snapshot.total_quizzes, 1);

        let kinds: Vec<ActivityKind> = snapshot.kind_summaries.iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![ActivityKind::Typing, ActivityKind::Puzzle, ActivityKind::Quiz]);
        assert_eq!(snapshot.kind_summaries[0].best, 44.0);
    }

    #[test]
    fn aggregation_is_deterministic() {
        let records = vec![
            record(ActivityKind::Typing, 41.0, 0),
            record(ActivityKind::Quiz, 66.0, 1),
            record(ActivityKind::Puzzle, 2.0, 1),
        ];
        assert_eq!(aggregate(&records, now()), aggregate(&records, now()));
    }

    #[test]
    fn progress_by_day_is_zero_filled_and_ascending() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let records = vec![
            record(ActivityKind::Quiz, 70.0, 0),
            record(ActivityKind::Typing, 40.0, 0),
            record(ActivityKind::Puzzle, 1.0, 2),
            record(ActivityKind::Puzzle, 1.0, 30),
        ];
        let days = progress_by_day(&records, now().date_naive(), &offset, 3);

        assert_eq!(days.len(), 3);
        assert!(days.windows(2).all(|pair| pair[0].date < pair[1].date));
        assert_eq!(days[0].puzzle_count, 1);
        assert_eq!(days[1].total(), 0);
        assert_eq!(days[2].quiz_count, 1);
        assert_eq!(days[2].typing_count, 1);
    }

    #[test]
    fn progress_by_day_window_is_capped() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let today = now().date_naive();
        let records = vec![
            record(ActivityKind::Quiz, 70.0, 364),
            record(ActivityKind::Quiz, 70.0, 365),
        ];

        let at_cap = progress_by_day(&records, today, &offset, MAX_DAILY_WINDOW);
        assert_eq!(at_cap.len(), MAX_DAILY_WINDOW as usize);
        assert_eq!(at_cap.first().unwrap().date, today - Duration::days(364));
        assert_eq!(at_cap.first().unwrap().quiz_count, 1);

        let oversized = progress_by_day(&records, today, &offset, u32::MAX);
        assert_eq!(oversized, at_cap);
        assert_eq!(progress_by_day(&records, today, &offset, 0).len(), 1);
    }

    #[test]
    fn progress_by_day_near_the_calendar_floor_does_not_panic() {
        let offset = FixedOffset::east_opt(0).unwrap();
        let days = progress_by_day(&[], NaiveDate::MIN, &offset, MAX_DAILY_WINDOW);
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].date, NaiveDate::MIN);
    }

    #[test]
    fn recent_activity_is_newest_first_and_bounded() {
        let records = vec![
            record(ActivityKind::Quiz, 1.0, 5),
            record(ActivityKind::Quiz, 2.0, 0),
            record(ActivityKind::Quiz, 3.0, 2),
        ];
        let recent = recent_activity(&records, 2);
        let values: Vec<f64> = recent.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }
}
