use std::fmt::Write;

use chrono::{FixedOffset, NaiveDate};

use crate::models::{DailyProgress, LearnerProgressionSnapshot, ScoreRecord, UserId};

pub fn build_report(
    user_id: &UserId,
    generated_on: NaiveDate,
    offset: &FixedOffset,
    snapshot: &LearnerProgressionSnapshot,
    recent: &[ScoreRecord],
    daily: &[DailyProgress],
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Learning Progress Report");
    let _ = writeln!(output, "Generated for {} on {}", user_id, generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Level");
    let _ = writeln!(output, "- Current level: {}", snapshot.level);
    let _ = writeln!(
        output,
        "- Unlocked: {}",
        snapshot
            .unlocked_levels
            .iter()
            .map(|level| level.label())
            .collect::<Vec<_>>()
            .join(", ")
    );
    let _ = writeln!(output, "- Streak: {} day(s)", snapshot.streak_days);
    let _ = writeln!(
        output,
        "- Quizzes taken: {} (avg score {:.1})",
        snapshot.total_quizzes, snapshot.average_quiz_score
    );
    let _ = writeln!(output, "- Average typing speed: {} wpm", snapshot.average_typing_wpm);
    let _ = writeln!(output, "- Puzzles solved: {}", snapshot.puzzles_solved);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Level Progress");
    for progress in snapshot.per_level_progress.iter() {
        let marker = if progress.unlocked { "unlocked" } else { "locked" };
        let _ = writeln!(output, "- {}: {}% ({})", progress.level, progress.percent, marker);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Activity Mix");

    if snapshot.kind_summaries.is_empty() {
        let _ = writeln!(output, "No activity recorded yet.");
    } else {
        for summary in snapshot.kind_summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} attempts (avg {:.1}, best {:.1})",
                summary.kind, summary.count, summary.average, summary.best
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Activity");

    if recent.is_empty() {
        let _ = writeln!(output, "No activity recorded yet.");
    } else {
        for record in recent.iter() {
            let title = record
                .metadata
                .get("title")
                .and_then(|value| value.as_str())
                .unwrap_or("untitled");
            let _ = writeln!(
                output,
                "- {} {} \"{}\": {:.1}",
                record.created_at.with_timezone(offset).format("%Y-%m-%d %H:%M"),
                record.kind,
                title,
                record.value
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Activity");
    let _ = writeln!(output, "| Date | Quiz | Typing | Puzzle |");
    let _ = writeln!(output, "|------|------|--------|--------|");
    for day in daily.iter() {
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} |",
            day.date, day.quiz_count, day.typing_count, day.puzzle_count
        );
    }

    output
}
