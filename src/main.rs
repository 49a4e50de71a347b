use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use techquest_progress::config::Config;
use techquest_progress::identity::{
    IdentityChain, InboundRequest, FORWARDED_USER_HEADER, SESSION_COOKIE,
};
use techquest_progress::mirror::LocalMirror;
use techquest_progress::models::{Metadata, UserId};
use techquest_progress::normalizer::ActivityOutcome;
use techquest_progress::progression::{DEFAULT_DAILY_WINDOW, MAX_DAILY_WINDOW};
use techquest_progress::service::ProgressService;
use techquest_progress::store::{PgScoreStore, ScoreStore};
use techquest_progress::typing::{AttemptOutcome, TypingTracker};
use techquest_progress::{export, report, EngineError};

const REPORT_RECENT_LIMIT: usize = 5;

#[derive(Parser)]
#[command(name = "techquest-progress")]
#[command(about = "Activity scoring and learner progression for TechQuest", long_about = None)]
struct Cli {
    /// User id forwarded by a trusted upstream proxy
    #[arg(long, global = true)]
    user: Option<String>,
    /// Session token issued at sign-in
    #[arg(long, global = true)]
    session_token: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Record a finished quiz, typing or puzzle attempt
    Submit {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        value: f64,
        /// Metadata entry as key=value, repeatable
        #[arg(long = "meta")]
        meta: Vec<String>,
    },
    /// Run a timed typing drill in the terminal
    Type {
        #[arg(long)]
        text: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "untimed")]
        limit_secs: Option<u32>,
        #[arg(long)]
        untimed: bool,
    },
    /// Show level, unlocks and streak
    Progress {
        #[arg(long)]
        json: bool,
    },
    /// List the most recent attempts
    Recent {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Count attempts per day over a trailing window
    Daily {
        #[arg(
            long,
            default_value_t = DEFAULT_DAILY_WINDOW,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_DAILY_WINDOW))
        )]
        window_days: u32,
    },
    /// Generate a markdown progress report
    Report {
        #[arg(long, default_value = "progress.md")]
        out: PathBuf,
        #[arg(
            long,
            default_value_t = DEFAULT_DAILY_WINDOW,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_DAILY_WINDOW))
        )]
        window_days: u32,
    },
    /// Export the full attempt history as CSV
    Export {
        #[arg(long)]
        csv: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    let store = PgScoreStore::connect(
        config.require_database_url()?,
        config.max_connections,
        config.acquire_timeout,
    )
    .await
    .context("failed to connect to Postgres")?;

    if let Commands::InitDb = cli.command {
        store.init_db().await?;
        println!("Schema ready.");
        return Ok(());
    }

    let identity = IdentityChain::standard(config.sessions.clone());
    let user = identity.resolve(&inbound_request(&cli));

    let mut service = ProgressService::new(store, config.utc_offset);
    if let Some(path) = &config.mirror_path {
        service = service.with_mirror(LocalMirror::new(path));
    }

    match cli.command {
        Commands::InitDb => {}
        Commands::Submit { kind, value, meta } => {
            let outcome = ActivityOutcome {
                kind,
                value,
                metadata: Value::Object(parse_meta(&meta)?),
            };
            let record = service
                .submit_attempt(user.as_ref(), outcome)
                .await
                .map_err(surface)?;
            println!("Recorded {} score {} ({}).", record.kind, record.value, record.id);
        }
        Commands::Type {
            text,
            title,
            limit_secs,
            untimed,
        } => {
            let user = user.ok_or_else(|| surface(EngineError::Unauthenticated))?;
            let limit = if untimed {
                None
            } else {
                Some(limit_secs.unwrap_or(config.typing_time_limit_secs))
            };

            let Some(outcome) = run_typing_drill(&text, limit).await? else {
                println!("Attempt abandoned, nothing recorded.");
                return Ok(());
            };
            println!(
                "Finished ({}): {} wpm, {}% accuracy, {} errors in {}s.",
                outcome.completion.as_str(),
                outcome.wpm,
                outcome.accuracy_percent,
                outcome.error_count,
                outcome.elapsed_seconds
            );

            let record = service
                .submit_attempt(Some(&user), outcome.to_activity_outcome(title.as_deref()))
                .await
                .map_err(surface)?;
            println!("Recorded typing score ({}).", record.id);
        }
        Commands::Progress { json } => {
            let user = user.ok_or_else(|| surface(EngineError::Unauthenticated))?;
            let snapshot = service.get_progression(&user).await.map_err(surface)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("Level: {}", snapshot.level);
                println!("Streak: {} day(s)", snapshot.streak_days);
                for progress in snapshot.per_level_progress.iter() {
                    println!(
                        "- {}: {}%{}",
                        progress.level,
                        progress.percent,
                        if progress.unlocked { " (unlocked)" } else { "" }
                    );
                }
            }
        }
        Commands::Recent { limit } => {
            let user = user.ok_or_else(|| surface(EngineError::Unauthenticated))?;
            let records = service.get_recent_activity(&user, limit).await.map_err(surface)?;

            if records.is_empty() {
                println!("No activity recorded yet.");
                return Ok(());
            }
            for record in records.iter() {
                println!(
                    "- {} {} {:.1}",
                    record.created_at.with_timezone(&config.utc_offset).format("%Y-%m-%d %H:%M"),
                    record.kind,
                    record.value
                );
            }
        }
        Commands::Daily { window_days } => {
            let user = user.ok_or_else(|| surface(EngineError::Unauthenticated))?;
            let days = service
                .get_progress_by_day(&user, window_days)
                .await
                .map_err(surface)?;

            for day in days.iter() {
                println!(
                    "{} quiz {} typing {} puzzle {}",
                    day.date, day.quiz_count, day.typing_count, day.puzzle_count
                );
            }
        }
        Commands::Report { out, window_days } => {
            let user = user.ok_or_else(|| surface(EngineError::Unauthenticated))?;
            write_report(&service, &user, &out, window_days).await?;
            println!("Report written to {}.", out.display());
        }
        Commands::Export { csv } => {
            let user = user.ok_or_else(|| surface(EngineError::Unauthenticated))?;
            let history = service.full_history(&user).await.map_err(surface)?;
            let written = export::export_csv(&csv, &history)?;
            println!("Exported {written} attempts to {}.", csv.display());
        }
    }

    Ok(())
}

fn inbound_request(cli: &Cli) -> InboundRequest {
    let mut request = InboundRequest::new();
    if let Some(token) = &cli.session_token {
        request = request.with_cookie(SESSION_COOKIE, token);
    }
    if let Some(user) = &cli.user {
        request = request.with_header(FORWARDED_USER_HEADER, user);
    }
    request
}

fn surface(err: EngineError) -> anyhow::Error {
    match err {
        EngineError::Persistence(detail) => anyhow!("service unavailable: {detail}"),
        EngineError::Storage(detail) => anyhow!("storage rejected the request: {detail}"),
        other => anyhow::Error::new(other),
    }
}

/// `key=value` pairs; values that parse as JSON keep their type.
fn parse_meta(entries: &[String]) -> anyhow::Result<Metadata> {
    let mut metadata = Metadata::new();
    for entry in entries {
        let (key, raw) = entry
            .split_once('=')
            .with_context(|| format!("invalid --meta '{entry}', expected key=value"))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        metadata.insert(key.trim().to_string(), value);
    }
    Ok(metadata)
}

/// Line-oriented drill: each Enter appends the line to the typed text.
/// Returns `None` when stdin closes before the attempt finishes.
async fn run_typing_drill(text: &str, limit: Option<u32>) -> anyhow::Result<Option<AttemptOutcome>> {
    let mut tracker = TypingTracker::new(limit);
    tracker.start(text)?;

    println!("Type the following and press Enter:\n\n  {text}\n");
    if let Some(limit) = limit {
        println!("The clock starts with your first line. Time limit: {limit}s.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;
    let mut typed = String::new();

    let outcome = loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Ok(None);
                };
                if !typed.is_empty() {
                    typed.push(' ');
                }
                typed.push_str(&line);

                if let Some(outcome) = tracker.on_input(&typed, Utc::now()) {
                    break outcome;
                }
                if let Some(state) = tracker.state() {
                    println!(
                        "{} wpm, {}% accuracy, {} errors{}",
                        state.current_wpm,
                        state.accuracy_percent,
                        state.error_count,
                        state
                            .remaining_secs
                            .map(|secs| format!(", {secs}s left"))
                            .unwrap_or_default()
                    );
                }
            }
            _ = ticker.tick() => {
                if let Some(outcome) = tracker.tick(Utc::now()) {
                    break outcome;
                }
            }
        }
    };

    info!(completion = outcome.completion.as_str(), "typing drill finished");
    Ok(Some(outcome))
}

async fn write_report<S: ScoreStore>(
    service: &ProgressService<S>,
    user: &UserId,
    out: &Path,
    window_days: u32,
) -> anyhow::Result<()> {
    let now = Utc::now();
    let overview = service
        .overview_at(user, window_days, REPORT_RECENT_LIMIT, now)
        .await
        .map_err(surface)?;
    let offset = service.offset();
    let body = report::build_report(
        user,
        now.with_timezone(&offset).date_naive(),
        &offset,
        &overview.snapshot,
        &overview.recent,
        &overview.daily,
    );

    std::fs::write(out, body).with_context(|| format!("failed to write {}", out.display()))?;
    Ok(())
}
