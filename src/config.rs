use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::{FixedOffset, Local};
use tracing::info;

use crate::models::UserId;
use crate::typing::DEFAULT_TIME_LIMIT_SECS;

pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub utc_offset: FixedOffset,
    pub sessions: HashMap<String, UserId>,
    pub mirror_path: Option<PathBuf>,
    pub typing_time_limit_secs: u32,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let utc_offset = match var("PROGRESS_UTC_OFFSET_MINUTES") {
            Some(raw) => parse_offset(&raw)?,
            None => {
                let local = *Local::now().offset();
                info!("PROGRESS_UTC_OFFSET_MINUTES not set, using host offset {local}");
                local
            }
        };

        Ok(Self {
            database_url: var("DATABASE_URL"),
            max_connections: try_load("DB_MAX_CONNECTIONS", "5")?,
            acquire_timeout: Duration::from_millis(try_load("DB_ACQUIRE_TIMEOUT_MS", "3000")?),
            utc_offset,
            sessions: parse_sessions(&var("SESSION_TOKENS").unwrap_or_default())?,
            mirror_path: var("LOCAL_MIRROR_PATH").map(PathBuf::from),
            typing_time_limit_secs: try_load(
                "TYPING_TIME_LIMIT_SECS",
                &DEFAULT_TIME_LIMIT_SECS.to_string(),
            )?,
        })
    }

    pub fn require_database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim()
        .parse()
        .map_err(|e| anyhow!("Invalid {key} value '{raw}': {e}"))
}

pub fn parse_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    let minutes: i32 = raw
        .trim()
        .parse()
        .with_context(|| format!("Invalid PROGRESS_UTC_OFFSET_MINUTES value '{raw}'"))?;

    FixedOffset::east_opt(minutes * 60)
        .with_context(|| format!("UTC offset out of range: {minutes} minutes"))
}

/// `token=user` pairs separated by commas.
pub fn parse_sessions(raw: &str) -> anyhow::Result<HashMap<String, UserId>> {
    let mut sessions = HashMap::new();

    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (token, user) = pair
            .split_once('=')
            .with_context(|| format!("Invalid SESSION_TOKENS entry '{pair}', expected token=user"))?;
        let (token, user) = (token.trim(), user.trim());
        if token.is_empty() || user.is_empty() {
            return Err(anyhow!("Invalid SESSION_TOKENS entry '{pair}'"));
        }
        sessions.insert(token.to_string(), UserId::new(user));
    }

    Ok(sessions)
}
