use std::path::PathBuf;

use anyhow::{Context, bail};

/// Placeholder JWT secrets that MUST NOT be used outside development.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

const MAX_TOKEN_TTL_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub vote_workers: usize,
    pub vote_queue_capacity: usize,
    pub stats_ttl_secs: u64,
    pub expiry_interval_secs: u64,
    pub token_ttl_days: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut jwt_secret = lookup("TALLY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            if lookup("TALLY_ALLOW_DEV_SECRET").as_deref() != Some("1") {
                bail!(
                    "TALLY_JWT_SECRET is unset or still a placeholder; \
                     set it in your .env file (or TALLY_ALLOW_DEV_SECRET=1 for local development)"
                );
            }
            if jwt_secret.is_empty() {
                jwt_secret = PLACEHOLDER_SECRETS[1].to_string();
            }
        }
        Self::build(&lookup, jwt_secret)
    }

    fn build(lookup: &impl Fn(&str) -> Option<String>, jwt_secret: String) -> anyhow::Result<Self> {
        Ok(Self {
            host: lookup("TALLY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(lookup, "TALLY_PORT", 3000)?,
            db_path: lookup("TALLY_DB_PATH")
                .unwrap_or_else(|| "tally.db".into())
                .into(),
            jwt_secret,
            vote_workers: parse_var(lookup, "TALLY_VOTE_WORKERS", 4)?,
            vote_queue_capacity: parse_var(lookup, "TALLY_VOTE_QUEUE_CAPACITY", 1024)?,
            stats_ttl_secs: parse_var(lookup, "TALLY_STATS_TTL_SECS", 30)?,
            expiry_interval_secs: parse_var(lookup, "TALLY_EXPIRY_INTERVAL_SECS", 60)?,
            token_ttl_days: parse_ttl_days(lookup)?,
        })
    }
}

fn parse_ttl_days(lookup: &impl Fn(&str) -> Option<String>) -> anyhow::Result<i64> {
    let days = parse_var(lookup, "TALLY_TOKEN_TTL_DAYS", 30)?;
    if !(1..=MAX_TOKEN_TTL_DAYS).contains(&days) {
        bail!(
            "TALLY_TOKEN_TTL_DAYS must be between 1 and {}, got {}",
            MAX_TOKEN_TTL_DAYS,
            days
        );
    }
    Ok(days)
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
