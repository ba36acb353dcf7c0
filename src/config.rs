//! Runtime configuration loaded from environment variables.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {key} value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// How the owner's total is kept in step with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AggregateMode {
    /// Apply the transition delta with increment/decrement.
    #[default]
    Incremental,
    /// Re-sum the owner's completed donations after every write.
    Recompute,
}

impl FromStr for AggregateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "incremental" => Ok(AggregateMode::Incremental),
            "recompute" => Ok(AggregateMode::Recompute),
            other => Err(format!("expected incremental or recompute, got {other}")),
        }
    }
}

/// What direct confirmation does when the caller is not the donation's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MismatchPolicy {
    /// Complete the donation but credit nobody.
    #[default]
    SkipCredit,
    /// Reject an authenticated caller who is not the owner, like receipt verification does.
    Reject,
}

impl FromStr for MismatchPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip-credit" => Ok(MismatchPolicy::SkipCredit),
            "reject" => Ok(MismatchPolicy::Reject),
            other => Err(format!("expected skip-credit or reject, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared webhook secret; empty disables the webhook.
    pub webhook_secret: String,
    pub admin_emails: Vec<String>,
    /// Confirmation requests allowed per caller within `rate_window`; zero
    /// disables limiting.
    pub rate_limit: u32,
    pub rate_window: Duration,
    /// Attempts per transition before giving up on concurrent modification.
    pub max_attempts: u32,
    pub aggregate_mode: AggregateMode,
    pub mismatch_policy: MismatchPolicy,
    /// Optional `token,user,email` csv for the static token verifier.
    pub tokens_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            webhook_secret: String::new(),
            admin_emails: Vec::new(),
            rate_limit: 10,
            rate_window: Duration::from_secs(60),
            max_attempts: 3,
            aggregate_mode: AggregateMode::default(),
            mismatch_policy: MismatchPolicy::default(),
            tokens_file: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, falling back to defaults for missing keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let webhook_secret = var("DONATIONS_WEBHOOK_SECRET").unwrap_or_else(|| {
            info!("DONATIONS_WEBHOOK_SECRET not set, webhook disabled");
            String::new()
        });

        let admin_emails = var("DONATIONS_ADMIN_EMAILS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let rate_window_secs = parse_or(
            "DONATIONS_RATE_WINDOW_SECS",
            var("DONATIONS_RATE_WINDOW_SECS"),
            defaults.rate_window.as_secs(),
        )?;

        let max_attempts = parse_or(
            "DONATIONS_MAX_ATTEMPTS",
            var("DONATIONS_MAX_ATTEMPTS"),
            defaults.max_attempts,
        )?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "DONATIONS_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            webhook_secret,
            admin_emails,
            rate_limit: parse_or(
                "DONATIONS_RATE_LIMIT",
                var("DONATIONS_RATE_LIMIT"),
                defaults.rate_limit,
            )?,
            rate_window: Duration::from_secs(rate_window_secs),
            max_attempts,
            aggregate_mode: parse_or(
                "DONATIONS_AGGREGATE_MODE",
                var("DONATIONS_AGGREGATE_MODE"),
                defaults.aggregate_mode,
            )?,
            mismatch_policy: parse_or(
                "DONATIONS_MISMATCH_POLICY",
                var("DONATIONS_MISMATCH_POLICY"),
                defaults.mismatch_policy,
            )?,
            tokens_file: var("DONATIONS_TOKENS_FILE").map(PathBuf::from),
        })
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr + std::fmt::Debug,
    T::Err: Display,
{
    match raw {
        None => {
            info!("{key} not set, using default: {default:?}");
            Ok(default)
        }
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
