use std::env;

use crate::auth::{Principal, Role};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Tunables of the candidate pipeline and the dashboard queries.
#[derive(Debug, Clone)]
pub struct EngineLimits {
    /// Coarse stage: how many eligible providers, ordered by raw rating, are scored.
    pub candidate_pool_size: usize,
    /// Fine stage: how many scored candidates are returned.
    pub candidate_limit: usize,
    pub pending_limit: usize,
    pub success_window_days: i64,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            candidate_pool_size: 15,
            candidate_limit: 10,
            pending_limit: 50,
            success_window_days: 30,
        }
    }
}

/// Retry schedule for outbox deliveries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxPolicy {
    /// Failed attempts after which an event is dead-lettered.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for OutboxPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_base_ms: 1_000,
            backoff_max_ms: 300_000,
        }
    }
}

impl OutboxPolicy {
    /// Delay before the next attempt after `failed_attempts` failures, doubling
    /// per failure up to `backoff_max_ms`.
    pub fn backoff(&self, failed_attempts: u32) -> chrono::Duration {
        let exponent = failed_attempts.saturating_sub(1).min(32);
        let ms = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms)
            .min(MAX_BACKOFF_MS);

        chrono::Duration::milliseconds(ms as i64)
    }
}

const MAX_BACKOFF_MS: u64 = 86_400_000;
const MAX_SUCCESS_WINDOW_DAYS: i64 = 3_650;

impl EngineLimits {
    pub fn validate(&self) -> Result<(), AppError> {
        require_positive("CANDIDATE_POOL_SIZE", self.candidate_pool_size)?;
        require_positive("CANDIDATE_LIMIT", self.candidate_limit)?;
        require_positive("PENDING_LIMIT", self.pending_limit)?;

        if !(1..=MAX_SUCCESS_WINDOW_DAYS).contains(&self.success_window_days) {
            return Err(AppError::Internal(format!(
                "invalid SUCCESS_WINDOW_DAYS: {}, expected 1..={MAX_SUCCESS_WINDOW_DAYS}",
                self.success_window_days
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub grpc_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub outbox_queue_size: usize,
    pub event_buffer_size: usize,
    pub outbox_retry_ms: u64,
    pub limits: EngineLimits,
    pub outbox_policy: OutboxPolicy,
    pub api_tokens: Vec<(String, Principal)>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let defaults = EngineLimits::default();
        let retry = OutboxPolicy::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            grpc_port: parse_or_default("GRPC_PORT", 50051)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_log_format(env::var("LOG_FORMAT").ok().as_deref())?,
            outbox_queue_size: parse_or_default("OUTBOX_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            outbox_retry_ms: parse_or_default("OUTBOX_RETRY_MS", 2000)?,
            limits: EngineLimits {
                candidate_pool_size: parse_or_default(
                    "CANDIDATE_POOL_SIZE",
                    defaults.candidate_pool_size,
                )?,
                candidate_limit: parse_or_default("CANDIDATE_LIMIT", defaults.candidate_limit)?,
                pending_limit: parse_or_default("PENDING_LIMIT", defaults.pending_limit)?,
                success_window_days: parse_or_default(
                    "SUCCESS_WINDOW_DAYS",
                    defaults.success_window_days,
                )?,
            },
            outbox_policy: OutboxPolicy {
                max_attempts: parse_or_default("OUTBOX_MAX_ATTEMPTS", retry.max_attempts)?,
                backoff_base_ms: parse_or_default(
                    "OUTBOX_BACKOFF_BASE_MS",
                    retry.backoff_base_ms,
                )?,
                backoff_max_ms: parse_or_default("OUTBOX_BACKOFF_MAX_MS", retry.backoff_max_ms)?,
            },
            api_tokens: parse_api_tokens(&env::var("API_TOKENS").unwrap_or_default())?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would otherwise panic at startup or on every query.
    pub fn validate(&self) -> Result<(), AppError> {
        require_positive("OUTBOX_QUEUE_SIZE", self.outbox_queue_size)?;
        require_positive("EVENT_BUFFER_SIZE", self.event_buffer_size)?;
        require_positive("OUTBOX_RETRY_MS", self.outbox_retry_ms)?;
        self.limits.validate()?;

        let policy = &self.outbox_policy;
        require_positive("OUTBOX_MAX_ATTEMPTS", policy.max_attempts)?;
        require_positive("OUTBOX_BACKOFF_BASE_MS", policy.backoff_base_ms)?;
        if policy.backoff_max_ms < policy.backoff_base_ms
            || policy.backoff_max_ms > MAX_BACKOFF_MS
        {
            return Err(AppError::Internal(format!(
                "invalid OUTBOX_BACKOFF_MAX_MS: {}, expected {}..={MAX_BACKOFF_MS}",
                policy.backoff_max_ms, policy.backoff_base_ms
            )));
        }

        Ok(())
    }
}

pub(crate) fn require_positive<T>(key: &str, value: T) -> Result<(), AppError>
where
    T: Default + PartialEq,
{
    if value == T::default() {
        return Err(AppError::Internal(format!("invalid {key}: must be greater than 0")));
    }
    Ok(())
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn parse_log_format(raw: Option<&str>) -> Result<LogFormat, AppError> {
    match raw.map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(LogFormat::Compact),
        Some(value) if value.is_empty() || value == "compact" => Ok(LogFormat::Compact),
        Some(value) if value == "json" => Ok(LogFormat::Json),
        Some(other) => Err(AppError::Internal(format!(
            "invalid LOG_FORMAT: {other}, expected compact/json"
        ))),
    }
}

/// Parses `token=user_id:role` entries separated by commas.
pub fn parse_api_tokens(raw: &str) -> Result<Vec<(String, Principal)>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (token, identity) = entry
                .split_once('=')
                .ok_or_else(|| AppError::Internal(format!("invalid API_TOKENS entry: {entry}")))?;
            let (user_id, role) = identity
                .split_once(':')
                .ok_or_else(|| AppError::Internal(format!("invalid API_TOKENS entry: {entry}")))?;
            let role: Role = role
                .parse()
                .map_err(|err| AppError::Internal(format!("invalid API_TOKENS entry: {err}")))?;

            if token.trim().is_empty() || user_id.trim().is_empty() {
                return Err(AppError::Internal(format!("invalid API_TOKENS entry: {entry}")));
            }

            Ok((
                token.trim().to_string(),
                Principal {
                    user_id: user_id.trim().to_string(),
                    role,
                },
            ))
        })
        .collect()
}
