use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::rate_limit::{DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW};

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    /// Period of the stale-entry sweep; `None` keeps every entry for the
    /// life of the process.
    pub sweep_interval: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub webhook_url: Option<String>,
    pub upstream_timeout: Option<Duration>,
    pub rate_limit: RateLimitConfig,
    pub max_request_bytes: Option<usize>,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let webhook_url = match env::var("RELAY_WEBHOOK_URL") {
            Ok(raw) if !raw.trim().is_empty() => {
                let raw = raw.trim().to_string();
                reqwest::Url::parse(&raw)
                    .with_context(|| format!("RELAY_WEBHOOK_URL '{}' is not a valid URL", raw))?;
                Some(raw)
            }
            _ => None,
        };

        let upstream_timeout =
            parse_optional_u64("RELAY_UPSTREAM_TIMEOUT_MS")?.map(Duration::from_millis);

        let max_requests = match parse_optional_u64("RELAY_RATE_LIMIT_MAX")? {
            Some(0) => return Err(anyhow!("RELAY_RATE_LIMIT_MAX must be greater than zero")),
            Some(n) => u32::try_from(n)
                .map_err(|_| anyhow!("RELAY_RATE_LIMIT_MAX is out of range"))?,
            None => DEFAULT_MAX_REQUESTS,
        };
        let window = match parse_optional_u64("RELAY_RATE_LIMIT_WINDOW_SECS")? {
            Some(0) => {
                return Err(anyhow!(
                    "RELAY_RATE_LIMIT_WINDOW_SECS must be greater than zero"
                ))
            }
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_WINDOW,
        };
        let sweep_interval = parse_optional_u64("RELAY_RATE_LIMIT_SWEEP_SECS")?
            .filter(|s| *s > 0)
            .map(Duration::from_secs);

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            webhook_url,
            upstream_timeout,
            rate_limit: RateLimitConfig {
                max_requests,
                window,
                sweep_interval,
            },
            max_request_bytes: parse_optional_u64("RELAY_MAX_REQUEST_BYTES")?
                .map(|v| v as usize),
            log_file: env::var("LOG_FILE").ok().filter(|s| !s.trim().is_empty()),
            rotation,
            log_stdout: parse_bool_env("RELAY_LOG_STDOUT")?.unwrap_or(false),
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
