//! Configuration module for environment variable parsing.
//!
//! Configuration is read once at startup and passed to each component. All
//! lookups go through a caller-supplied function so tests never have to touch
//! the process environment.

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::queue::amqp::DEFAULT_AMQP_QUEUE;
use crate::queue::{ReceiveOptions, DEFAULT_EXCLUDED_HEADER_PREFIX};

/// Placeholder left in deployment templates when the secret was never filled in.
const SECRET_PLACEHOLDER: &str = "__GITHUB_WEBHOOK_SECRET__";

/// Header carrying the sender's HMAC signature.
pub const DEFAULT_SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be provided")]
    Missing(&'static str),
    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Which half of the relay this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Accept signed webhooks over HTTP and enqueue them.
    Ingress,
    /// Poll the queue and forward entries to the relay target.
    Relay,
}

/// Where queued envelopes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueBackend {
    Sqs {
        queue_url: String,
        region: String,
        endpoint_url: Option<String>,
    },
    Amqp {
        url: String,
        queue_name: String,
    },
}

impl QueueBackend {
    /// Whether receive honours a visibility window. RabbitMQ only redelivers
    /// unacked entries when the channel closes.
    pub fn has_visibility_window(&self) -> bool {
        matches!(self, QueueBackend::Sqs { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub backend: QueueBackend,
}

/// Settings for the webhook ingress server.
#[derive(Clone, PartialEq, Eq)]
pub struct IngressConfig {
    /// Shared secret for HMAC-SHA1 signatures
    pub webhook_secret: String,
    /// Header holding the claimed signature
    pub signature_header: String,
    /// Headers starting with this prefix are not queued
    pub excluded_header_prefix: String,
    /// Port for the web server to listen on
    pub port: u16,
}

// The secret must never end up in logs.
impl fmt::Debug for IngressConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IngressConfig")
            .field("webhook_secret", &"<redacted>")
            .field("signature_header", &self.signature_header)
            .field("excluded_header_prefix", &self.excluded_header_prefix)
            .field("port", &self.port)
            .finish()
    }
}

/// Settings for the queue consumer and relay client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Downstream automation server hook URL
    pub target_url: Url,
    /// Per-request relay timeout
    pub request_timeout: Duration,
    /// Batch size, long-poll wait and visibility window
    pub receive: ReceiveOptions,
    /// Sleep between batches
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeConfig {
    Ingress(IngressConfig),
    Relay(RelayConfig),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub queue: QueueConfig,
    pub mode: ModeConfig,
}

impl Config {
    /// Load configuration for `mode` from environment variables.
    pub fn from_env(mode: Mode) -> Result<Self, ConfigError> {
        Self::from_lookup(mode, |name| env::var(name).ok())
    }

    /// Load configuration for `mode`, resolving variables through `lookup`.
    ///
    /// Values are trimmed and empty values count as unset.
    pub fn from_lookup<F>(mode: Mode, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let queue = QueueConfig::load(&get)?;

        let mode = match mode {
            Mode::Ingress => ModeConfig::Ingress(IngressConfig::load(&get)?),
            Mode::Relay => ModeConfig::Relay(RelayConfig::load(&get)?),
        };

        Ok(Config { queue, mode })
    }
}

impl QueueConfig {
    fn load(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let queue_url = get("QUEUE_URL").ok_or(ConfigError::Missing("QUEUE_URL"))?;

        let backend = if queue_url.starts_with("amqp://") || queue_url.starts_with("amqps://") {
            QueueBackend::Amqp {
                url: queue_url,
                queue_name: get("AMQP_QUEUE").unwrap_or_else(|| DEFAULT_AMQP_QUEUE.to_string()),
            }
        } else {
            QueueBackend::Sqs {
                queue_url,
                region: get("AWS_REGION").ok_or(ConfigError::Missing("AWS_REGION"))?,
                endpoint_url: get("QUEUE_ENDPOINT_URL"),
            }
        };

        Ok(QueueConfig { backend })
    }
}

impl IngressConfig {
    fn load(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let webhook_secret = get("GITHUB_WEBHOOK_SECRET")
            .filter(|s| s != SECRET_PLACEHOLDER)
            .ok_or(ConfigError::Missing("GITHUB_WEBHOOK_SECRET"))?;

        Ok(IngressConfig {
            webhook_secret,
            signature_header: get("SIGNATURE_HEADER")
                .unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string()),
            // An explicitly empty prefix reads as unset; use a prefix that matches
            // nothing to keep every header.
            excluded_header_prefix: get("EXCLUDED_HEADER_PREFIX")
                .unwrap_or_else(|| DEFAULT_EXCLUDED_HEADER_PREFIX.to_string()),
            port: parse_or(get, "PORT", 8080)?,
        })
    }
}

impl RelayConfig {
    fn load(get: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_target =
            get("JENKINS_GITHUB_HOOK_URL").ok_or(ConfigError::Missing("JENKINS_GITHUB_HOOK_URL"))?;
        let target_url = parse_target_url(&raw_target)?;

        let max_messages: u32 = parse_or(get, "QUEUE_MAX_MESSAGES", 3)?;
        if !(1..=10).contains(&max_messages) {
            return Err(ConfigError::Invalid {
                name: "QUEUE_MAX_MESSAGES",
                reason: format!("{max_messages} is outside 1..=10"),
            });
        }

        let wait_secs: u64 = parse_or(get, "QUEUE_WAIT_TIME_SECS", 20)?;
        if wait_secs > 20 {
            return Err(ConfigError::Invalid {
                name: "QUEUE_WAIT_TIME_SECS",
                reason: format!("{wait_secs} is above the 20 second maximum"),
            });
        }

        Ok(RelayConfig {
            target_url,
            request_timeout: Duration::from_millis(parse_or(get, "RELAY_TIMEOUT_MS", 5000)?),
            receive: ReceiveOptions {
                max_messages,
                wait_time: Duration::from_secs(wait_secs),
                visibility_timeout: Duration::from_secs(parse_or(
                    get,
                    "QUEUE_VISIBILITY_TIMEOUT_SECS",
                    1,
                )?),
            },
            poll_interval: Duration::from_millis(parse_or(get, "POLL_INTERVAL_MS", 5000)?),
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T>(
    get: &dyn Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: format!("{raw:?}: {e}"),
        }),
    }
}

fn parse_target_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name: "JENKINS_GITHUB_HOOK_URL",
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid {
            name: "JENKINS_GITHUB_HOOK_URL",
            reason: format!("unsupported scheme {other}"),
        }),
    }
}
