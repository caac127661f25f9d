//! Flat environment-variable configuration, double-underscore-nested per
//! spec.md §6: `S3__*`, `SENDGRID__*`, `COMPACTION__*`.

mod error;

use std::env;
use std::time::Duration;

pub use error::ConfigError;

#[derive(Debug, Clone)]
pub struct ObjectStoreSettings {
    pub access_key: String,
    pub secret_key: String,
    pub service_url: url::Url,
    pub region: String,
    pub bucket_name: String,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// PEM or base64 SPKI. Empty/unset means verification is disabled.
    pub verification_key: Option<String>,
    pub allowed_skew: Duration,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct CompactionSettings {
    pub max_batch_size_bytes: u64,
    pub periodic_run_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub object_store: ObjectStoreSettings,
    pub webhook: WebhookSettings,
    pub compaction: CompactionSettings,
}

const DEFAULT_ALLOWED_SKEW: Duration = Duration::from_secs(5 * 60);
const DEFAULT_MAX_BODY_BYTES: usize = 1_048_576;
const DEFAULT_MAX_BATCH_SIZE_BYTES: u64 = 512 * 1024 * 1024;

impl Config {
    /// Load every setting from the process environment. Missing required
    /// credentials are a fatal [`ConfigError`] (spec.md §6).
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            object_store: ObjectStoreSettings {
                access_key: required("S3__ACCESSKEY")?,
                secret_key: required("S3__SECRETKEY")?,
                service_url: required_url("S3__SERVICEURL")?,
                region: required("S3__REGION")?,
                bucket_name: required("S3__BUCKETNAME")?,
            },
            webhook: WebhookSettings {
                verification_key: optional("SENDGRID__VERIFICATIONKEY").filter(|s| !s.is_empty()),
                allowed_skew: optional_duration("SENDGRID__ALLOWEDSKEW", DEFAULT_ALLOWED_SKEW)?,
                max_body_bytes: optional_parsed("SENDGRID__MAXBODYBYTES", DEFAULT_MAX_BODY_BYTES)?,
            },
            compaction: CompactionSettings {
                max_batch_size_bytes: optional_parsed("COMPACTION__MAXBATCHSIZEBYTES", DEFAULT_MAX_BATCH_SIZE_BYTES)?,
                periodic_run_enabled: optional_bool("COMPACTION__PERIODICRUNENABLED", false)?,
            },
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing { name })
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok()
}

fn required_url(name: &'static str) -> Result<url::Url, ConfigError> {
    let raw = required(name)?;
    url::Url::parse(&raw).map_err(|_| ConfigError::Invalid { name, value: raw, expected: "URL" })
}

fn optional_duration(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => humantime::parse_duration(&raw)
            .map_err(|_| ConfigError::Invalid { name, value: raw, expected: "duration" }),
    }
}

fn optional_parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid { name, value: raw, expected: "integer" }),
    }
}

fn optional_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value: raw, expected: "boolean" }),
        },
    }
}
