//! Process configuration
//!
//! [`AppConfig`] is built once at startup and injected into the composition
//! root; nothing reads the environment after that. Loading order:
//!
//! 1. `.env` (development only, via `dotenvy`)
//! 2. the optional layered file `config/toq.{toml,yaml}` for identity,
//!    worker and policy tunables
//! 3. environment variables, which win over the file
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` (required), `DATABASE_MAX_CONNECTIONS`, ...
//! - `REDIS_URL`
//! - `JWT_SECRET` (required, at least 32 bytes), `JWT_ACCESS_TTL_SECS`,
//!   `JWT_REFRESH_TTL_SECS`
//! - `STORAGE_*`, `NOTIFICATION_*`, `IDENTITY_PROVIDER_*`
//! - `TOQ_CONFIG_FILE`: alternative path of the layered file
//! - `TRANSITION_RULES_PATH`: rules YAML; the compiled-in set is used when
//!   unset
//!
//! # Example
//!
//! ```no_run
//! use toq_shared::config::AppConfig;
//!
//! # fn example() -> Result<(), toq_shared::config::ConfigError> {
//! let config = AppConfig::load()?;
//! println!("temp block lasts {} minutes", config.identity.temp_block_minutes);
//! # Ok(())
//! # }
//! ```

use chrono::Duration;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

use crate::auth::jwt::JwtConfig;
use crate::auth::password::HashParams;
use crate::db::pool::DatabaseConfig;
use crate::notification::NotificationConfig;
use crate::policy::{RuleSource, YamlFileSource, YamlStrSource};
use crate::redis::RedisConfig;
use crate::storage::StorageConfig;
use crate::verification::VerificationConfig;

const DEFAULT_CONFIG_FILE: &str = "config/toq";

/// Minimum JWT secret length in bytes
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to load config file: {0}")]
    File(String),
}

/// Identity-service tunables
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Failed signins that trigger a temporary block
    pub max_wrong_signin_attempts: i32,
    pub temp_block_minutes: i64,
    pub code_ttl_minutes: i64,
    /// Source of address defaults for system users
    pub template_user_id: i64,
    /// How far ahead photographer agendas are provisioned
    pub agenda_horizon_months: u32,
    /// Link embedded in locked-account and welcome emails
    pub reset_password_url: String,
    /// Length of the generated system-user password
    pub system_password_length: usize,
    #[serde(skip)]
    pub hash_params: HashParams,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            max_wrong_signin_attempts: 3,
            temp_block_minutes: 15,
            code_ttl_minutes: 15,
            template_user_id: 1,
            agenda_horizon_months: 3,
            reset_password_url: "https://app.toq.app/reset-password".to_string(),
            system_password_length: 16,
            hash_params: HashParams::default(),
        }
    }
}

impl IdentityConfig {
    pub fn temp_block_duration(&self) -> Duration {
        Duration::minutes(self.temp_block_minutes)
    }

    pub fn code_ttl(&self) -> Duration {
        Duration::minutes(self.code_ttl_minutes)
    }

    /// Defaults with cheap password hashing, for tests
    pub fn for_test() -> Self {
        Self {
            hash_params: HashParams::fast(),
            ..Self::default()
        }
    }
}

/// Reconciler schedule; intervals in seconds
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub temp_block_interval_secs: u64,
    pub device_token_interval_secs: u64,
    pub device_token_max_age_days: i64,
    pub session_interval_secs: u64,
    /// Grace period after `expired_at` before a session row is deleted
    pub session_max_age_secs: i64,
    pub validation_interval_secs: u64,
    pub media_job_interval_secs: u64,
    /// Jobs still pending/processing after this long are failed
    pub media_job_timeout_secs: i64,
    pub media_cleanup_interval_secs: u64,
    pub media_job_retention_days: i64,
    pub agenda_interval_secs: u64,
    /// Rows touched per batch by every reconciler
    pub batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            temp_block_interval_secs: 300,
            device_token_interval_secs: 3600,
            device_token_max_age_days: 90,
            session_interval_secs: 60,
            session_max_age_secs: 0,
            validation_interval_secs: 300,
            media_job_interval_secs: 300,
            media_job_timeout_secs: 1800,
            media_cleanup_interval_secs: 3600,
            media_job_retention_days: 30,
            agenda_interval_secs: 86_400,
            batch_size: 500,
        }
    }
}

/// Where transition rules come from
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub rules_path: Option<PathBuf>,
}

impl PolicyConfig {
    pub fn source(&self) -> Box<dyn RuleSource> {
        match &self.rules_path {
            Some(path) => Box::new(YamlFileSource::new(path.clone())),
            None => Box::new(YamlStrSource::builtin()),
        }
    }
}

/// Tunables read from the layered file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileLayer {
    identity: IdentityConfig,
    worker: WorkerConfig,
    policy: PolicyConfig,
}

/// Immutable process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub identity: IdentityConfig,
    pub storage: StorageConfig,
    pub notification: NotificationConfig,
    pub verification: VerificationConfig,
    pub worker: WorkerConfig,
    pub policy: PolicyConfig,
}

impl AppConfig {
    /// Loads `.env`, the layered file and the environment
    ///
    /// # Errors
    ///
    /// Fails on missing required variables, unparseable values or a JWT
    /// secret shorter than [`MIN_JWT_SECRET_LEN`].
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let file = env::var("TOQ_CONFIG_FILE").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let layer = load_file_layer(&file)?;

        let database = DatabaseConfig::from_env().map_err(|e| ConfigError::Invalid {
            name: "DATABASE_URL",
            reason: e.to_string(),
        })?;
        let redis = RedisConfig::from_env().map_err(|e| ConfigError::Invalid {
            name: "REDIS_URL",
            reason: e.to_string(),
        })?;

        let mut identity = layer.identity;
        if let Some(attempts) = parse_var::<i32>("MAX_WRONG_SIGNIN_ATTEMPTS")? {
            identity.max_wrong_signin_attempts = attempts;
        }
        if let Some(minutes) = parse_var::<i64>("TEMP_BLOCK_MINUTES")? {
            identity.temp_block_minutes = minutes;
        }
        if let Ok(url) = env::var("RESET_PASSWORD_URL") {
            identity.reset_password_url = url;
        }
        if identity.max_wrong_signin_attempts < 1 {
            return Err(ConfigError::Invalid {
                name: "max_wrong_signin_attempts",
                reason: "must be at least 1".to_string(),
            });
        }

        let mut policy = layer.policy;
        if let Ok(path) = env::var("TRANSITION_RULES_PATH") {
            policy.rules_path = Some(PathBuf::from(path));
        }

        Ok(Self {
            database,
            redis,
            jwt: jwt_from_env()?,
            identity,
            storage: StorageConfig::from_env(),
            notification: NotificationConfig::from_env(),
            verification: VerificationConfig::from_env(),
            worker: layer.worker,
            policy,
        })
    }
}

fn load_file_layer(path: &str) -> Result<FileLayer, ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .build()
        .map_err(|e| ConfigError::File(e.to_string()))?;

    settings
        .try_deserialize()
        .map_err(|e| ConfigError::File(e.to_string()))
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Invalid {
            name,
            reason: format!("'{}' is not a valid value", raw),
        }),
        Err(_) => Ok(None),
    }
}

/// Reads `JWT_SECRET`, `JWT_ACCESS_TTL_SECS` and `JWT_REFRESH_TTL_SECS`
pub fn jwt_from_env() -> Result<JwtConfig, ConfigError> {
    let secret = env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
    validate_jwt_secret(&secret)?;

    let mut config = JwtConfig::for_secret(secret);
    if let Some(secs) = parse_var::<i64>("JWT_ACCESS_TTL_SECS")? {
        config.access_ttl = Duration::seconds(secs);
    }
    if let Some(secs) = parse_var::<i64>("JWT_REFRESH_TTL_SECS")? {
        config.refresh_ttl = Duration::seconds(secs);
    }
    if config.access_ttl >= config.refresh_ttl {
        return Err(ConfigError::Invalid {
            name: "JWT_ACCESS_TTL_SECS",
            reason: "access TTL must be shorter than refresh TTL".to_string(),
        });
    }
    Ok(config)
}

pub fn validate_jwt_secret(secret: &str) -> Result<(), ConfigError> {
    if secret.len() < MIN_JWT_SECRET_LEN {
        return Err(ConfigError::Invalid {
            name: "JWT_SECRET",
            reason: format!("must be at least {} bytes", MIN_JWT_SECRET_LEN),
        });
    }
    Ok(())
}
