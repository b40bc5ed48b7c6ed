/// HTTP server configuration
///
/// Only the settings of the HTTP surface live here; everything the identity
/// core needs comes from `toq_shared::config::AppConfig`.
///
/// # Environment Variables
///
/// - `API_HOST`: Host to bind to (default: 0.0.0.0)
/// - `API_PORT`: Port to bind to (default: 8080)
/// - `API_CORS_ORIGINS`: Comma-separated origins, `*` for permissive (default: *)
/// - `MEDIA_CALLBACK_SECRET`: Shared secret of the media-processing callback;
///   when unset, callbacks are accepted unsigned
/// - `RUN_MIGRATIONS`: Apply pending migrations on startup (default: true)
///
/// # Example
///
/// ```no_run
/// use toq_api::config::ApiConfig;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = ApiConfig::from_env()?;
/// println!("Server will listen on {}", config.bind_address());
/// # Ok(())
/// # }
/// ```

use std::env;

/// HTTP surface settings
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,

    /// HMAC secret verifying `X-Toq-Signature` on media callbacks
    pub media_callback_secret: Option<String>,

    pub run_migrations: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            media_callback_secret: None,
            run_migrations: true,
        }
    }
}

impl ApiConfig {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let host = env::var("API_HOST").unwrap_or(defaults.host);
        let port = match env::var("API_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| anyhow::anyhow!("API_PORT is not a valid port: {}", e))?,
            Err(_) => defaults.port,
        };

        let cors_origins = env::var("API_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or(defaults.cors_origins);

        let media_callback_secret = env::var("MEDIA_CALLBACK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let run_migrations = match env::var("RUN_MIGRATIONS") {
            Ok(raw) => raw
                .parse::<bool>()
                .map_err(|e| anyhow::anyhow!("RUN_MIGRATIONS must be true or false: {}", e))?,
            Err(_) => defaults.run_migrations,
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            media_callback_secret,
            run_migrations,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn permissive_cors(&self) -> bool {
        self.cors_origins.iter().any(|o| o == "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_address() {
        let config = ApiConfig {
            host: "127.0.0.1".to_string(),
            ..ApiConfig::default()
        };
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert!(config.permissive_cors());
    }

    #[test]
    fn test_explicit_origins_are_not_permissive() {
        let config = ApiConfig {
            cors_origins: vec!["https://app.toq.app".to_string()],
            ..ApiConfig::default()
        };
        assert!(!config.permissive_cors());
    }
}
