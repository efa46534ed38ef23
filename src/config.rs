//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use bigdecimal::BigDecimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitBreakerConfig;
use crate::resilience::retry::RetryConfig;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Run against the in-memory store and rate limiter
    pub skip_externals: bool,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
    pub gateway: GatewayConfig,
    pub vending: VendingConfig,
    pub wallet: WalletConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub monitor: MonitorConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64, // seconds
    pub idle_timeout: u64,       // seconds
    pub run_migrations: bool,
}

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Payment gateway (Flutterwave) configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub secret_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Vending provider configuration
#[derive(Debug, Clone)]
pub struct VendingConfig {
    pub endpoint_url: String,
    pub api_token: String,
    pub provider_name: String,
    /// Hard limit on a single attempt
    pub attempt_timeout: Duration,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
}

/// Agent wallet configuration
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub cashback_rate: BigDecimal,
    /// JSON file with the data plan catalog; built-in plans when unset
    pub plans_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub backend: RateLimitBackend,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Shared secret echoed by the gateway in `verif-hash`
    pub webhook_secret: String,
    pub admin_api_key: String,
}

/// Scheduled reconciliation settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub lookback: Duration,
    pub batch_size: i64,
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals: bool = parse_env("SKIP_EXTERNALS", "false")?;

        Ok(AppConfig {
            skip_externals,
            server: ServerConfig::from_env()?,
            database: if skip_externals {
                DatabaseConfig::default()
            } else {
                DatabaseConfig::from_env()?
            },
            cache: CacheConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            vending: VendingConfig::from_env()?,
            wallet: WalletConfig::from_env()?,
            rate_limit: RateLimitConfig::from_env(skip_externals)?,
            security: SecurityConfig::from_env()?,
            monitor: MonitorConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if !self.skip_externals {
            self.database.validate()?;
        }
        if self.rate_limit.backend == RateLimitBackend::Redis {
            self.cache.validate()?;
        }
        self.logging.validate()?;
        self.gateway.validate()?;
        self.vending.validate()?;
        self.wallet.validate()?;
        self.security.validate()?;
        self.monitor.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: parse_env("SERVER_PORT", "8000")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout: 30,
            idle_timeout: 600,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: require_env("DATABASE_URL")?,
            max_connections: parse_env("DB_MAX_CONNECTIONS", "20")?,
            min_connections: parse_env("DB_MIN_CONNECTIONS", "2")?,
            connection_timeout: parse_env("DB_CONNECTION_TIMEOUT", "30")?,
            idle_timeout: parse_env("DB_IDLE_TIMEOUT", "600")?,
            run_migrations: parse_env("DB_RUN_MIGRATIONS", "true")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl CacheConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(CacheConfig {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            max_connections: parse_env("CACHE_MAX_CONNECTIONS", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.redis_url.starts_with("redis://") && !self.redis_url.starts_with("rediss://") {
            return Err(ConfigError::InvalidValue(
                "REDIS_URL must start with redis:// or rediss://".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            secret_key: env::var("FLUTTERWAVE_SECRET_KEY").unwrap_or_default(),
            base_url: env::var("FLUTTERWAVE_BASE_URL")
                .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
            timeout_secs: parse_env("FLUTTERWAVE_TIMEOUT_SECS", "30")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "FLUTTERWAVE_BASE_URL must be a valid URL".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "FLUTTERWAVE_TIMEOUT_SECS".to_string(),
            ));
        }
        Ok(())
    }
}

impl VendingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let retry = RetryConfig {
            max_retries: parse_env("VENDING_MAX_RETRIES", "3")?,
            initial_delay: Duration::from_millis(parse_env(
                "VENDING_RETRY_INITIAL_DELAY_MS",
                "1000",
            )?),
            multiplier: parse_env("VENDING_RETRY_MULTIPLIER", "2.0")?,
            max_delay: Duration::from_millis(parse_env("VENDING_RETRY_MAX_DELAY_MS", "10000")?),
        };
        let breaker = CircuitBreakerConfig {
            failure_threshold: parse_env("VENDING_BREAKER_FAILURE_THRESHOLD", "5")?,
            open_timeout: Duration::from_secs(parse_env(
                "VENDING_BREAKER_OPEN_TIMEOUT_SECS",
                "30",
            )?),
            half_open_max_calls: parse_env("VENDING_BREAKER_HALF_OPEN_MAX_CALLS", "1")?,
            success_threshold: parse_env("VENDING_BREAKER_SUCCESS_THRESHOLD", "1")?,
        };

        Ok(VendingConfig {
            endpoint_url: env::var("VENDING_ENDPOINT_URL").unwrap_or_default(),
            api_token: env::var("VENDING_API_TOKEN").unwrap_or_default(),
            provider_name: env::var("VENDING_PROVIDER_NAME")
                .unwrap_or_else(|_| "data_vendor".to_string()),
            attempt_timeout: Duration::from_secs(parse_env("VENDING_TIMEOUT_SECS", "60")?),
            retry,
            breaker,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.endpoint_url.is_empty()
            && !self.endpoint_url.starts_with("http://")
            && !self.endpoint_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "VENDING_ENDPOINT_URL must be a valid URL".to_string(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("VENDING_TIMEOUT_SECS".to_string()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationFailed(
                "VENDING_RETRY_MULTIPLIER must be >= 1.0".to_string(),
            ));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.half_open_max_calls == 0 {
            return Err(ConfigError::ValidationFailed(
                "circuit breaker thresholds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl WalletConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(WalletConfig {
            cashback_rate: parse_env("CASHBACK_RATE", "0.02")?,
            plans_file: env::var("DATA_PLANS_FILE").ok().filter(|v| !v.is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cashback_rate < BigDecimal::from(0) || self.cashback_rate >= BigDecimal::from(1) {
            return Err(ConfigError::ValidationFailed(
                "CASHBACK_RATE must be in [0, 1)".to_string(),
            ));
        }
        Ok(())
    }
}

impl RateLimitConfig {
    pub fn from_env(skip_externals: bool) -> Result<Self, ConfigError> {
        let default_backend = if skip_externals || !cfg!(feature = "cache") {
            "memory"
        } else {
            "redis"
        };
        let backend = match env::var("RATE_LIMIT_BACKEND")
            .unwrap_or_else(|_| default_backend.to_string())
            .to_lowercase()
            .as_str()
        {
            "redis" => RateLimitBackend::Redis,
            "memory" => RateLimitBackend::Memory,
            _ => return Err(ConfigError::InvalidValue("RATE_LIMIT_BACKEND".to_string())),
        };

        Ok(RateLimitConfig {
            enabled: parse_env("RATE_LIMIT_ENABLED", "true")?,
            backend,
        })
    }
}

impl SecurityConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(SecurityConfig {
            webhook_secret: env::var("FLUTTERWAVE_WEBHOOK_SECRET")
                .or_else(|_| env::var("FLUTTERWAVE_WEBHOOK_HASH"))
                .unwrap_or_default(),
            admin_api_key: env::var("ADMIN_API_KEY").unwrap_or_default(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_secret.trim().is_empty() {
            return Err(ConfigError::MissingVariable(
                "FLUTTERWAVE_WEBHOOK_SECRET".to_string(),
            ));
        }
        if self.admin_api_key.trim().len() < 16 {
            return Err(ConfigError::ValidationFailed(
                "ADMIN_API_KEY must be at least 16 characters".to_string(),
            ));
        }
        Ok(())
    }
}

impl MonitorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(MonitorConfig {
            enabled: parse_env("PAYMENT_MONITOR_ENABLED", "true")?,
            interval: Duration::from_secs(parse_env("PAYMENT_MONITOR_INTERVAL_SECONDS", "60")?),
            lookback: Duration::from_secs(
                parse_env::<u64>("PAYMENT_MONITOR_LOOKBACK_HOURS", "24")? * 3600,
            ),
            batch_size: parse_env("PAYMENT_MONITOR_BATCH_SIZE", "50")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_MONITOR_INTERVAL_SECONDS".to_string(),
            ));
        }
        if self.batch_size <= 0 {
            return Err(ConfigError::InvalidValue(
                "PAYMENT_MONITOR_BATCH_SIZE".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

impl From<ConfigError> for crate::error::AppError {
    fn from(err: ConfigError) -> Self {
        crate::error::AppError::configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_admin_key_rejected() {
        let config = SecurityConfig {
            webhook_secret: "hash_123".to_string(),
            admin_api_key: "short".to_string(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cashback_rate_bounds() {
        let config = WalletConfig {
            cashback_rate: BigDecimal::from_str("0.02").unwrap(),
            plans_file: None,
        };
        assert!(config.validate().is_ok());

        let config = WalletConfig {
            cashback_rate: BigDecimal::from(1),
            plans_file: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vending_defaults_match_resilience_defaults() {
        let config = VendingConfig {
            endpoint_url: "https://vendor.example/api/data/".to_string(),
            api_token: "token".to_string(),
            provider_name: "data_vendor".to_string(),
            attempt_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.breaker.failure_threshold, 5);
    }
}
