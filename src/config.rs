// Application configuration loaded from the environment
// Read once at start-up and passed by value into the components that need it

use std::time::Duration;

/// Configuration errors surfaced at start-up
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Where accounts and tokens are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Process-local stores, for development and tests only
    Memory,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub storage: StorageBackend,
    pub jwt_secret: String,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    pub bcrypt_cost: u32,
    pub rate_limit: RateLimitConfig,
    pub store_timeout: Duration,
    pub app_base_url: String,
    pub allowed_origins: Vec<String>,
}

impl AppConfig {
    /// Build the configuration from environment variables
    ///
    /// `JWT_SECRET` is required. `DATABASE_URL` and `REDIS_URL` are required
    /// unless `STORAGE_BACKEND=memory`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] but reading from an arbitrary source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let storage = match get("STORAGE_BACKEND").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let database_url = get("DATABASE_URL");
        let redis_url = get("REDIS_URL");
        if storage == StorageBackend::Postgres {
            if database_url.is_none() {
                return Err(ConfigError::Missing("DATABASE_URL"));
            }
            if redis_url.is_none() {
                return Err(ConfigError::Missing("REDIS_URL"));
            }
        }

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;

        let bcrypt_cost = parse_or(&get, "BCRYPT_COST", 10u32)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
            });
        }

        let max_requests = parse_or(&get, "RATE_LIMIT_MAX_REQUESTS", 10u64)?;
        let window_secs = parse_or(&get, "RATE_LIMIT_WINDOW_SECS", 60u64)?;
        if max_requests == 0 || window_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "RATE_LIMIT_*",
                value: format!("{}/{}s", max_requests, window_secs),
            });
        }

        let allowed_origins = get("ALLOWED_ORIGINS")
            .unwrap_or_else(|| "http://localhost:3000".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 8080u16)?,
            database_url,
            redis_url,
            storage,
            jwt_secret,
            access_token_ttl: chrono::Duration::seconds(parse_or(&get, "ACCESS_TOKEN_TTL_SECS", 3600i64)?),
            refresh_token_ttl: chrono::Duration::seconds(parse_or(
                &get,
                "REFRESH_TOKEN_TTL_SECS",
                30 * 24 * 3600i64,
            )?),
            bcrypt_cost,
            rate_limit: RateLimitConfig {
                max_requests,
                window: Duration::from_secs(window_secs),
            },
            store_timeout: Duration::from_millis(parse_or(&get, "STORE_TIMEOUT_MS", 3000u64)?),
            app_base_url: get("APP_BASE_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
            allowed_origins,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}
