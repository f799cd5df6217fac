use crate::models::TicketPolicy;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for any configured ticket lifetime (ten years).
const MAX_TICKET_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct SsoConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// Appended to ticket ids so tickets from different nodes never collide.
    pub node_id: Option<String>,
    pub tickets: TicketConfig,
    pub registry: RegistryConfig,
    pub logout: LogoutConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TicketConfig {
    pub tgt_ttl_seconds: i64,
    pub tgt_hard_limit_seconds: Option<i64>,
    pub st_ttl_seconds: i64,
    pub st_max_uses: u32,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            tgt_ttl_seconds: 7200,
            tgt_hard_limit_seconds: Some(28800),
            st_ttl_seconds: 300,
            st_max_uses: 1,
        }
    }
}

impl TicketConfig {
    pub fn ticket_granting_policy(&self) -> TicketPolicy {
        TicketPolicy::ticket_granting(self.tgt_ttl_seconds, self.tgt_hard_limit_seconds)
    }

    pub fn service_policy(&self) -> TicketPolicy {
        TicketPolicy::service(self.st_ttl_seconds, self.st_max_uses)
    }

    /// Longest a session can live; used as the store TTL for session records.
    pub fn session_lifetime_seconds(&self) -> i64 {
        self.tgt_hard_limit_seconds
            .unwrap_or(self.tgt_ttl_seconds)
            .max(self.tgt_ttl_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    pub sweep_interval_seconds: u64,
    pub max_issue_attempts: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 30,
            max_issue_attempts: 5,
        }
    }
}

impl RegistryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogoutConfig {
    pub enabled: bool,
    pub notification_timeout_ms: u64,
    pub max_concurrency: usize,
}

impl Default for LogoutConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            notification_timeout_ms: 3000,
            max_concurrency: 8,
        }
    }
}

impl LogoutConfig {
    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: Option<String>,
}

impl SsoConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;
        let tickets = TicketConfig::default();
        let registry = RegistryConfig::default();
        let logout = LogoutConfig::default();

        let config = SsoConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("sso-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            node_id: env::var("SSO_NODE_ID").ok().filter(|s| !s.is_empty()),
            tickets: TicketConfig {
                tgt_ttl_seconds: get_parsed("TGT_TTL_SECONDS", tickets.tgt_ttl_seconds, is_prod)?,
                tgt_hard_limit_seconds: match env::var("TGT_HARD_LIMIT_SECONDS") {
                    Ok(v) if v.eq_ignore_ascii_case("none") => None,
                    Ok(v) => Some(parse_value("TGT_HARD_LIMIT_SECONDS", &v)?),
                    Err(_) => tickets.tgt_hard_limit_seconds,
                },
                st_ttl_seconds: get_parsed("ST_TTL_SECONDS", tickets.st_ttl_seconds, is_prod)?,
                st_max_uses: get_parsed("ST_MAX_USES", tickets.st_max_uses, is_prod)?,
            },
            registry: RegistryConfig {
                sweep_interval_seconds: get_parsed(
                    "REGISTRY_SWEEP_INTERVAL_SECONDS",
                    registry.sweep_interval_seconds,
                    is_prod,
                )?,
                max_issue_attempts: get_parsed(
                    "REGISTRY_MAX_ISSUE_ATTEMPTS",
                    registry.max_issue_attempts,
                    is_prod,
                )?,
            },
            logout: LogoutConfig {
                enabled: get_parsed("LOGOUT_ENABLED", logout.enabled, is_prod)?,
                notification_timeout_ms: get_parsed(
                    "LOGOUT_NOTIFICATION_TIMEOUT_MS",
                    logout.notification_timeout_ms,
                    is_prod,
                )?,
                max_concurrency: get_parsed(
                    "LOGOUT_MAX_CONCURRENCY",
                    logout.max_concurrency,
                    is_prod,
                )?,
            },
            store: StoreConfig {
                backend: get_env("STORE_BACKEND", Some("memory"), is_prod)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
                redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(config_error("PORT must be greater than 0"));
        }

        if self.tickets.tgt_ttl_seconds <= 0 || self.tickets.st_ttl_seconds <= 0 {
            return Err(config_error("Ticket TTLs must be positive"));
        }

        let lifetimes = [
            Some(self.tickets.tgt_ttl_seconds),
            self.tickets.tgt_hard_limit_seconds,
            Some(self.tickets.st_ttl_seconds),
        ];
        if lifetimes
            .into_iter()
            .flatten()
            .any(|seconds| seconds > MAX_TICKET_LIFETIME_SECONDS)
        {
            return Err(config_error(
                "Ticket TTLs and TGT_HARD_LIMIT_SECONDS must not exceed ten years",
            ));
        }

        if let Some(limit) = self.tickets.tgt_hard_limit_seconds {
            if limit < self.tickets.tgt_ttl_seconds {
                return Err(config_error(
                    "TGT_HARD_LIMIT_SECONDS must not be shorter than TGT_TTL_SECONDS",
                ));
            }
        }

        if self.tickets.st_max_uses == 0 {
            return Err(config_error("ST_MAX_USES must be at least 1"));
        }

        if self.registry.sweep_interval_seconds == 0 || self.registry.max_issue_attempts == 0 {
            return Err(config_error(
                "REGISTRY_SWEEP_INTERVAL_SECONDS and REGISTRY_MAX_ISSUE_ATTEMPTS must be positive",
            ));
        }

        if self.logout.notification_timeout_ms == 0 || self.logout.max_concurrency == 0 {
            return Err(config_error(
                "LOGOUT_NOTIFICATION_TIMEOUT_MS and LOGOUT_MAX_CONCURRENCY must be positive",
            ));
        }

        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_none() {
            return Err(config_error("REDIS_URL is required when STORE_BACKEND=redis"));
        }

        if self.environment == Environment::Prod {
            if self.store.backend == StoreBackend::Memory {
                tracing::warn!("In-memory store in production - sessions will not survive restarts");
            }
            if self.node_id.is_none() {
                tracing::warn!("SSO_NODE_ID not set - ticket ids carry no node suffix");
            }
        }

        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod && default.is_none() {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_parsed<T>(key: &str, default: T, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr + ToString,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(&default.to_string()), is_prod)?;
    parse_value(key, &raw)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!(format!("Invalid {}: {}", key, e)))
    })
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}
