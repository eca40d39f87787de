use crate::error::{GatewayError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use sqlx::postgres::PgConnectOptions;
use std::env;
use std::fmt;
use std::time::Duration;

/// Immutable process configuration, built once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
    pub startup_retry_interval_ms: u64,
    pub startup_max_attempts: u32,
}

#[derive(Clone, Deserialize)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub proxy_url: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_elapsed_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Settings {
    /// Load from `config/{CONFIG_ENV}`, `APP__*` variables and the flat
    /// deployment variables of the process environment.
    pub fn new() -> Result<Self> {
        Self::load(None)
    }

    /// Same layering as [`Settings::new`] but reading variables from `vars`
    /// instead of the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: config::Map<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::load(Some(vars))
    }

    fn load(vars: Option<config::Map<String, String>>) -> Result<Self> {
        let lookup = |key: &str| -> Option<String> {
            let value = match &vars {
                Some(vars) => vars.get(key).cloned(),
                None => env::var(key).ok(),
            };
            value.filter(|v| !v.trim().is_empty())
        };

        let config_env = lookup("CONFIG_ENV").unwrap_or_else(|| "default".to_string());
        let api_port = parse_port("API_PORT", lookup("API_PORT"))?;
        let db_port = parse_port("DB_PORT", lookup("DB_PORT"))?;

        let config = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?
            .set_default("database.user", "")?
            .set_default("database.password", "")?
            .set_default("database.host", "")?
            .set_default("database.port", 5432)?
            .set_default("database.name", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_ms", 5000)?
            .set_default("database.startup_retry_interval_ms", 2000)?
            .set_default("database.startup_max_attempts", 30)?
            .set_default("upstream.api_key", "")?
            .set_default("upstream.base_url", "https://api.openai.com/v1")?
            .set_default("upstream.model", "gpt-4o")?
            .set_default("upstream.temperature", 0.7)?
            .set_default("upstream.timeout_ms", 30_000)?
            .set_default("upstream.max_retries", 3)?
            .set_default("upstream.base_delay_ms", 500)?
            .set_default("upstream.max_delay_ms", 8000)?
            .set_default("upstream.max_elapsed_ms", 60_000)?
            .set_default("logging.level", "info")?
            .add_source(File::with_name(&format!("config/{}", config_env)).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .source(vars.clone()),
            )
            .set_override_option("upstream.api_key", lookup("OPEN_AI_API_KEY"))?
            .set_override_option("upstream.proxy_url", lookup("PROXY_URL"))?
            .set_override_option("server.port", api_port.map(i64::from))?
            .set_override_option("database.user", lookup("DB_USER"))?
            .set_override_option("database.password", lookup("DB_PASSWORD"))?
            .set_override_option("database.host", lookup("DB_HOST"))?
            .set_override_option("database.port", db_port.map(i64::from))?
            .set_override_option("database.name", lookup("DB_NAME"))?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.validate()
    }

    fn validate(mut self) -> Result<Self> {
        require("OPEN_AI_API_KEY", &self.upstream.api_key)?;
        require("DB_USER", &self.database.user)?;
        require("DB_PASSWORD", &self.database.password)?;
        require("DB_HOST", &self.database.host)?;
        require("DB_NAME", &self.database.name)?;

        // Blank optional values behave as if unset.
        self.upstream.proxy_url = self
            .upstream
            .proxy_url
            .take()
            .filter(|p| !p.trim().is_empty());
        self.upstream.system_prompt = self
            .upstream
            .system_prompt
            .take()
            .filter(|p| !p.trim().is_empty());

        if let Some(proxy) = &self.upstream.proxy_url {
            reqwest::Url::parse(proxy)
                .map_err(|e| GatewayError::Config(format!("PROXY_URL is not a valid URL: {}", e)))?;
        }
        reqwest::Url::parse(&self.upstream.base_url).map_err(|e| {
            GatewayError::Config(format!("upstream.base_url is not a valid URL: {}", e))
        })?;

        if self.upstream.timeout_ms == 0 {
            return Err(GatewayError::Config(
                "upstream.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(GatewayError::Config(
                "database.max_connections must be greater than zero".to_string(),
            ));
        }

        Ok(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn startup_retry_interval(&self) -> Duration {
        Duration::from_millis(self.startup_retry_interval_ms)
    }
}

impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "postgres://{}:***@{}:{}/{}",
            self.user, self.host, self.port, self.name
        )
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.to_string())
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .field("startup_retry_interval_ms", &self.startup_retry_interval_ms)
            .field("startup_max_attempts", &self.startup_max_attempts)
            .finish()
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

impl fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("api_key", &"***")
            .field("proxy_url", &self.proxy_url)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("system_prompt", &self.system_prompt.is_some())
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("max_elapsed_ms", &self.max_elapsed_ms)
            .finish()
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        GatewayError::Config(err.to_string())
    }
}

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::Config(format!(
            "{} environment variable not set",
            name
        )));
    }
    Ok(())
}

fn parse_port(name: &str, value: Option<String>) -> Result<Option<u16>> {
    value
        .map(|v| {
            v.trim()
                .parse::<u16>()
                .map_err(|_| GatewayError::Config(format!("{} is not a valid port: {}", name, v)))
        })
        .transpose()
}
