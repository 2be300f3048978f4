use crate::error::{AppError, Result};
use axum::http::HeaderValue;
use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub services: ServicesConfig,
    #[serde(default)]
    pub monitor: Option<MonitorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub listen_addr: String,
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
    #[serde(default = "default_strip_prefix")]
    pub strip_prefix: String,
    #[serde(default = "default_request_timeout", deserialize_with = "deserialize_u64")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_max_body_bytes", deserialize_with = "deserialize_u64")]
    pub max_body_bytes: u64,
}

fn default_allowed_origin() -> String {
    "*".to_string()
}

fn default_strip_prefix() -> String {
    "/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

fn default_max_body_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Custom deserializer that handles numbers written as either YAML numbers or strings
///
/// Accepts:
/// - `interval_minutes: 5` (number)
/// - `interval_minutes: "5"` (string that parses to number)
/// - `interval_minutes: ${REFRESH_MINUTES}` (env var substituted to either)
fn deserialize_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberValue {
        Number(u64),
        String(String),
    }

    match NumberValue::deserialize(deserializer)? {
        NumberValue::Number(n) => Ok(n),
        NumberValue::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom(format!("Invalid number: '{}'", s))),
    }
}

impl GatewayConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.listen_addr.parse::<SocketAddr>().map_err(|e| {
            AppError::Config(format!(
                "Invalid gateway listen_addr '{}': {}",
                self.listen_addr, e
            ))
        })
    }

    /// `strip_prefix` without a trailing slash; empty means forward the full path.
    pub fn normalized_strip_prefix(&self) -> String {
        self.strip_prefix.trim_end_matches('/').to_string()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServicesConfig {
    pub users_url: String,
    pub data_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    pub api_base_url: String,
    #[serde(default = "default_interval_minutes", deserialize_with = "deserialize_u64")]
    pub interval_minutes: u64,
    #[serde(default, deserialize_with = "deserialize_u64")]
    pub initial_delay_seconds: u64,
    #[serde(default = "default_client_timeout", deserialize_with = "deserialize_u64")]
    pub request_timeout_seconds: u64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_client_timeout() -> u64 {
    30
}

/// One week; longer refresh intervals are configuration mistakes.
pub const MAX_INTERVAL_MINUTES: u64 = 7 * 24 * 60;

impl MonitorConfig {
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.email.as_deref(), self.password.as_deref()) {
            (Some(email), Some(password)) => Some((email, password)),
            _ => None,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let expanded = expand_env_vars(content)?;

        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    ///
    /// Checks for:
    /// - Unexpanded environment variables
    /// - A parseable listen address
    /// - http(s) upstream URLs
    /// - A CORS origin usable as a header value
    /// - Non-zero timeouts, limits and intervals
    fn validate(&self) -> Result<()> {
        let fields_to_check = [
            ("USERS_SERVICE_URL", &self.services.users_url),
            ("DATA_SERVICE_URL", &self.services.data_url),
            ("GATEWAY_LISTEN_ADDR", &self.gateway.listen_addr),
            ("ALLOWED_ORIGIN", &self.gateway.allowed_origin),
        ];

        for (field_name, value) in &fields_to_check {
            if value.contains("${") {
                return Err(AppError::Config(format!(
                    "{} environment variable is not set. \
                     Please set it or create a .env file. \
                     See .env.example for required variables.",
                    field_name
                )));
            }
        }

        self.gateway.socket_addr()?;

        validate_service_url("users_url", &self.services.users_url)?;
        validate_service_url("data_url", &self.services.data_url)?;

        if self.gateway.allowed_origin.is_empty() {
            return Err(AppError::Config(
                "Gateway allowed_origin cannot be empty (use \"*\" to allow any origin)"
                    .to_string(),
            ));
        }

        if HeaderValue::from_str(&self.gateway.allowed_origin).is_err() {
            return Err(AppError::Config(format!(
                "Gateway allowed_origin '{}' is not a valid header value",
                self.gateway.allowed_origin
            )));
        }

        if !self.gateway.strip_prefix.is_empty() && !self.gateway.strip_prefix.starts_with('/') {
            return Err(AppError::Config(format!(
                "Gateway strip_prefix '{}' must start with '/'",
                self.gateway.strip_prefix
            )));
        }

        if self.gateway.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "Gateway request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.gateway.max_body_bytes == 0 {
            return Err(AppError::Config(
                "Gateway max_body_bytes must be greater than 0".to_string(),
            ));
        }

        if self.gateway.allowed_origin == "*" {
            tracing::warn!("CORS allows any origin; restrict allowed_origin outside development");
        }

        if let Some(monitor) = &self.monitor {
            if monitor.api_base_url.contains("${") {
                return Err(AppError::Config(
                    "Monitor api_base_url contains an unexpanded environment variable"
                        .to_string(),
                ));
            }

            validate_service_url("monitor.api_base_url", &monitor.api_base_url)?;

            if monitor.interval_minutes == 0 {
                return Err(AppError::Config(
                    "Monitor interval_minutes must be greater than 0".to_string(),
                ));
            }

            if monitor.interval_minutes > MAX_INTERVAL_MINUTES {
                return Err(AppError::Config(format!(
                    "Monitor interval_minutes must be at most {} (one week), got {}",
                    MAX_INTERVAL_MINUTES, monitor.interval_minutes
                )));
            }

            if monitor.request_timeout_seconds == 0 {
                return Err(AppError::Config(
                    "Monitor request_timeout_seconds must be greater than 0".to_string(),
                ));
            }

            if monitor.email.is_some() != monitor.password.is_some() {
                return Err(AppError::Config(
                    "Monitor email and password must be set together".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn validate_service_url(field: &str, value: &str) -> Result<()> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::Config(format!("Invalid {} '{}': {}", field, value, e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::Config(format!(
            "{} must use http or https, got: {}",
            field,
            parsed.scheme()
        )));
    }

    if parsed.query().is_some() {
        return Err(AppError::Config(format!(
            "{} must not carry a query string: {}",
            field, value
        )));
    }

    Ok(())
}

fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| AppError::Config(format!("Invalid substitution pattern: {}", e)))?;

    let mut missing_vars = Vec::new();

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => {
                result = result.replace(&cap[0], &value);
            }
            Err(_) => {
                missing_vars.push(var_name.to_string());
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(AppError::Config(format!(
            "Missing required environment variable{}: {}\n\n\
             To fix this:\n\
             1. Create a .env file in the project root (copy .env.example)\n\
             2. Set the missing variable{}: export {}=<value>\n\
             3. Or set {} in your environment before running",
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars.join(", "),
            if missing_vars.len() > 1 { "s" } else { "" },
            missing_vars[0],
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}
