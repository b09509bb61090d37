// ABOUTME: Server configuration read from the environment (and a .env file)
// ABOUTME: Every value has a default; malformed values fail startup with ConfigError

use std::env;
use std::num::ParseIntError;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use devbox_sandbox::SandboxSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid compute backend: {0} (expected 'docker' or 'http')")]
    InvalidBackend(String),
    #[error("DEVBOX_BACKEND_URL is required when DEVBOX_BACKEND=http")]
    MissingBackendUrl,
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackendKind {
    Docker,
    Http,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(BackendKind::Docker),
            "http" => Ok(BackendKind::Http),
            _ => Err(ConfigError::InvalidBackend(s.to_string())),
        }
    }
}

#[derive(Debug)]
pub struct Config {
    pub port: u16,
    pub host: String,
    /// `None` uses `~/.devbox/devbox.db`
    pub database_url: Option<String>,
    pub cors_origin: String,
    pub backend: BackendKind,
    pub backend_url: Option<String>,
    pub backend_token: Option<String>,
    /// Host name placed in Docker sandbox URLs
    pub public_host: String,
    pub max_vcpus: u32,
    pub provision_timeout: Duration,
    pub command_timeout: Duration,
    /// `None` disables the reaper
    pub retention: Option<Duration>,
    pub reaper_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str = env::var("SERVER_PORT").unwrap_or_else(|_| "2022".to_string());

        let port = port_str.parse::<u16>()?;

        // Validate port is in valid range
        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let host = env::var("DEVBOX_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let database_url = non_empty_var("DEVBOX_DATABASE_URL");

        let cors_origin =
            env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        let backend = env::var("DEVBOX_BACKEND")
            .unwrap_or_else(|_| "docker".to_string())
            .parse::<BackendKind>()?;

        let backend_url = non_empty_var("DEVBOX_BACKEND_URL");
        if backend == BackendKind::Http && backend_url.is_none() {
            return Err(ConfigError::MissingBackendUrl);
        }
        let backend_token = non_empty_var("DEVBOX_BACKEND_TOKEN");

        let public_host = env::var("DEVBOX_PUBLIC_HOST").unwrap_or_else(|_| "localhost".to_string());

        let defaults = SandboxSettings::default();

        let max_vcpus = parse_var("DEVBOX_MAX_VCPUS", defaults.max_vcpus)?;
        if max_vcpus == 0 {
            return Err(ConfigError::InvalidValue {
                name: "DEVBOX_MAX_VCPUS",
                value: "0".to_string(),
            });
        }

        let provision_timeout = Duration::from_secs(parse_var(
            "DEVBOX_PROVISION_TIMEOUT_SECS",
            defaults.provision_timeout.as_secs(),
        )?);
        let command_timeout = Duration::from_secs(parse_var(
            "DEVBOX_COMMAND_TIMEOUT_SECS",
            defaults.command_timeout.as_secs(),
        )?);

        // Zero keeps terminal sandboxes forever
        let retention_hours: u64 = parse_var("DEVBOX_RETENTION_HOURS", 0)?;
        let retention = (retention_hours > 0)
            .then(|| Duration::from_secs(retention_hours.saturating_mul(3600)));

        let reaper_interval = Duration::from_secs(parse_var(
            "DEVBOX_REAPER_INTERVAL_SECS",
            defaults.reaper_interval.as_secs(),
        )?);
        if reaper_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "DEVBOX_REAPER_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Config {
            port,
            host,
            database_url,
            cors_origin,
            backend,
            backend_url,
            backend_token,
            public_host,
            max_vcpus,
            provision_timeout,
            command_timeout,
            retention,
            reaper_interval,
        })
    }

    pub fn sandbox_settings(&self) -> SandboxSettings {
        SandboxSettings {
            max_vcpus: self.max_vcpus,
            provision_timeout: self.provision_timeout,
            command_timeout: self.command_timeout,
            retention: self.retention,
            reaper_interval: self.reaper_interval,
            ..SandboxSettings::default()
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty_var(name) {
        Some(value) => value
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}
