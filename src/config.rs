use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3030";
pub const DEFAULT_TICK_MICROS: u64 = 1000;
pub const DEFAULT_MAX_MACHINES: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for env var {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Period of the run loop; one instruction executes per tick.
    pub tick_interval: Duration,
    pub max_machines: usize,
    /// Raw image loaded into a machine created at startup.
    pub boot_program: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let bind_addr = parse_var(&lookup, "ALTAIR_BIND_ADDR")?.unwrap_or(defaults.bind_addr);
        let tick_micros: u64 = parse_var(&lookup, "ALTAIR_TICK_MICROS")?.unwrap_or(DEFAULT_TICK_MICROS);
        let max_machines: usize = parse_var(&lookup, "ALTAIR_MAX_MACHINES")?.unwrap_or(DEFAULT_MAX_MACHINES);

        if tick_micros == 0 {
            return Err(positive("ALTAIR_TICK_MICROS", tick_micros));
        }
        if max_machines == 0 {
            return Err(positive("ALTAIR_MAX_MACHINES", max_machines));
        }

        let boot_program = lookup("ALTAIR_BOOT_PROGRAM")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bind_addr,
            tick_interval: Duration::from_micros(tick_micros),
            max_machines,
            boot_program,
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
            tick_interval: Duration::from_micros(DEFAULT_TICK_MICROS),
            max_machines: DEFAULT_MAX_MACHINES,
            boot_program: None,
        }
    }
}

// Blank or unset variables yield `None`.
fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        _ => Ok(None),
    }
}

fn positive(var: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: "must be greater than zero".to_string(),
    }
}
