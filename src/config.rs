use crate::error::{Error, Result};
use log::{info, warn};
use std::{env, fmt::Display, path::PathBuf, str::FromStr};

pub struct Config {
    pub host: String,
    pub port: u16,
    /// Without a path the database lives in a temporary directory.
    pub db_path: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            host: try_load("FILMORATE_HOST", "127.0.0.1")?,
            port: try_load("FILMORATE_PORT", "8080")?,
            db_path: env::var_os("FILMORATE_DB_PATH").map(PathBuf::from),
        })
    }

    pub fn bind_address(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{} not set, using default: {}", key, default);
        default.to_string()
    });
    raw.parse().map_err(|e| {
        warn!("Invalid {} value: {}", key, e);
        Error::Config(format!("{}={:?}: {}", key, raw, e))
    })
}
