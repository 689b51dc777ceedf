use std::{env, fmt::Display, path::PathBuf, str::FromStr};

use log::{info, LevelFilter};

use super::err::CustomError;

pub struct Config {
    pub port: u16,
    pub database: PathBuf,
    pub log_level: LevelFilter,
}

impl Config {
    /// read `.env` (if any) and then the process environment
    pub fn load() -> Result<Self, CustomError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, CustomError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            port: try_load(&lookup, "MARKS_PORT", "5656")?,
            database: try_load(&lookup, "MARKS_DATABASE", "data/marks.db")?,
            log_level: try_load(&lookup, "MARKS_LOG_LEVEL", "info")?,
        })
    }
}

fn try_load<T, F>(lookup: &F, key: &str, default: &str) -> Result<T, CustomError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.trim()
        .parse()
        .map_err(|e| CustomError::Internal(format!("Invalid {key} value {raw:?}: {e}")))
}
