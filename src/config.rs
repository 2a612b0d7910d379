//! Configuration read from the environment

use crate::conversation::Country;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid country entry {0:?}, expected CODE:Name")]
    InvalidCountry(String),
    #[error("Invalid value {value:?} for {var}, expected true or false")]
    InvalidFlag { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// SQLite file holding the snapshots
    pub db_path: PathBuf,
    /// Keep input that failed validation on the chat log
    pub record_rejected: bool,
    /// Countries offered by the country step
    pub countries: Vec<Country>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let db_path = lookup("ASSIST_DB_PATH").map_or_else(
            || {
                let home = lookup("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(format!("{home}/.buy-assistant/assistant.db"))
            },
            PathBuf::from,
        );

        let record_rejected = match lookup("ASSIST_RECORD_REJECTED") {
            Some(value) => parse_flag("ASSIST_RECORD_REJECTED", &value)?,
            None => true,
        };

        let countries = match lookup("ASSIST_COUNTRIES") {
            Some(list) if !list.trim().is_empty() => parse_countries(&list)?,
            _ => Country::catalogue(),
        };

        Ok(Self {
            db_path,
            record_rejected,
            countries,
        })
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            var,
            value: value.to_string(),
        }),
    }
}

/// Parse `DE:Germany,FR:France`
pub fn parse_countries(list: &str) -> Result<Vec<Country>, ConfigError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once(':') {
            Some((code, name)) if !code.trim().is_empty() && !name.trim().is_empty() => {
                Ok(Country::new(code.trim().to_ascii_uppercase(), name.trim()))
            }
            _ => Err(ConfigError::InvalidCountry(entry.to_string())),
        })
        .collect()
}
