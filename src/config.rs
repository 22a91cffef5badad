#![forbid(unsafe_code)]

//! Client settings.
//!
//! Precedence, highest first: explicit overrides (CLI flags), process
//! environment, the `.env` file, the optional `mediagrab.toml`, defaults.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CONFIG_PATH: &str = "mediagrab.toml";
pub const DEFAULT_API_BASE: &str = "http://localhost:3001/api";
pub const DEFAULT_DOWNLOAD_DIR: &str = ".";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

const API_BASE_KEY: &str = "MEDIAGRAB_API_BASE";
const DOWNLOAD_DIR_KEY: &str = "MEDIAGRAB_DOWNLOAD_DIR";
const TIMEOUT_KEY: &str = "MEDIAGRAB_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Base URL of the service API, e.g. `http://localhost:3001/api`.
    pub api_base: String,
    /// Where retrieved artifacts are written.
    pub download_dir: PathBuf,
    /// Applies to the info and job-creation requests, not to the progress
    /// stream or the file transfer.
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub api_base: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub env_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

/// Shape of `mediagrab.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub api_base: Option<String>,
    pub download_dir: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
}

pub fn load_settings() -> Result<ClientSettings> {
    resolve_settings(SettingsOverrides::default())
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<ClientSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let config_path = overrides
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let file_vars = read_env_file(&env_path)?;
    let file_settings = read_config_file(&config_path)?;
    build_settings(&file_vars, &file_settings, env_var_string, overrides)
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    file_settings: &FileSettings,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<ClientSettings> {
    let api_base = overrides
        .api_base
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value(API_BASE_KEY, file_vars, &env_lookup))
        .or_else(|| file_settings.api_base.clone())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    if !(api_base.starts_with("http://") || api_base.starts_with("https://")) {
        bail!("{API_BASE_KEY} must be an http(s) URL, got {api_base:?}");
    }

    let download_dir = overrides
        .download_dir
        .or_else(|| lookup_value(DOWNLOAD_DIR_KEY, file_vars, &env_lookup).map(PathBuf::from))
        .or_else(|| file_settings.download_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));

    let timeout_secs = overrides
        .timeout_secs
        .or_else(|| {
            lookup_value(TIMEOUT_KEY, file_vars, &env_lookup)
                .and_then(|value| value.parse::<u64>().ok())
        })
        .or(file_settings.timeout_secs)
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    Ok(ClientSettings {
        api_base: api_base.trim_end_matches('/').to_string(),
        download_dir,
        request_timeout: Duration::from_secs(timeout_secs),
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

pub fn read_config_file(path: &Path) -> Result<FileSettings> {
    if !path.exists() {
        return Ok(FileSettings::default());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Parsing {}", path.display()))
}
