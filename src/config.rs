use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{RelayError, Result};

pub const CONFIG_PATH_ENV: &str = "ZABBIX_WEIXIN_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub weixin_parameter: WeixinConfig,
    pub zabbix_parameter: ZabbixConfig,
    pub path_parameter: PathConfig,
}

#[derive(Deserialize)]
pub struct WeixinConfig {
    pub corpid: String,
    pub secret: String,
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub appid: u64,
    pub msg_author: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Deserialize)]
pub struct ZabbixConfig {
    pub username: String,
    pub password: String,
    pub login_url: String,
    pub get_picture_url: String,
    #[serde(default = "default_picture_height")]
    pub picture_height: u32,
    #[serde(default = "default_picture_width")]
    pub picture_width: u32,
    #[serde(default = "default_picture_period")]
    pub picture_period: u64,
}

#[derive(Debug, Deserialize)]
pub struct PathConfig {
    pub picture_save_path: PathBuf,
    pub mediaid_cache_path: PathBuf,
    #[serde(default = "default_cache_lock_timeout_secs")]
    pub cache_lock_timeout_secs: u64,
}

const REDACTED: &str = "<redacted>";

impl fmt::Debug for WeixinConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeixinConfig")
            .field("corpid", &self.corpid)
            .field("secret", &REDACTED)
            .field("appid", &self.appid)
            .field("msg_author", &self.msg_author)
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

impl fmt::Debug for ZabbixConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZabbixConfig")
            .field("username", &self.username)
            .field("password", &REDACTED)
            .field("login_url", &self.login_url)
            .field("get_picture_url", &self.get_picture_url)
            .field("picture_height", &self.picture_height)
            .field("picture_width", &self.picture_width)
            .field("picture_period", &self.picture_period)
            .finish()
    }
}

fn default_api_base_url() -> String { "https://qyapi.weixin.qq.com/cgi-bin".to_string() }
fn default_picture_height() -> u32 { 100 }
fn default_picture_width() -> u32 { 450 }
fn default_picture_period() -> u64 { 3600 }
fn default_cache_lock_timeout_secs() -> u64 { 10 }

/// The provider hands out application ids as integers, but configs written by
/// hand often quote them.
fn number_or_numeric_string<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("appid {:?} is not a number", s))),
    }
}

impl Config {
    /// Resolve the config location: explicit flag, then environment, then
    /// `config.json` in the working directory.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let parsed: std::result::Result<Config, String> = if is_toml {
            toml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| {
            RelayError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }
}
