use crate::error::ConfigError;
use crate::model::{Credentials, PartialHourPolicy};
use crate::retry::RetryPolicy;
use anyhow::{anyhow, Result};
use serde_derive::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl AppConfig {
    pub fn log_level(&self) -> tracing::Level {
        tracing::Level::from_str(self.log_level.as_str()).unwrap_or(tracing::Level::INFO)
    }
}

pub(crate) fn load_app_config() -> Result<AppConfig> {
    match envy::from_env::<AppConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load AppConfig: {}", err)),
    }
}

fn default_portal_url() -> String {
    "https://myaccount.esbnetworks.ie".to_string()
}

fn default_login_url() -> String {
    "https://login.esbnetworks.ie".to_string()
}

fn default_timezone() -> String {
    "Europe/Dublin".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:142.0) Gecko/20100101 Firefox/142.0".to_string()
}

#[derive(Deserialize)]
pub struct EsbConfig {
    /// Meter point reference numbers read with this account
    pub mprns: Vec<String>,
    pub email: String,
    pub password: String,
    #[serde(default = "default_portal_url")]
    pub portal_url: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
    /// IANA zone the portal's CSV timestamps are written in
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl EsbConfig {
    pub fn credentials(&self) -> Vec<Credentials> {
        self.mprns
            .iter()
            .map(|mprn| mprn.trim())
            .filter(|mprn| !mprn.is_empty())
            .map(|mprn| Credentials::new(mprn, &self.email, &self.password))
            .collect()
    }

    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        chrono_tz::Tz::from_str(&self.timezone).map_err(|e| {
            ConfigError::invalid("ESB_TIMEZONE", format!("'{}': {}", self.timezone, e)).into()
        })
    }
}

impl std::fmt::Debug for EsbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EsbConfig")
            .field("mprns", &self.mprns)
            .field("email", &self.email)
            .field("portal_url", &self.portal_url)
            .field("login_url", &self.login_url)
            .field("timezone", &self.timezone)
            .finish_non_exhaustive()
    }
}

pub(crate) fn load_esb_config() -> Result<EsbConfig> {
    let config = match envy::prefixed("ESB_").from_env::<EsbConfig>() {
        Ok(config) => config,
        Err(err) => return Err(anyhow!("Failed to load EsbConfig: {}", err)),
    };
    if config.mprns.iter().all(|m| m.trim().is_empty()) {
        return Err(ConfigError::invalid("ESB_MPRNS", "no meter configured").into());
    }
    config.tz()?;
    Ok(config)
}

fn default_interval_sec() -> u64 {
    24 * 60 * 60
}

fn default_lookback_days() -> u32 {
    730
}

fn default_chunk_days() -> u32 {
    731
}

fn default_request_timeout_sec() -> u64 {
    45
}

fn default_session_ttl_sec() -> u64 {
    30 * 60
}

fn default_max_login_attempts() -> u32 {
    2
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    2000
}

fn default_step_delay_ms() -> u64 {
    3000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_write_batch_size() -> usize {
    500
}

#[derive(Deserialize, Debug)]
pub struct ImporterConfig {
    #[serde(default = "default_interval_sec")]
    pub interval_sec: u64,
    // how far back the first import reaches
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_chunk_days")]
    pub chunk_days: u32,
    #[serde(default = "default_request_timeout_sec")]
    pub request_timeout_sec: u64,
    #[serde(default = "default_session_ttl_sec")]
    pub session_ttl_sec: u64,
    #[serde(default = "default_max_login_attempts")]
    pub max_login_attempts: u32,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    // pause between login steps so the flow looks like a browser
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    #[serde(default = "default_data_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub dev_cache: bool,
    #[serde(default = "default_data_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub partial_hour_policy: PartialHourPolicy,
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: usize,
    #[serde(default)]
    pub reset_on_start: bool,
}

impl ImporterConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

pub fn load_importer_config() -> Result<ImporterConfig> {
    match envy::prefixed("IMPORTER_").from_env::<ImporterConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load ImporterConfig: {}", err)),
    }
}

#[derive(Deserialize, Debug)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

pub fn load_influx_config() -> Result<InfluxConfig> {
    match envy::prefixed("INFLUXDB_").from_env::<InfluxConfig>() {
        Ok(config) => Ok(config),
        Err(err) => Err(anyhow!("Failed to load InfluxConfig: {}", err)),
    }
}
