//! Per-meter import progress and per-account login bookkeeping.
//!
//! `ImportState` is the only record of how far the backfill has come. The
//! import watermark moves only after a successful sink write. The provider
//! counts logins per account, so the `LoginWindow` is kept per account and
//! shared by every meter under it; it is saved as soon as an attempt is
//! spent so that a crash never hands the provider an uncounted login.

use crate::error::PersistError;
use crate::model::StateStore;
use crate::persist;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;

/// Login attempts spent during one UTC day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginWindow {
    pub day: Option<NaiveDate>,
    pub attempts: u32,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl LoginWindow {
    /// Attempts already spent in the window containing `now`.
    pub fn attempts_on(&self, now: DateTime<Utc>) -> u32 {
        if self.day == Some(now.date_naive()) {
            self.attempts
        } else {
            0
        }
    }

    /// Counts one attempt, starting a fresh window after UTC midnight.
    pub fn record_attempt(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.day != Some(today) {
            self.day = Some(today);
            self.attempts = 0;
        }
        self.attempts += 1;
        self.last_login_at = Some(now);
    }
}

/// A partial hour at the import frontier that may still be completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenHour {
    pub start: DateTime<Utc>,
    pub half_hours: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportState {
    pub mprn: String,
    /// Latest hour whose statistic is final in the sink
    pub last_imported_hour: Option<DateTime<Utc>>,
    /// Running total at `last_imported_hour`
    #[serde(default)]
    pub running_total_kwh: f64,
    /// Partial hours written after the watermark
    #[serde(default)]
    pub open_hours: Vec<OpenHour>,
}

impl ImportState {
    pub fn new(mprn: impl Into<String>) -> Self {
        Self {
            mprn: mprn.into(),
            last_imported_hour: None,
            running_total_kwh: 0.0,
            open_hours: Vec::new(),
        }
    }

    /// Whether anything has been imported for this meter yet.
    pub fn is_first_run(&self) -> bool {
        self.last_imported_hour.is_none()
    }
}

/// Stores one JSON file per meter and one per portal account under a
/// directory.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, mprn: &str) -> PathBuf {
        self.dir.join(format!("esb_state_{}.json", mprn))
    }

    fn login_path_for(&self, account: &str) -> PathBuf {
        let key: String = account
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        self.dir.join(format!("esb_login_{}.json", key))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, mprn: &str) -> Result<Option<ImportState>, PersistError> {
        persist::read_json(&self.path_for(mprn)).await
    }

    async fn save(&self, state: &ImportState) -> Result<(), PersistError> {
        persist::write_json_atomic(&self.path_for(&state.mprn), state).await
    }

    async fn delete(&self, mprn: &str) -> Result<(), PersistError> {
        persist::remove_file(&self.path_for(mprn)).await
    }

    async fn load_login(&self, account: &str) -> Result<LoginWindow, PersistError> {
        Ok(persist::read_json(&self.login_path_for(account))
            .await?
            .unwrap_or_default())
    }

    async fn save_login(&self, account: &str, window: &LoginWindow) -> Result<(), PersistError> {
        persist::write_json_atomic(&self.login_path_for(account), window).await
    }
}
