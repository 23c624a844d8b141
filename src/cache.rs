//! Development cache for raw portal downloads.
//!
//! Every real login spends part of a tiny daily budget, so while iterating on
//! the pipeline the last successful download can be replayed from disk
//! instead. The cache is off unless explicitly enabled; when off, `save` does
//! nothing and `load` always misses.

use crate::error::PersistError;
use crate::model::{DateRange, RawReading};
use crate::persist;
use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub mprn: String,
    pub range: DateRange,
    pub readings: Vec<RawReading>,
    pub fetched_at: DateTime<Utc>,
}

pub struct DevCache {
    enabled: bool,
    mprn: String,
    path: PathBuf,
}

impl DevCache {
    pub fn new(enabled: bool, dir: impl Into<PathBuf>, mprn: &str) -> Self {
        Self {
            enabled,
            mprn: mprn.to_string(),
            path: dir.into().join(format!("esb_cache_{}.json", mprn)),
        }
    }

    /// Replaces the cached download with `readings` for `range`.
    pub async fn save(&self, range: &DateRange, readings: &[RawReading]) -> Result<(), PersistError> {
        if !self.enabled {
            return Ok(());
        }
        let entry = CacheEntry {
            mprn: self.mprn.clone(),
            range: *range,
            readings: readings.to_vec(),
            fetched_at: Utc::now(),
        };
        persist::write_json_atomic(&self.path, &entry).await?;
        tracing::info!(
            "Cached {} readings for {} to {}",
            readings.len(),
            range,
            self.path.display()
        );
        Ok(())
    }

    /// Returns the cached readings inside `range` if the stored download
    /// covers all of it.
    pub async fn load(&self, range: &DateRange) -> Result<Option<Vec<RawReading>>, PersistError> {
        if !self.enabled {
            return Ok(None);
        }
        let entry: CacheEntry = match persist::read_json(&self.path).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if entry.mprn != self.mprn || !entry.range.covers(range) {
            tracing::debug!("Cache at {} does not cover {}", self.path.display(), range);
            return Ok(None);
        }
        let readings: Vec<RawReading> = entry
            .readings
            .into_iter()
            .filter(|r| range.contains(r.timestamp))
            .collect();
        tracing::info!(
            "Loaded {} cached readings for {} (fetched {})",
            readings.len(),
            range,
            entry.fetched_at
        );
        Ok(Some(readings))
    }
}
