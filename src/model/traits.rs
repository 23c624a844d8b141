use crate::error::{AuthError, FetchError, PersistError, SinkError};
use crate::state::{ImportState, LoginWindow};
use async_trait::async_trait;
use influxdb2::models::DataPoint;

use super::types::{Credentials, DateRange, RawReading, SeriesMetadata, Session, StatisticEntry};

/// Trait for types that can be converted to InfluxDB data points.
pub trait DataPointBuilder: Send + Sync {
    /// Converts the value into an InfluxDB DataPoint.
    fn to_point(&self) -> Result<DataPoint, SinkError>;
}

/// Performs the portal's login flow and hands back a session.
///
/// The HTTP call sequence is an adapter detail; everything above this trait
/// only cares about getting a [`Session`] or a classified [`AuthError`].
#[async_trait]
pub trait PortalAuthenticator: Send + Sync {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError>;
}

/// Downloads raw half-hourly readings for a meter.
#[async_trait]
pub trait ReadingSource: Send + Sync {
    /// Returns readings inside `range` in chronological order.
    ///
    /// A rejected session is reported as [`FetchError::SessionExpired`] and
    /// never handled by logging in again here.
    async fn fetch(
        &self,
        session: &Session,
        mprn: &str,
        range: &DateRange,
    ) -> Result<Vec<RawReading>, FetchError>;
}

/// Destination for hourly statistics.
///
/// Entries for one series must arrive with non-decreasing timestamps.
/// Importing an entry whose timestamp already exists overwrites it.
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn import(
        &self,
        series: &SeriesMetadata,
        entries: &[StatisticEntry],
    ) -> Result<(), SinkError>;

    /// Removes every entry of the series inside `range`.
    async fn purge(&self, series: &SeriesMetadata, range: &DateRange) -> Result<(), SinkError>;
}

/// Persistence for per-meter import progress and per-account login
/// bookkeeping.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, mprn: &str) -> Result<Option<ImportState>, PersistError>;

    async fn save(&self, state: &ImportState) -> Result<(), PersistError>;

    async fn delete(&self, mprn: &str) -> Result<(), PersistError>;

    /// Login attempts spent by `account`; an unknown account has spent none.
    async fn load_login(&self, account: &str) -> Result<LoginWindow, PersistError>;

    async fn save_login(&self, account: &str, window: &LoginWindow) -> Result<(), PersistError>;
}
