use chrono::{DateTime, Duration, Timelike, Utc};
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Account credentials for one meter.
///
/// The password is only reachable through [`Credentials::password`] and is
/// redacted from `Debug` output so it never ends up in a log line.
#[derive(Clone)]
pub struct Credentials {
    pub mprn: String,
    pub email: String,
    password: String,
}

impl Credentials {
    pub fn new(
        mprn: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            mprn: mprn.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mprn", &self.mprn)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated portal session.
///
/// Holds the cookie header captured during login and the anti-forgery token
/// required by the download endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub cookie_header: String,
    pub download_token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Half-open UTC time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// True when `other` lies entirely inside this range.
    pub fn covers(&self, other: &DateRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Splits the range into consecutive pieces no longer than `days` days.
    pub fn chunks(&self, days: u32) -> Vec<DateRange> {
        if self.is_empty() {
            return Vec::new();
        }
        let step = Duration::days(i64::from(days.max(1)));
        let mut chunks = Vec::new();
        let mut start = self.start;
        while start < self.end {
            let end = (start + step).min(self.end);
            chunks.push(DateRange::new(start, end));
            start = end;
        }
        chunks
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}..{}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// One half-hourly consumption reading as exported by the portal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    /// The export's "Read Date and End Time" value converted to UTC, always
    /// on :00 or :30. The portal stamps each interval with its end time;
    /// it is used unchanged as the key of the half-hour slot.
    pub timestamp: DateTime<Utc>,
    /// Consumption in kWh
    pub value_kwh: f64,
    /// The portal's "Read Type" column, e.g. "Active Import Interval (kWh)"
    pub quality: Option<String>,
}

impl RawReading {
    pub fn new(timestamp: DateTime<Utc>, value_kwh: f64) -> Self {
        Self {
            timestamp,
            value_kwh,
            quality: None,
        }
    }

    pub fn is_on_half_hour_grid(&self) -> bool {
        let ts = self.timestamp;
        (ts.minute() == 0 || ts.minute() == 30) && ts.second() == 0 && ts.nanosecond() == 0
    }
}

/// Consumption summed over one clock hour.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyStatistic {
    pub start: DateTime<Utc>,
    pub sum_kwh: f64,
    /// How many half-hour readings contributed (1 or 2)
    pub half_hours: u8,
}

impl HourlyStatistic {
    pub fn is_complete(&self) -> bool {
        self.half_hours == 2
    }
}

/// Units of measurement used in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// Kilowatt-hours (kWh)
    Kwh,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Unit::Kwh => write!(f, "kWh"),
        }
    }
}

/// Identity of the statistics series a meter is imported into.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesMetadata {
    pub statistic_id: String,
    pub name: String,
    pub unit: Unit,
}

impl SeriesMetadata {
    pub fn for_mprn(mprn: &str) -> Self {
        Self {
            statistic_id: format!("esb_electricity_{}", mprn),
            name: format!("ESB Energy {}", mprn),
            unit: Unit::Kwh,
        }
    }
}

/// One row handed to the statistics sink.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticEntry {
    pub start: DateTime<Utc>,
    /// Consumption within the hour
    pub value_kwh: f64,
    /// Cumulative consumption including this hour
    pub running_total_kwh: f64,
    pub half_hours: u8,
}

impl StatisticEntry {
    pub fn is_partial(&self) -> bool {
        self.half_hours < 2
    }
}

/// What to do with hours that only had one half-hour reading when imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialHourPolicy {
    /// Keep trailing partial hours open so a late half-hour rewrites them
    #[default]
    Overwrite,
    /// Treat every written hour as final
    Skip,
}

/// Floors a timestamp to the start of its hour.
pub fn hour_start(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let secs = timestamp.timestamp();
    let floored = secs - secs.rem_euclid(3600);
    DateTime::from_timestamp(floored, 0).unwrap_or(timestamp)
}
