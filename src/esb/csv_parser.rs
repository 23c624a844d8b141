//! Parser for the portal's "HDF" interval export.
//!
//! ```text
//! MPRN,Meter Serial Number,Read Value,Read Type,Read Date and End Time
//! 10012345678,000000000001,1.044000,Active Import Interval (kWh),02-11-2024 21:00
//! ```
//!
//! Timestamps are local wall-clock time in the portal's zone. When clocks go
//! back, the export lists the repeated local half-hours twice, in order; the
//! first occurrence is the earlier instant and the second the later one.

use crate::error::ParseError;
use crate::model::RawReading;
use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use csv::StringRecord;
use std::collections::HashSet;

const COL_MPRN: &str = "MPRN";
const COL_VALUE: &str = "Read Value";
const COL_TYPE: &str = "Read Type";
const COL_TIMESTAMP: &str = "Read Date and End Time";
const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M";

// per-record warnings beyond this are logged at debug
const LOUD_REJECTIONS: usize = 5;

#[derive(Debug, Default, PartialEq)]
pub struct ParsedExport {
    pub readings: Vec<RawReading>,
    /// Records dropped because a field could not be parsed
    pub rejected: usize,
    /// Records dropped because their half-hour was already seen
    pub duplicates: usize,
}

struct Columns {
    mprn: usize,
    value: usize,
    read_type: Option<usize>,
    timestamp: usize,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, ParseError> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| ParseError::InvalidCsv(format!("missing column '{}'", name)))
        };
        Ok(Self {
            mprn: require(COL_MPRN)?,
            value: require(COL_VALUE)?,
            read_type: find(COL_TYPE),
            timestamp: require(COL_TIMESTAMP)?,
        })
    }
}

/// Parses an export body into readings for `mprn`.
///
/// Bad records are skipped and counted. If the export holds records for the
/// meter but none of them parse, the whole body is rejected.
pub fn parse_export(body: &str, mprn: &str, tz: Tz) -> Result<ParsedExport, ParseError> {
    if !body.trim_start_matches('\u{feff}').starts_with(COL_MPRN) {
        let preview: String = body.chars().take(40).collect();
        return Err(ParseError::InvalidCsv(format!(
            "expected header starting with MPRN, got '{}'",
            preview
        )));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(body.trim_start_matches('\u{feff}').as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| ParseError::InvalidCsv(e.to_string()))?
        .clone();
    let columns = Columns::locate(&headers)?;

    let mut parsed = ParsedExport::default();
    let mut seen = HashSet::new();
    let mut folded = HashSet::new();
    let mut meter_records = 0usize;

    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                note_rejection(parsed.rejected, line, &e.to_string());
                parsed.rejected += 1;
                continue;
            }
        };
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        if record.get(columns.mprn) != Some(mprn) {
            continue;
        }
        meter_records += 1;

        match parse_record(&record, &columns, tz, &mut folded) {
            Ok(reading) => {
                if seen.insert(reading.timestamp) {
                    parsed.readings.push(reading);
                } else {
                    tracing::debug!("Dropping duplicate reading at {}", reading.timestamp);
                    parsed.duplicates += 1;
                }
            }
            Err(e) => {
                note_rejection(parsed.rejected, line, &e.to_string());
                parsed.rejected += 1;
            }
        }
    }

    if meter_records > 0 && parsed.readings.is_empty() && parsed.rejected > 0 {
        return Err(ParseError::AllRecordsRejected {
            rejected: parsed.rejected,
        });
    }

    parsed.readings.sort_by_key(|r| r.timestamp);
    Ok(parsed)
}

fn parse_record(
    record: &StringRecord,
    columns: &Columns,
    tz: Tz,
    folded: &mut HashSet<NaiveDateTime>,
) -> Result<RawReading, ParseError> {
    let value_text = record.get(columns.value).unwrap_or_default();
    let value_kwh: f64 = value_text
        .parse()
        .map_err(|e| ParseError::number_parse(value_text, e))?;
    if !value_kwh.is_finite() {
        return Err(ParseError::number_parse(value_text, "not a finite number"));
    }

    let ts_text = record.get(columns.timestamp).unwrap_or_default();
    let naive = NaiveDateTime::parse_from_str(ts_text, TIMESTAMP_FORMAT)
        .map_err(|e| ParseError::datetime_parse(ts_text, e))?;
    let timestamp = resolve_local(tz, naive, folded)
        .ok_or_else(|| ParseError::datetime_parse(ts_text, "does not exist in local time"))?;

    let reading = RawReading {
        timestamp,
        value_kwh,
        quality: columns
            .read_type
            .and_then(|idx| record.get(idx))
            .filter(|t| !t.is_empty())
            .map(str::to_string),
    };
    if !reading.is_on_half_hour_grid() {
        return Err(ParseError::datetime_parse(ts_text, "not on a half-hour boundary"));
    }
    Ok(reading)
}

/// Maps a local time to UTC. An ambiguous time resolves to its earlier
/// instant the first time it is seen and to its later instant afterwards.
fn resolve_local(
    tz: Tz,
    naive: NaiveDateTime,
    folded: &mut HashSet<NaiveDateTime>,
) -> Option<DateTime<Utc>> {
    let local = match tz.from_local_datetime(&naive) {
        LocalResult::Single(local) => local,
        LocalResult::Ambiguous(earlier, later) => {
            if folded.insert(naive) {
                earlier
            } else {
                later
            }
        }
        LocalResult::None => return None,
    };
    Some(local.with_timezone(&Utc))
}

fn note_rejection(already_rejected: usize, line: usize, reason: &str) {
    if already_rejected < LOUD_REJECTIONS {
        tracing::warn!("Skipping unparsable record {}: {}", line + 1, reason);
    } else {
        tracing::debug!("Skipping unparsable record {}: {}", line + 1, reason);
    }
}
