//! Folds half-hourly readings into hourly statistics.
//!
//! An hour is complete when both its :00 and :30 readings are present. An
//! hour with a single reading is still emitted, flagged partial through its
//! `half_hours` count, so consumption for an hour that is still being filled
//! in stays visible. Hours without readings are omitted; no zeroes are
//! synthesised.

use crate::error::AggregationError;
use crate::model::{hour_start, HourlyStatistic, RawReading};
use std::collections::BTreeMap;

/// Aggregates readings into hourly statistics ordered by hour.
///
/// The output depends only on the set of readings, not on their order.
pub fn aggregate(readings: &[RawReading]) -> Result<Vec<HourlyStatistic>, AggregationError> {
    let mut sorted: Vec<&RawReading> = readings.iter().collect();
    sorted.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.value_kwh.total_cmp(&b.value_kwh))
    });

    let mut hours: BTreeMap<_, (f64, u8)> = BTreeMap::new();
    let mut previous = None;

    for reading in sorted {
        if !reading.is_on_half_hour_grid() {
            return Err(AggregationError::OffGrid {
                timestamp: reading.timestamp.to_rfc3339(),
            });
        }
        if !reading.value_kwh.is_finite() {
            return Err(AggregationError::NonFinite {
                timestamp: reading.timestamp.to_rfc3339(),
            });
        }
        if previous == Some(reading.timestamp) {
            return Err(AggregationError::DuplicateSlot {
                timestamp: reading.timestamp.to_rfc3339(),
            });
        }
        previous = Some(reading.timestamp);

        let slot = hours.entry(hour_start(reading.timestamp)).or_insert((0.0, 0));
        slot.0 += reading.value_kwh;
        slot.1 += 1;
    }

    Ok(hours
        .into_iter()
        .map(|(start, (sum_kwh, half_hours))| HourlyStatistic {
            start,
            sum_kwh,
            half_hours,
        })
        .collect())
}
