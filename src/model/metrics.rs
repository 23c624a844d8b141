use crate::error::SinkError;
use influxdb2::models::DataPoint;

use super::traits::DataPointBuilder;
use super::types::{SeriesMetadata, StatisticEntry};

/// An hourly statistic bound to the series it belongs to.
///
/// The series id becomes the measurement so every meter lands in its own
/// InfluxDB series, and the hour start is the point timestamp. Writing the
/// same hour twice replaces the earlier point.
#[derive(Debug)]
pub struct HourlyStatisticPoint<'a> {
    pub series: &'a SeriesMetadata,
    pub entry: &'a StatisticEntry,
}

impl DataPointBuilder for HourlyStatisticPoint<'_> {
    fn to_point(&self) -> Result<DataPoint, SinkError> {
        let timestamp = self
            .entry
            .start
            .timestamp_nanos_opt()
            .ok_or_else(|| SinkError::InvalidDataPoint("Timestamp overflow".to_string()))?;

        DataPoint::builder(self.series.statistic_id.as_str())
            .tag("unit", self.series.unit.to_string())
            .tag("name", self.series.name.clone())
            .field("state", self.entry.value_kwh)
            .field("sum", self.entry.running_total_kwh)
            .field("half_hours", i64::from(self.entry.half_hours))
            .field("partial", self.entry.is_partial())
            .timestamp(timestamp)
            .build()
            .map_err(|e| {
                SinkError::InvalidDataPoint(format!("Failed to build HourlyStatisticPoint: {}", e))
            })
    }
}
