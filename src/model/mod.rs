//! Model definitions for meter readings, hourly statistics and the seams
//! between pipeline stages.

pub mod metrics;
pub mod traits;
pub mod types;

// Re-export commonly used items at the module level
pub use metrics::HourlyStatisticPoint;
pub use traits::{DataPointBuilder, PortalAuthenticator, ReadingSource, StateStore, StatisticsSink};
pub use types::{
    hour_start, Credentials, DateRange, HourlyStatistic, PartialHourPolicy, RawReading,
    SeriesMetadata, Session, StatisticEntry, Unit,
};
