use crate::config::InfluxConfig;
use crate::error::SinkError;
use crate::model::{
    DataPointBuilder, DateRange, HourlyStatisticPoint, SeriesMetadata, StatisticEntry,
    StatisticsSink,
};
use async_trait::async_trait;
use chrono::SecondsFormat;
use futures::prelude::stream;
use influxdb2::models::DataPoint;
use serde_json::json;

/// InfluxDB 2 backed statistics sink.
///
/// Each series is its own measurement; a point's timestamp is the hour start,
/// so re-importing an hour replaces the earlier point.
pub struct Client {
    client: influxdb2::Client,
    http: reqwest::Client,
    url: String,
    org: String,
    token: String,
    bucket: String,
    batch_size: usize,
}

impl Client {
    pub(crate) fn new(config: InfluxConfig, batch_size: usize) -> Self {
        let client = influxdb2::Client::new(&config.url, &config.org, &config.token);
        Self {
            client,
            http: reqwest::Client::new(),
            url: config.url.trim_end_matches('/').to_string(),
            org: config.org,
            token: config.token,
            bucket: config.bucket,
            batch_size: batch_size.max(1),
        }
    }

    async fn write(&self, points: Vec<DataPoint>) -> Result<(), SinkError> {
        let count = points.len();
        self.client
            .write(self.bucket.as_str(), stream::iter(points))
            .await
            .map_err(|e| SinkError::write_failed(count, e))
    }
}

#[async_trait]
impl StatisticsSink for Client {
    async fn import(
        &self,
        series: &SeriesMetadata,
        entries: &[StatisticEntry],
    ) -> Result<(), SinkError> {
        for batch in entries.chunks(self.batch_size) {
            let points = batch
                .iter()
                .map(|entry| HourlyStatisticPoint { series, entry }.to_point())
                .collect::<Result<Vec<_>, _>>()?;
            self.write(points).await?;
            tracing::debug!(
                "Wrote {} statistics to {}",
                batch.len(),
                series.statistic_id
            );
        }
        Ok(())
    }

    async fn purge(&self, series: &SeriesMetadata, range: &DateRange) -> Result<(), SinkError> {
        let response = self
            .http
            .post(format!("{}/api/v2/delete", self.url))
            .query(&[("org", self.org.as_str()), ("bucket", self.bucket.as_str())])
            .header("Authorization", format!("Token {}", self.token))
            .json(&json!({
                "start": range.start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "stop": range.end.to_rfc3339_opts(SecondsFormat::Secs, true),
                "predicate": format!("_measurement=\"{}\"", series.statistic_id),
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SinkError::PurgeFailed {
                series: series.statistic_id.clone(),
                status: status.as_u16(),
                message,
            });
        }
        tracing::info!("Purged {} for {}", series.statistic_id, range);
        Ok(())
    }
}
