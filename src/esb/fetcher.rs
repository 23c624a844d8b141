use crate::config::{EsbConfig, ImporterConfig};
use crate::error::FetchError;
use crate::esb::client::{download_client, read_text};
use crate::esb::csv_parser::parse_export;
use crate::model::{DateRange, RawReading, ReadingSource, Session};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono_tz::Tz;
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION};
use reqwest::Client as HttpClient;
use serde_json::json;

const DOWNLOAD_PATH: &str = "/DataHub/DownloadHdfPeriodic";
const SEARCH_TYPE: &str = "intervalkwh";

/// Downloads the half-hourly export for a meter.
///
/// The endpoint has no date parameters and always returns the full history
/// it holds. The export is downloaded once per fetch and the requested range
/// is cut out of it chunk by chunk.
pub struct ReadingFetcher {
    http: HttpClient,
    portal_url: String,
    tz: Tz,
    chunk_days: u32,
    retry: RetryPolicy,
}

impl ReadingFetcher {
    pub fn new(esb: &EsbConfig, importer: &ImporterConfig, tz: Tz) -> Result<Self, FetchError> {
        let http = download_client(&esb.user_agent, importer.request_timeout())
            .map_err(FetchError::network)?;
        Ok(Self {
            http,
            portal_url: esb.portal_url.trim_end_matches('/').to_string(),
            tz,
            chunk_days: importer.chunk_days,
            retry: importer.retry_policy(),
        })
    }

    async fn download(&self, session: &Session, mprn: &str) -> Result<String, FetchError> {
        let response = self
            .http
            .post(format!("{}{}", self.portal_url, DOWNLOAD_PATH))
            .header(COOKIE, session.cookie_header.as_str())
            .header("X-Xsrf-Token", session.download_token.as_str())
            .header("Referer", format!("{}/Api/HistoricConsumption", self.portal_url))
            .json(&json!({ "mprn": mprn, "searchType": SEARCH_TYPE }))
            .send()
            .await
            .map_err(FetchError::network)?;

        if response.status().is_redirection() {
            let target = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            tracing::debug!("Download redirected to '{}'", target);
            return Err(FetchError::SessionExpired);
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/html"));
        let (status, body) = read_text(response).await.map_err(FetchError::network)?;
        if !status.is_success() {
            return Err(FetchError::from_status(status, body));
        }
        // an expired session is answered with the login page
        if is_html || body.trim_start().starts_with('<') {
            return Err(FetchError::SessionExpired);
        }
        Ok(body)
    }

    async fn download_export(
        &self,
        session: &Session,
        mprn: &str,
    ) -> Result<Vec<RawReading>, FetchError> {
        let body = self
            .retry
            .run("ESB download", FetchError::is_transient, || {
                self.download(session, mprn)
            })
            .await?;

        let parsed = parse_export(&body, mprn, self.tz)?;
        if parsed.rejected > 0 || parsed.duplicates > 0 {
            tracing::warn!(
                rejected = parsed.rejected,
                duplicates = parsed.duplicates,
                "Dropped records from the export for MPRN {}",
                mprn
            );
        }
        Ok(parsed.readings)
    }
}

#[async_trait]
impl ReadingSource for ReadingFetcher {
    async fn fetch(
        &self,
        session: &Session,
        mprn: &str,
        range: &DateRange,
    ) -> Result<Vec<RawReading>, FetchError> {
        tracing::info!("Downloading readings for MPRN {}: {}", mprn, range);
        let export = self.download_export(session, mprn).await?;

        let chunks = range.chunks(self.chunk_days);
        let mut readings = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let before = readings.len();
            readings.extend(
                export
                    .iter()
                    .filter(|r| chunk.contains(r.timestamp))
                    .cloned(),
            );
            tracing::debug!(
                "Chunk {}/{} {} holds {} readings",
                i + 1,
                chunks.len(),
                chunk,
                readings.len() - before
            );
        }

        if readings.is_empty() {
            return Err(FetchError::empty(range));
        }
        readings.sort_by_key(|r| r.timestamp);
        readings.dedup_by_key(|r| r.timestamp);
        Ok(readings)
    }
}
