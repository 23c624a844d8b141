//! One meter's import pipeline: login, download, aggregate, deduplicate and
//! write, with the meter's progress persisted between cycles.

use crate::aggregator::aggregate;
use crate::cache::DevCache;
use crate::config::ImporterConfig;
use crate::dedup::plan_import;
use crate::error::{Error, FetchError, Result};
use crate::esb::SessionClient;
use crate::model::{
    hour_start, Credentials, DateRange, PartialHourPolicy, RawReading, ReadingSource,
    SeriesMetadata, Session, StateStore, StatisticsSink,
};
use crate::state::ImportState;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Where a cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Idle,
    Authenticating,
    Fetching,
    Aggregating,
    Deduplicating,
    Writing,
    Failed,
}

/// Where the readings of a cycle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingOrigin {
    Portal,
    Cache,
}

/// Summary of one finished cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CycleReport {
    pub range: Option<DateRange>,
    pub readings: usize,
    pub hours: usize,
    pub partial_hours: usize,
    pub written: usize,
    pub skipped: usize,
    pub origin: Option<ReadingOrigin>,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.range {
            Some(range) => write!(f, "range={}", range)?,
            None => write!(f, "range=none")?,
        }
        write!(
            f,
            " readings={} hours={} partial={} written={} skipped={}",
            self.readings, self.hours, self.partial_hours, self.written, self.skipped
        )?;
        if let Some(origin) = self.origin {
            write!(f, " origin={:?}", origin)?;
        }
        Ok(())
    }
}

/// Shared collaborators of an importer.
///
/// `sessions` belongs to the meter's portal account and is shared with every
/// other meter of that account.
pub struct ImporterParts {
    pub sessions: Arc<SessionClient>,
    pub source: Arc<dyn ReadingSource>,
    pub sink: Arc<dyn StatisticsSink>,
    pub store: Arc<dyn StateStore>,
    pub cache: DevCache,
}

/// Runs import cycles for a single meter.
///
/// At most one cycle or reset runs at a time.
pub struct Importer {
    credentials: Credentials,
    series: SeriesMetadata,
    parts: ImporterParts,
    lookback: Duration,
    policy: PartialHourPolicy,
    running: Mutex<()>,
    stage: watch::Sender<CycleStage>,
}

impl Importer {
    pub fn new(credentials: Credentials, parts: ImporterParts, config: &ImporterConfig) -> Self {
        let (stage, _) = watch::channel(CycleStage::Idle);
        Self {
            series: SeriesMetadata::for_mprn(&credentials.mprn),
            credentials,
            parts,
            lookback: Duration::days(i64::from(config.lookback_days)),
            policy: config.partial_hour_policy,
            running: Mutex::new(()),
            stage,
        }
    }

    pub fn mprn(&self) -> &str {
        &self.credentials.mprn
    }

    pub fn stage(&self) -> CycleStage {
        *self.stage.borrow()
    }

    fn enter(&self, stage: CycleStage) {
        tracing::debug!(mprn = %self.mprn(), stage = ?stage, "Entering stage");
        self.stage.send_replace(stage);
    }

    /// Runs one import cycle.
    ///
    /// Fails with [`Error::CycleInProgress`] when a cycle for this meter is
    /// already running and with [`Error::Cancelled`] when `cancel` fires
    /// first. A failed cycle never moves the stored import progress.
    pub async fn run_cycle(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let _running = self.running.try_lock().map_err(|_| Error::CycleInProgress {
            mprn: self.mprn().to_string(),
        })?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = self.cycle(now) => result,
        };

        match &result {
            Ok(_) => self.enter(CycleStage::Idle),
            Err(e) => {
                tracing::debug!(mprn = %self.mprn(), stage = ?self.stage(), "Cycle aborted: {}", e);
                self.enter(CycleStage::Failed);
            }
        }
        result
    }

    async fn cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut state = self
            .parts
            .store
            .load(self.mprn())
            .await?
            .unwrap_or_else(|| ImportState::new(self.mprn()));

        let range = self.range_for(&state, now);
        let mut report = CycleReport {
            range: Some(range),
            ..CycleReport::default()
        };
        if range.is_empty() {
            tracing::info!(mprn = %self.mprn(), "Nothing to import before {}", range.end);
            return Ok(report);
        }
        if state.is_first_run() {
            tracing::info!(mprn = %self.mprn(), "First import, backfilling {}", range);
        }

        let (readings, origin) = match self.load_cached(&range).await {
            Some(readings) => (readings, ReadingOrigin::Cache),
            None => match self.download(&range, now).await {
                Ok(readings) => {
                    if let Err(e) = self.parts.cache.save(&range, &readings).await {
                        tracing::warn!("Failed to update development cache: {}", e);
                    }
                    (readings, ReadingOrigin::Portal)
                }
                Err(Error::Fetch(FetchError::EmptyResult { range })) => {
                    tracing::warn!(mprn = %self.mprn(), "Portal returned no readings for {}", range);
                    report.origin = Some(ReadingOrigin::Portal);
                    return Ok(report);
                }
                Err(e) => return Err(e),
            },
        };
        report.origin = Some(origin);
        report.readings = readings.len();

        self.enter(CycleStage::Aggregating);
        let stats = aggregate(&readings)?;
        report.hours = stats.len();
        report.partial_hours = stats.iter().filter(|s| !s.is_complete()).count();

        self.enter(CycleStage::Deduplicating);
        let plan = plan_import(&stats, &state, self.policy);
        report.skipped = plan.skipped;

        self.enter(CycleStage::Writing);
        if !plan.entries.is_empty() {
            self.parts.sink.import(&self.series, &plan.entries).await?;
            report.written = plan.entries.len();
        }
        if plan.moves_progress(&state) {
            plan.apply(&mut state);
            self.parts.store.save(&state).await?;
        }

        tracing::info!(
            mprn = %self.mprn(),
            "Imported {} hours ({} skipped), watermark now {}",
            report.written,
            report.skipped,
            state
                .last_imported_hour
                .map(|h| h.to_rfc3339())
                .unwrap_or_else(|| "unset".to_string())
        );
        Ok(report)
    }

    /// Lookback window on the first run, otherwise the hour after the
    /// watermark. Both end with the hour containing `now`.
    fn range_for(&self, state: &ImportState, now: DateTime<Utc>) -> DateRange {
        let end = hour_start(now) + Duration::hours(1);
        let start = match state.last_imported_hour {
            Some(hour) => hour + Duration::hours(1),
            None => end - self.lookback,
        };
        DateRange::new(start, end)
    }

    async fn load_cached(&self, range: &DateRange) -> Option<Vec<RawReading>> {
        match self.parts.cache.load(range).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!("Ignoring unreadable development cache: {}", e);
                None
            }
        }
    }

    /// Downloads `range` with the account's session.
    ///
    /// A session reused from before this cycle may have been invalidated on
    /// the portal's side, so its rejection earns one fresh login. A session
    /// minted for this cycle that is rejected fails the cycle.
    async fn download(&self, range: &DateRange, now: DateTime<Utc>) -> Result<Vec<RawReading>> {
        self.enter(CycleStage::Authenticating);
        let lease = self.parts.sessions.acquire(&self.credentials, now).await?;

        match self.fetch_with(&lease.session, range).await {
            Err(Error::Fetch(FetchError::SessionExpired)) if lease.reused => {
                tracing::info!(mprn = %self.mprn(), "Held session rejected by the portal, logging in again");
                self.enter(CycleStage::Authenticating);
                let fresh = self
                    .parts
                    .sessions
                    .renew(&self.credentials, &lease.session, now)
                    .await?;
                self.fetch_with(&fresh, range).await
            }
            result => result,
        }
    }

    async fn fetch_with(&self, session: &Session, range: &DateRange) -> Result<Vec<RawReading>> {
        self.enter(CycleStage::Fetching);
        match self.parts.source.fetch(session, self.mprn(), range).await {
            Err(FetchError::SessionExpired) => {
                self.parts.sessions.discard(session).await;
                Err(FetchError::SessionExpired.into())
            }
            result => Ok(result?),
        }
    }

    /// Deletes everything imported for this meter inside the lookback window
    /// and forgets its progress, so the next cycle backfills from scratch.
    ///
    /// The account's login bookkeeping is not touched.
    pub async fn reset(&self, now: DateTime<Utc>) -> Result<()> {
        let _running = self.running.try_lock().map_err(|_| Error::CycleInProgress {
            mprn: self.mprn().to_string(),
        })?;

        let end = hour_start(now) + Duration::hours(1);
        let range = DateRange::new(end - self.lookback, end);
        self.parts.sink.purge(&self.series, &range).await?;

        self.parts.store.delete(self.mprn()).await?;

        tracing::info!(mprn = %self.mprn(), "Reset import state and purged {}", range);
        Ok(())
    }
}
