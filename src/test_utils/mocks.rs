//! Mock implementations and server helpers for testing.
//!
//! This module provides a mockito builder for the portal login flow and
//! in-memory stand-ins for every seam of the import pipeline.

use crate::error::{AuthError, FetchError, PersistError, SinkError};
use crate::model::{
    Credentials, DateRange, PortalAuthenticator, RawReading, ReadingSource, SeriesMetadata, Session,
    StateStore, StatisticEntry, StatisticsSink,
};
use crate::state::{ImportState, LoginWindow};
use crate::test_utils::fixtures;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockito::{Matcher, Mock, Server, ServerGuard};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

const POLICY_PATH: &str = "/esbntwkscustportalprdb2c01.onmicrosoft.com/B2C_1A_signup_signin";

/// Builder for creating mockito server mocks for the portal login flow.
///
/// The portal and the login host are served by the same mock server.
pub struct MockPortalServerBuilder {
    server: ServerGuard,
    mocks: Vec<Mock>,
}

impl MockPortalServerBuilder {
    /// Creates a new mock server builder.
    pub async fn new() -> Self {
        Self {
            server: Server::new_async().await,
            mocks: Vec::new(),
        }
    }

    /// Gets the server URL.
    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Serves the landing page with a valid `SETTINGS` object.
    pub async fn with_landing_page(self) -> Self {
        self.with_raw_landing_page(200, &fixtures::landing_page("csrf-abc", "tx-123"))
            .await
    }

    /// Serves an arbitrary landing page.
    pub async fn with_raw_landing_page(mut self, status: usize, body: &str) -> Self {
        let mock = self
            .server
            .mock("GET", "/")
            .with_status(status)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_header("set-cookie", "ARRAffinity=affinity-1; Path=/")
            .with_body(body)
            .expect_at_least(1)
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Answers the credential POST.
    pub async fn with_credential_response(mut self, status: usize, body: &str) -> Self {
        let mock = self
            .server
            .mock(
                "POST",
                Matcher::Regex(format!("^{}/SelfAsserted", POLICY_PATH)),
            )
            .match_query(Matcher::Any)
            .match_body(Matcher::Regex("signInName=me%40example.com".to_string()))
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;
        self.mocks.push(mock);
        self
    }

    /// Mocks every step of a successful login ending in `token`.
    pub async fn with_login_flow(self, token: &str) -> Self {
        let mut builder = self
            .with_landing_page()
            .await
            .with_credential_response(200, r#"{"status":"200"}"#)
            .await;
        let action = format!("{}/signin-oidc", builder.url());

        let confirmed = builder
            .server
            .mock(
                "GET",
                Matcher::Regex(format!(
                    "^{}/api/CombinedSigninAndSignup/confirmed",
                    POLICY_PATH
                )),
            )
            .match_query(Matcher::UrlEncoded("csrf_token".into(), "csrf-abc".into()))
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(fixtures::confirmed_page(&action))
            .create_async()
            .await;

        let signin = builder
            .server
            .mock("POST", "/signin-oidc")
            .match_body(Matcher::UrlEncoded("code".into(), fixtures::FORM_CODE.into()))
            .with_status(302)
            .with_header("location", "/")
            .with_header("set-cookie", ".AspNetCore.Cookies=portal-session; Path=/; HttpOnly")
            .create_async()
            .await;

        let consumption = builder
            .server
            .mock("GET", "/Api/HistoricConsumption")
            .match_header("cookie", Matcher::Regex("portal-session".to_string()))
            .with_status(200)
            .with_body("<html><body>Historic consumption</body></html>")
            .create_async()
            .await;

        let token_mock = builder
            .server
            .mock("GET", "/af/t")
            .match_header("x-returnurl", Matcher::Regex("/Api/HistoricConsumption$".to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"token":"{}"}}"#, token))
            .create_async()
            .await;

        builder
            .mocks
            .extend([confirmed, signin, consumption, token_mock]);
        builder
    }

    /// Verifies every registered mock was hit as expected.
    pub async fn assert_all(&self) {
        for mock in &self.mocks {
            mock.assert_async().await;
        }
    }
}

/// Authenticator answering from a queue of canned results, then succeeding.
pub struct MockAuthenticator {
    results: Mutex<VecDeque<Result<Session, AuthError>>>,
    calls: AtomicU32,
}

impl MockAuthenticator {
    pub fn succeeding() -> Self {
        Self::with_results(Vec::new())
    }

    pub fn with_results(results: Vec<Result<Session, AuthError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: AtomicU32::new(0),
        }
    }

    /// Number of times the portal was contacted.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortalAuthenticator for MockAuthenticator {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<Session, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(fixtures::test_session()))
    }
}

/// Reading source serving a fixed set of readings, filtered to the request.
#[derive(Default)]
pub struct MockReadingSource {
    readings: Mutex<Vec<RawReading>>,
    errors: Mutex<VecDeque<FetchError>>,
    ranges: Mutex<Vec<DateRange>>,
    delay: Mutex<Duration>,
}

impl MockReadingSource {
    pub fn with_readings(readings: Vec<RawReading>) -> Self {
        let source = Self::default();
        source.set_readings(readings);
        source
    }

    pub fn set_readings(&self, readings: Vec<RawReading>) {
        *self.readings.lock().unwrap() = readings;
    }

    /// Queues an error for the next fetch.
    pub fn push_error(&self, error: FetchError) {
        self.errors.lock().unwrap().push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// Ranges requested so far.
    pub fn ranges(&self) -> Vec<DateRange> {
        self.ranges.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReadingSource for MockReadingSource {
    async fn fetch(
        &self,
        _session: &Session,
        _mprn: &str,
        range: &DateRange,
    ) -> Result<Vec<RawReading>, FetchError> {
        self.ranges.lock().unwrap().push(*range);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let queued = self.errors.lock().unwrap().pop_front();
        if let Some(error) = queued {
            return Err(error);
        }
        let readings: Vec<RawReading> = self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| range.contains(r.timestamp))
            .cloned()
            .collect();
        if readings.is_empty() {
            return Err(FetchError::empty(range));
        }
        Ok(readings)
    }
}

/// Statistics sink keeping entries in memory, keyed by hour like the
/// InfluxDB series.
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<BTreeMap<DateTime<Utc>, StatisticEntry>>,
    purged: Mutex<Vec<DateRange>>,
    batches: AtomicUsize,
    fail: AtomicBool,
}

impl MemorySink {
    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<StatisticEntry> {
        self.entries.lock().unwrap().values().cloned().collect()
    }

    /// Number of successful `import` calls.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn purged(&self) -> Vec<DateRange> {
        self.purged.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatisticsSink for MemorySink {
    async fn import(
        &self,
        _series: &SeriesMetadata,
        entries: &[StatisticEntry],
    ) -> Result<(), SinkError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SinkError::write_failed(entries.len(), "mock sink unavailable"));
        }
        let mut stored = self.entries.lock().unwrap();
        for entry in entries {
            stored.insert(entry.start, entry.clone());
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn purge(&self, _series: &SeriesMetadata, range: &DateRange) -> Result<(), SinkError> {
        self.entries
            .lock()
            .unwrap()
            .retain(|start, _| !range.contains(*start));
        self.purged.lock().unwrap().push(*range);
        Ok(())
    }
}

/// State store backed by maps.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<String, ImportState>>,
    logins: Mutex<HashMap<String, LoginWindow>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn get(&self, mprn: &str) -> Option<ImportState> {
        self.states.lock().unwrap().get(mprn).cloned()
    }

    pub fn put(&self, state: ImportState) {
        self.states.lock().unwrap().insert(state.mprn.clone(), state);
    }

    /// Number of `save` calls for import progress.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn login_window(&self, account: &str) -> LoginWindow {
        self.logins
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .unwrap_or_default()
    }

    pub fn put_login(&self, account: &str, window: LoginWindow) {
        self.logins.lock().unwrap().insert(account.to_string(), window);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, mprn: &str) -> Result<Option<ImportState>, PersistError> {
        Ok(self.get(mprn))
    }

    async fn save(&self, state: &ImportState) -> Result<(), PersistError> {
        self.put(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, mprn: &str) -> Result<(), PersistError> {
        self.states.lock().unwrap().remove(mprn);
        Ok(())
    }

    async fn load_login(&self, account: &str) -> Result<LoginWindow, PersistError> {
        Ok(self.login_window(account))
    }

    async fn save_login(&self, account: &str, window: &LoginWindow) -> Result<(), PersistError> {
        self.put_login(account, window.clone());
        Ok(())
    }
}
