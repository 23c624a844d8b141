use crate::error::{AuthError, Result};
use crate::model::{Credentials, PortalAuthenticator, Session, StateStore};
use crate::retry::RetryPolicy;
use crate::state::LoginWindow;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A session handed out by [`SessionClient::acquire`].
#[derive(Debug, Clone)]
pub struct SessionLease {
    pub session: Session,
    /// Whether the session was minted before this lease, by an earlier
    /// cycle or by another meter of the account
    pub reused: bool,
}

/// Owns the portal session of one account and guards its logins behind the
/// provider's daily login budget.
///
/// The provider blocks an account after a handful of logins per day, and
/// the block is counted on their side no matter which meter or trigger
/// caused the login. All meters of an account therefore share one
/// `SessionClient`: they reuse one session, and every attempt is recorded in
/// the account's [`LoginWindow`] before any network traffic happens.
pub struct SessionClient {
    authenticator: Arc<dyn PortalAuthenticator>,
    store: Arc<dyn StateStore>,
    account: String,
    max_attempts: u32,
    retry: RetryPolicy,
    held: Mutex<Option<Session>>,
}

impl SessionClient {
    pub fn new(
        authenticator: Arc<dyn PortalAuthenticator>,
        store: Arc<dyn StateStore>,
        account: impl Into<String>,
        max_attempts: u32,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            authenticator,
            store,
            account: account.into(),
            max_attempts,
            retry,
            held: Mutex::new(None),
        }
    }

    /// Spends one login attempt from `window`, or fails with
    /// [`AuthError::RateLimited`] when the day's budget is gone.
    pub fn reserve_attempt(
        &self,
        window: &mut LoginWindow,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), AuthError> {
        let spent = window.attempts_on(now);
        if spent >= self.max_attempts {
            tracing::warn!(
                attempts = spent,
                limit = self.max_attempts,
                "Login budget for today is used up, not contacting the portal"
            );
            return Err(AuthError::RateLimited);
        }
        window.record_attempt(now);
        Ok(())
    }

    /// Runs the portal login for an attempt already reserved. Transport
    /// failures are retried; portal answers are returned as they are.
    pub async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> std::result::Result<Session, AuthError> {
        self.retry
            .run("ESB login", AuthError::is_transient, || {
                self.authenticator.authenticate(credentials)
            })
            .await
    }

    /// Returns the account's unexpired session, logging in when there is
    /// none. Concurrent callers wait for a login in flight instead of
    /// starting their own.
    pub async fn acquire(&self, credentials: &Credentials, now: DateTime<Utc>) -> Result<SessionLease> {
        let mut held = self.held.lock().await;
        if let Some(session) = held.as_ref().filter(|s| !s.is_expired(now)) {
            return Ok(SessionLease {
                session: session.clone(),
                reused: true,
            });
        }
        *held = None;
        let session = self.login(credentials, now).await?;
        *held = Some(session.clone());
        Ok(SessionLease {
            session,
            reused: false,
        })
    }

    /// Replaces a session the portal rejected.
    ///
    /// When another meter already replaced it, the newer session is returned
    /// without logging in again.
    pub async fn renew(
        &self,
        credentials: &Credentials,
        rejected: &Session,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let mut held = self.held.lock().await;
        if let Some(current) = held
            .as_ref()
            .filter(|s| *s != rejected && !s.is_expired(now))
        {
            return Ok(current.clone());
        }
        *held = None;
        let session = self.login(credentials, now).await?;
        *held = Some(session.clone());
        Ok(session)
    }

    /// Forgets `rejected` if it is still the held session.
    pub async fn discard(&self, rejected: &Session) {
        let mut held = self.held.lock().await;
        if held.as_ref() == Some(rejected) {
            *held = None;
        }
    }

    /// Reserves an attempt in the account's window, persists it, then logs
    /// in. The attempt stays recorded even when the login fails or the
    /// process dies halfway through it.
    async fn login(&self, credentials: &Credentials, now: DateTime<Utc>) -> Result<Session> {
        let mut window = self.store.load_login(&self.account).await?;
        self.reserve_attempt(&mut window, now)?;
        self.store.save_login(&self.account, &window).await?;
        tracing::info!(
            attempt = window.attempts_on(now),
            limit = self.max_attempts,
            "Logging in to the ESB portal"
        );
        Ok(self.authenticate(credentials).await?)
    }
}
