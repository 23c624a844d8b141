//! The ESB Networks login handshake.
//!
//! The portal signs users in through an Azure AD B2C tenant. A login is a
//! fixed sequence of page loads and form posts whose cookies accumulate in a
//! jar; the result we keep is the portal cookie header plus the download
//! token served by `/af/t`.

use crate::config::{EsbConfig, ImporterConfig};
use crate::error::{AuthError, ParseError};
use crate::esb::client::{read_text, Client};
use crate::esb::html_parsing::{
    detect_captcha, extract_auto_form, extract_download_token, extract_settings,
    parse_self_asserted, AutoForm, PortalSettings,
};
use crate::model::{Credentials, PortalAuthenticator, Session};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;

const B2C_TENANT: &str = "esbntwkscustportalprdb2c01.onmicrosoft.com";
const B2C_POLICY: &str = "B2C_1A_signup_signin";

pub struct EsbPortal {
    portal_url: String,
    login_url: String,
    user_agent: String,
    timeout: Duration,
    step_delay: Duration,
    session_ttl: chrono::Duration,
}

impl EsbPortal {
    pub fn new(esb: &EsbConfig, importer: &ImporterConfig) -> Self {
        Self {
            portal_url: esb.portal_url.trim_end_matches('/').to_string(),
            login_url: esb.login_url.trim_end_matches('/').to_string(),
            user_agent: esb.user_agent.clone(),
            timeout: importer.request_timeout(),
            step_delay: importer.step_delay(),
            session_ttl: chrono::Duration::seconds(importer.session_ttl_sec as i64),
        }
    }

    fn policy_url(&self, path: &str) -> String {
        format!("{}/{}/{}/{}", self.login_url, B2C_TENANT, B2C_POLICY, path)
    }

    async fn pause(&self) {
        if !self.step_delay.is_zero() {
            sleep(self.step_delay).await;
        }
    }

    async fn load_settings(&self, client: &Client) -> Result<PortalSettings, AuthError> {
        tracing::info!("Fetching ESB login page...");
        let response = client
            .follow()
            .get(format!("{}/", self.portal_url))
            .send()
            .await
            .map_err(AuthError::network)?;
        let (status, body) = read_text(response).await.map_err(AuthError::network)?;
        check_status(status, &body)?;
        extract_settings(&body).map_err(|e| structure_error(&body, e))
    }

    async fn submit_credentials(
        &self,
        client: &Client,
        settings: &PortalSettings,
        credentials: &Credentials,
    ) -> Result<(), AuthError> {
        tracing::info!("Logging in to ESB Networks...");
        let url = format!(
            "{}?tx={}&p={}",
            self.policy_url("SelfAsserted"),
            settings.trans_id,
            B2C_POLICY
        );
        let response = client
            .no_redirect()
            .post(url)
            .header("x-csrf-token", settings.csrf.as_str())
            .header("X-Requested-With", "XMLHttpRequest")
            .header("Accept", "application/json, text/javascript, */*; q=0.01")
            .header("Origin", self.login_url.as_str())
            .form(&[
                ("signInName", credentials.email.as_str()),
                ("password", credentials.password()),
                ("request_type", "RESPONSE"),
            ])
            .send()
            .await
            .map_err(AuthError::network)?;
        let (status, body) = read_text(response).await.map_err(AuthError::network)?;
        check_status(status, &body)?;

        let answer = parse_self_asserted(&body).map_err(|e| structure_error(&body, e))?;
        if answer.is_accepted() {
            return Ok(());
        }
        let message = answer.message.unwrap_or_default();
        tracing::debug!(status = %answer.status, "Credential submission rejected: {}", message);
        if detect_captcha(&message) {
            Err(AuthError::CaptchaRequired)
        } else if message.to_ascii_lowercase().contains("too many") {
            Err(AuthError::RateLimited)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    async fn confirm(
        &self,
        client: &Client,
        settings: &PortalSettings,
    ) -> Result<AutoForm, AuthError> {
        let response = client
            .follow()
            .get(self.policy_url("api/CombinedSigninAndSignup/confirmed"))
            .query(&[
                ("rememberMe", "false"),
                ("csrf_token", settings.csrf.as_str()),
                ("tx", settings.trans_id.as_str()),
                ("p", B2C_POLICY),
            ])
            .send()
            .await
            .map_err(AuthError::network)?;
        let (status, body) = read_text(response).await.map_err(AuthError::network)?;
        check_status(status, &body)?;
        extract_auto_form(&body).map_err(|e| structure_error(&body, e))
    }

    async fn complete(&self, client: &Client, form: &AutoForm) -> Result<(), AuthError> {
        let response = client
            .no_redirect()
            .post(form.action.as_str())
            .header("Origin", self.login_url.as_str())
            .header("Referer", format!("{}/", self.login_url))
            .form(&[
                ("state", form.state.as_str()),
                ("client_info", form.client_info.as_str()),
                ("code", form.code.as_str()),
            ])
            .send()
            .await
            .map_err(AuthError::network)?;
        let (status, body) = read_text(response).await.map_err(AuthError::network)?;
        if status.is_redirection() {
            return Ok(());
        }
        check_status(status, &body)
    }

    async fn open_portal(&self, client: &Client) -> Result<String, AuthError> {
        for path in ["/", "/Api/HistoricConsumption"] {
            let response = client
                .follow()
                .get(format!("{}{}", self.portal_url, path))
                .send()
                .await
                .map_err(AuthError::network)?;
            let (status, body) = read_text(response).await.map_err(AuthError::network)?;
            check_status(status, &body)?;
            self.pause().await;
        }

        tracing::info!("Getting download token...");
        let response = client
            .follow()
            .get(format!("{}/af/t", self.portal_url))
            .header(
                "X-Returnurl",
                format!("{}/Api/HistoricConsumption", self.portal_url),
            )
            .send()
            .await
            .map_err(AuthError::network)?;
        let (status, body) = read_text(response).await.map_err(AuthError::network)?;
        check_status(status, &body)?;
        extract_download_token(&body).map_err(|e| structure_error(&body, e))
    }
}

#[async_trait]
impl PortalAuthenticator for EsbPortal {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        let client = Client::new(&self.user_agent, self.timeout).map_err(AuthError::network)?;

        let settings = self.load_settings(&client).await?;
        self.pause().await;
        self.submit_credentials(&client, &settings, credentials)
            .await?;
        let form = self.confirm(&client, &settings).await?;
        self.pause().await;
        self.complete(&client, &form).await?;
        let download_token = self.open_portal(&client).await?;

        let cookie_header = client
            .cookie_header(&self.portal_url)
            .ok_or_else(|| AuthError::unexpected("portal did not set a session cookie"))?;

        let issued_at = Utc::now();
        tracing::info!(mprn = %credentials.mprn, "Logged in to ESB Networks");
        Ok(Session {
            cookie_header,
            download_token,
            issued_at,
            expires_at: issued_at + self.session_ttl,
        })
    }
}

/// Maps non-success statuses of login steps to auth errors.
fn check_status(status: StatusCode, body: &str) -> Result<(), AuthError> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AuthError::RateLimited);
    }
    if detect_captcha(body) {
        return Err(AuthError::CaptchaRequired);
    }
    if status.is_server_error() {
        return Err(AuthError::network(format!("server returned {}", status)));
    }
    Err(AuthError::unexpected(format!("login step returned {}", status)))
}

/// A page without the expected structure is either a CAPTCHA challenge or
/// something we do not understand.
fn structure_error(body: &str, err: ParseError) -> AuthError {
    if detect_captcha(body) {
        AuthError::CaptchaRequired
    } else {
        AuthError::unexpected(err.to_string())
    }
}
