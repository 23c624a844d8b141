//! Extraction helpers for the pages returned during the portal login flow.
//!
//! All markup knowledge of the login pages lives here, so a change in the
//! portal's page structure only touches this file and `login.rs`.

use crate::error::ParseError;
use scraper::{Html, Selector};
use serde_derive::Deserialize;

/// Values the login page embeds as `var SETTINGS = {...};`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PortalSettings {
    pub csrf: String,
    #[serde(rename = "transId")]
    pub trans_id: String,
}

/// The self-submitting form returned once credentials are accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoForm {
    pub action: String,
    pub state: String,
    pub client_info: String,
    pub code: String,
}

/// Answer of the credential POST.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelfAssertedResponse {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl SelfAssertedResponse {
    pub fn is_accepted(&self) -> bool {
        self.status == "200"
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

const SETTINGS_MARKER: &str = "var SETTINGS = ";

const CAPTCHA_MARKERS: &[&str] = &["captcha", "recaptcha", "hcaptcha", "arkose"];

/// Creates a CSS selector from a string.
pub fn html_selector(selector: &str) -> Result<Selector, ParseError> {
    Selector::parse(selector).map_err(|e| ParseError::invalid_selector(selector, e))
}

/// Pulls the `SETTINGS` object out of the login page's inline script.
///
/// The object is written without whitespace and terminated by `;`.
pub fn extract_settings(body: &str) -> Result<PortalSettings, ParseError> {
    let start = body
        .find(SETTINGS_MARKER)
        .ok_or_else(|| ParseError::element_not_found(SETTINGS_MARKER.trim_end()))?
        + SETTINGS_MARKER.len();
    let raw: String = body[start..]
        .chars()
        .take_while(|c| !c.is_whitespace())
        .collect();
    let json = raw.trim_end_matches(';');
    serde_json::from_str(json)
        .map_err(|e| ParseError::UnexpectedStructure(format!("SETTINGS is not valid JSON: {}", e)))
}

/// Finds `form#auto` and the hidden inputs needed to finish the handshake.
pub fn extract_auto_form(body: &str) -> Result<AutoForm, ParseError> {
    let document = Html::parse_document(body);
    let form_selector = html_selector("form#auto")?;
    let form = document
        .select(&form_selector)
        .next()
        .ok_or_else(|| ParseError::element_not_found("form#auto"))?;

    let action = form
        .value()
        .attr("action")
        .ok_or_else(|| ParseError::element_not_found("form#auto[action]"))?
        .to_string();

    let input = |name: &str| -> Result<String, ParseError> {
        let selector_text = format!("input[name=\"{}\"]", name);
        let selector = html_selector(&selector_text)?;
        form.select(&selector)
            .next()
            .and_then(|el| el.value().attr("value"))
            .map(str::to_string)
            .ok_or_else(|| ParseError::element_not_found(selector_text))
    };

    Ok(AutoForm {
        action,
        state: input("state")?,
        client_info: input("client_info")?,
        code: input("code")?,
    })
}

/// True when the page asks for a human verification challenge.
pub fn detect_captcha(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    CAPTCHA_MARKERS.iter().any(|marker| lower.contains(marker))
}

pub fn parse_self_asserted(body: &str) -> Result<SelfAssertedResponse, ParseError> {
    serde_json::from_str(body.trim()).map_err(|e| {
        ParseError::UnexpectedStructure(format!("credential response is not JSON: {}", e))
    })
}

/// Reads the anti-forgery token required by the download endpoint.
pub fn extract_download_token(body: &str) -> Result<String, ParseError> {
    let response: TokenResponse = serde_json::from_str(body.trim()).map_err(|e| {
        ParseError::UnexpectedStructure(format!("token response is not JSON: {}", e))
    })?;
    if response.token.is_empty() {
        return Err(ParseError::UnexpectedStructure(
            "download token is empty".to_string(),
        ));
    }
    Ok(response.token)
}
