//! Test fixtures and common test data.
//!
//! Canned portal pages, CSV exports and readings used across the test suite.

use crate::model::{RawReading, Session};
use chrono::{DateTime, Duration, Utc};

/// Meter used by most tests.
pub const TEST_MPRN: &str = "10012345678";

pub const FORM_STATE: &str = "StateProperties=eyJUSUQiOiJ0ZXN0In0";
pub const FORM_CLIENT_INFO: &str = "eyJ1aWQiOiJ0ZXN0LXVzZXIifQ";
pub const FORM_CODE: &str = "auth-code-123";

/// A login page replaced by a human verification challenge.
pub const CAPTCHA_PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Sign in</title>
<script src="https://www.google.com/recaptcha/api.js"></script></head>
<body><div class="g-recaptcha" data-sitekey="abc"></div></body></html>"#;

const CSV_HEADER: &str = "MPRN,Meter Serial Number,Read Value,Read Type,Read Date and End Time";

/// The B2C landing page with its inline `SETTINGS` object.
pub fn landing_page(csrf: &str, trans_id: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><title>Sign in</title>
<script>var SETTINGS = {{"csrf":"{}","transId":"{}","api":"CombinedSigninAndSignup","hosts":{{"tenant":"/test"}}}};
</script></head>
<body><form id="localAccountForm"><input id="signInName"/><input id="password" type="password"/></form></body></html>"#,
        csrf, trans_id
    )
}

/// The page returned after the credentials were accepted.
pub fn confirmed_page(action: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><body onload="document.forms[0].submit()">
<form id="auto" method="post" action="{}">
<input type="hidden" name="state" value="{}"/>
<input type="hidden" name="client_info" value="{}"/>
<input type="hidden" name="code" value="{}"/>
</form></body></html>"#,
        action, FORM_STATE, FORM_CLIENT_INFO, FORM_CODE
    )
}

/// A CSV export for [`TEST_MPRN`] with one row per `(local time, kWh)`.
pub fn export_csv(rows: &[(&str, &str)]) -> String {
    let mut body = format!("{}\n", CSV_HEADER);
    for (timestamp, value) in rows {
        body.push_str(&format!(
            "{},000000000001,{},Active Import Interval (kWh),{}\n",
            TEST_MPRN, value, timestamp
        ));
    }
    body
}

/// A session as produced by a successful login.
pub fn test_session() -> Session {
    let issued_at = Utc::now();
    Session {
        cookie_header: ".AspNetCore.Cookies=portal-session".to_string(),
        download_token: "xsrf-token-1".to_string(),
        issued_at,
        expires_at: issued_at + Duration::minutes(30),
    }
}

/// Half-hourly readings for every slot in `[start, end)`.
pub fn readings_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<RawReading> {
    let mut readings = Vec::new();
    let mut timestamp = start;
    let mut i = 0;
    while timestamp < end {
        readings.push(RawReading::new(timestamp, 0.25 + 0.01 * f64::from(i % 10)));
        timestamp += Duration::minutes(30);
        i += 1;
    }
    readings
}
