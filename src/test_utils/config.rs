//! Configuration utilities for testing.
//!
//! This module provides test configuration builders for the portal, the
//! importer and InfluxDB.

use crate::config::{EsbConfig, ImporterConfig, InfluxConfig};
use crate::model::PartialHourPolicy;
use crate::test_utils::fixtures::TEST_MPRN;

/// Builder for creating test ESB configurations.
#[derive(Debug)]
pub struct TestEsbConfigBuilder {
    url: String,
    mprns: Vec<String>,
    email: String,
    password: String,
}

impl TestEsbConfigBuilder {
    /// Creates a new test config builder with default values.
    pub fn new() -> Self {
        Self {
            url: "http://esb.test".to_string(),
            mprns: vec![TEST_MPRN.to_string()],
            email: "me@example.com".to_string(),
            password: "secret".to_string(),
        }
    }

    /// Points both the portal and the login host at `url`.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_mprns(mut self, mprns: &[&str]) -> Self {
        self.mprns = mprns.iter().map(|m| m.to_string()).collect();
        self
    }

    /// Builds the ESB configuration.
    pub fn build(self) -> EsbConfig {
        EsbConfig {
            mprns: self.mprns,
            email: self.email,
            password: self.password,
            portal_url: self.url.clone(),
            login_url: self.url,
            timezone: "Europe/Dublin".to_string(),
            user_agent: "esb-usage-importer-test".to_string(),
        }
    }
}

/// Creates a test ESB configuration talking to a mock server.
pub fn test_esb_config(url: impl Into<String>) -> EsbConfig {
    TestEsbConfigBuilder::new().with_url(url).build()
}

/// Importer settings with production defaults, except that nothing sleeps:
/// no politeness delay between login steps and millisecond retry backoff.
pub fn test_importer_config() -> ImporterConfig {
    let data_dir = std::env::temp_dir().join("esb-usage-importer-test");
    ImporterConfig {
        interval_sec: 24 * 60 * 60,
        lookback_days: 730,
        chunk_days: 731,
        request_timeout_sec: 5,
        session_ttl_sec: 30 * 60,
        max_login_attempts: 2,
        retry_attempts: 3,
        retry_base_delay_ms: 1,
        step_delay_ms: 0,
        state_dir: data_dir.clone(),
        dev_cache: false,
        cache_dir: data_dir,
        partial_hour_policy: PartialHourPolicy::Overwrite,
        write_batch_size: 500,
        reset_on_start: false,
    }
}

/// Creates a default test InfluxDB configuration.
pub fn test_influx_config() -> InfluxConfig {
    InfluxConfig {
        url: "http://localhost:8086".to_string(),
        org: "test-org".to_string(),
        token: "test-token".to_string(),
        bucket: "test-bucket".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_esb_config_builder() {
        let config = TestEsbConfigBuilder::new()
            .with_url("http://mock.local")
            .with_mprns(&["1", "2"])
            .build();

        assert_eq!(config.portal_url, "http://mock.local");
        assert_eq!(config.login_url, "http://mock.local");
        assert_eq!(config.credentials().len(), 2);
    }

    #[test]
    fn test_importer_config_never_sleeps() {
        let config = test_importer_config();
        assert!(config.step_delay().is_zero());
        assert_eq!(config.retry_policy().base_delay.as_millis(), 1);
    }
}
