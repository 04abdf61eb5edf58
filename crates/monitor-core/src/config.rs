//! Monitor configuration
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use callwatch_monitor_core::config::MonitorConfig;
//!
//! let config = MonitorConfig::new(
//!     "https://api.example.com",
//!     "wss://api.example.com/ws/dashboard",
//!     "bearer-token",
//!     "acme",
//! )
//! .with_user_filter("user-42")
//! .with_reconnect_delay(Duration::from_secs(5));
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.tenant_id, "acme");
//! ```

use std::time::Duration;

use url::Url;

use crate::connection::DEFAULT_RECONNECT_DELAY;
use crate::error::{MonitorError, Result};

/// Configuration for a [`CallMonitor`](crate::monitor::CallMonitor).
///
/// The token is treated as an opaque input issued by an external session
/// provider; the monitor never refreshes it. If the token rotates, the
/// currently open connection keeps the value it connected with and the
/// next (re)connect picks up nothing new - rebuild the monitor to adopt a
/// new token.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base URL of the REST API, e.g. `https://api.example.com`.
    pub rest_base: String,
    /// Full URL of the dashboard stream endpoint, without the token.
    pub stream_url: String,
    /// Bearer token for both the REST API and the stream handshake.
    pub token: String,
    /// Tenant whose calls are monitored.
    pub tenant_id: String,
    /// Restrict the snapshot to one user's calls (supervisors monitoring
    /// a single agent).
    pub user_filter: Option<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl MonitorConfig {
    pub fn new(
        rest_base: impl Into<String>,
        stream_url: impl Into<String>,
        token: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            rest_base: rest_base.into(),
            stream_url: stream_url.into(),
            token: token.into(),
            tenant_id: tenant_id.into(),
            user_filter: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    pub fn with_user_filter(mut self, user_id: impl Into<String>) -> Self {
        self.user_filter = Some(user_id.into());
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(MonitorError::InvalidConfig("token is empty".into()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(MonitorError::InvalidConfig("tenant id is empty".into()));
        }
        let rest = Url::parse(&self.rest_base)
            .map_err(|e| MonitorError::InvalidConfig(format!("rest base url: {e}")))?;
        if !matches!(rest.scheme(), "http" | "https") {
            return Err(MonitorError::InvalidConfig(format!(
                "rest base url scheme must be http(s), got {}",
                rest.scheme()
            )));
        }
        let stream = Url::parse(&self.stream_url)
            .map_err(|e| MonitorError::InvalidConfig(format!("stream url: {e}")))?;
        if !matches!(stream.scheme(), "ws" | "wss") {
            return Err(MonitorError::InvalidConfig(format!(
                "stream url scheme must be ws(s), got {}",
                stream.scheme()
            )));
        }
        Ok(())
    }

    /// The stream URL with the bearer token appended as the `token`
    /// query parameter, the form the handshake authenticator expects.
    pub(crate) fn authenticated_stream_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.stream_url)
            .map_err(|e| MonitorError::InvalidConfig(format!("stream url: {e}")))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rejects_bad_schemes() {
        let config = MonitorConfig::new("ftp://x", "wss://x/ws/dashboard", "t", "acme");
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidConfig(_))
        ));

        let config = MonitorConfig::new("https://x", "https://x/ws", "t", "acme");
        assert!(matches!(
            config.validate(),
            Err(MonitorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validation_requires_token_and_tenant() {
        let config = MonitorConfig::new("https://x", "wss://x/ws", "", "acme");
        assert!(config.validate().is_err());

        let config = MonitorConfig::new("https://x", "wss://x/ws", "t", "  ");
        assert!(config.validate().is_err());
    }

    #[test]
    fn stream_url_carries_the_token() {
        let config = MonitorConfig::new(
            "https://api.example.com",
            "wss://api.example.com/ws/dashboard",
            "secret token",
            "acme",
        );
        let url = config.authenticated_stream_url().unwrap();
        assert_eq!(
            url,
            "wss://api.example.com/ws/dashboard?token=secret+token"
        );
    }
}
