use std::time::Duration;

use crate::errors::ClientError;

/// Configuration for the HTTP transport.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// URL the run request is posted to.
    pub endpoint: String,
    /// Optional bearer token sent with every request.
    pub bearer_token: Option<String>,
    /// Default HTTP timeout for requests.
    ///
    /// Applies to the whole response, so long runs need a generous value.
    pub timeout: Duration,
}

impl ClientConfig {
    /// Creates a config with sensible defaults for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            bearer_token: None,
            timeout: Duration::from_secs(300),
        }
    }

    /// Builds a config from `AGENT_STREAM_URL`, `AGENT_STREAM_TOKEN` and
    /// `AGENT_STREAM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, ClientError> {
        let endpoint = std::env::var("AGENT_STREAM_URL").unwrap_or_default();
        let token = std::env::var("AGENT_STREAM_TOKEN").ok();
        let timeout = std::env::var("AGENT_STREAM_TIMEOUT_SECS").ok();
        Self::from_parts(&endpoint, token.as_deref(), timeout.as_deref())
    }

    fn from_parts(
        endpoint: &str,
        token: Option<&str>,
        timeout_secs: Option<&str>,
    ) -> Result<Self, ClientError> {
        if endpoint.trim().is_empty() {
            return Err(ClientError::Config(
                "missing AGENT_STREAM_URL for agent endpoint".into(),
            ));
        }
        let mut config = Self::new(endpoint.trim());
        if let Some(token) = token.map(str::trim).filter(|t| !t.is_empty()) {
            config = config.bearer_token(token);
        }
        if let Some(raw) = timeout_secs {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ClientError::Config(format!("AGENT_STREAM_TIMEOUT_SECS is not a number: {raw}"))
            })?;
            config = config.timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_parts_requires_endpoint() {
        let err = ClientConfig::from_parts("  ", None, None).expect_err("empty endpoint");
        assert!(matches!(err, ClientError::Config(msg) if msg.contains("AGENT_STREAM_URL")));
    }

    #[test]
    fn from_parts_reads_token_and_timeout() {
        let config = ClientConfig::from_parts("http://localhost:8000/agent", Some(" secret "), Some("45"))
            .expect("config");
        assert_eq!(config.endpoint, "http://localhost:8000/agent");
        assert_eq!(config.bearer_token.as_deref(), Some("secret"));
        assert_eq!(config.timeout, Duration::from_secs(45));

        let config = ClientConfig::from_parts("http://x", Some(""), None).expect("config");
        assert_eq!(config.bearer_token, None);
        assert_eq!(config.timeout, Duration::from_secs(300));
    }

    #[test]
    fn from_parts_rejects_bad_timeout() {
        assert!(ClientConfig::from_parts("http://x", None, Some("soon")).is_err());
    }
}
