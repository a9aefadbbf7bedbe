use std::time::Duration;

/// Default API root of a local backend.
pub const DEFAULT_API_ROOT: &str = "http://localhost:4000/web_api/v1";

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Root that relative endpoints are joined onto.
    pub api_root: String,

    /// Maximum time to establish a connection.
    pub connect_timeout: Duration,

    /// Maximum time for a whole request.
    pub timeout: Duration,

    /// Bearer token sent with every request, if any.
    pub bearer_token: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            api_root: DEFAULT_API_ROOT.to_string(),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
            bearer_token: None,
        }
    }
}

impl HttpConfig {
    #[must_use]
    pub fn new(api_root: impl Into<String>) -> Self {
        Self {
            api_root: api_root.into(),
            ..Self::default()
        }
    }

    /// Read overrides from `CIVIC_API_ROOT`, `CIVIC_API_TOKEN` and
    /// `CIVIC_HTTP_TIMEOUT_SECS`. Unset or unparsable values keep defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(root) = std::env::var("CIVIC_API_ROOT") {
            config.api_root = root;
        }
        if let Ok(token) = std::env::var("CIVIC_API_TOKEN") {
            if !token.is_empty() {
                config.bearer_token = Some(token);
            }
        }
        if let Some(secs) = std::env::var("CIVIC_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout = Duration::from_secs(secs);
        }
        config
    }

    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, connect_timeout: Duration, timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpConfig::default();
        assert_eq!(config.api_root, DEFAULT_API_ROOT);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.bearer_token.is_none());
    }

    #[test]
    fn test_builders() {
        let config = HttpConfig::new("https://api.example.org")
            .with_bearer_token("jwt")
            .with_timeouts(Duration::from_secs(1), Duration::from_secs(2));
        assert_eq!(config.api_root, "https://api.example.org");
        assert_eq!(config.bearer_token.as_deref(), Some("jwt"));
        assert_eq!(config.timeout, Duration::from_secs(2));
    }
}
