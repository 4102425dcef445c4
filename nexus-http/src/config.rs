//! HTTP client configuration.

use std::time::Duration;

use tracing::warn;

use crate::ResponseType;

/// Environment variable holding the base URL.
pub const ENV_BASE_URL: &str = "NEXUS_HTTP_BASE_URL";
/// Environment variable holding the default timeout in milliseconds.
pub const ENV_TIMEOUT_MS: &str = "NEXUS_HTTP_TIMEOUT_MS";
/// Environment variable holding the default response type.
pub const ENV_RESPONSE_TYPE: &str = "NEXUS_HTTP_RESPONSE_TYPE";
/// Environment variable enabling lifecycle debug logging.
pub const ENV_DEBUG: &str = "NEXUS_HTTP_DEBUG";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL joined in front of relative request paths.
    pub base_url: Option<String>,
    /// Response type used when a call does not pick one.
    pub default_response_type: ResponseType,
    /// Default request timeout. `None` (or zero) means no timeout.
    pub timeout: Option<Duration>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Default headers for all requests.
    pub default_headers: Vec<(String, String)>,
    /// User agent string.
    pub user_agent: String,
    /// Enable gzip decoding (fetch transport).
    pub gzip: bool,
    /// Enable brotli decoding (fetch transport).
    pub brotli: bool,
    /// Follow redirects.
    pub follow_redirects: bool,
    /// Maximum redirects to follow.
    pub max_redirects: usize,
    /// Log lifecycle events at debug level for every call.
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_response_type: ResponseType::Json,
            timeout: None,
            connect_timeout: Duration::from_secs(10),
            default_headers: Vec::new(),
            user_agent: format!("nexus-http/{}", env!("CARGO_PKG_VERSION")),
            gzip: true,
            brotli: true,
            follow_redirects: true,
            max_redirects: 10,
            debug: false,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults overlaid with the `NEXUS_HTTP_*` environment variables.
    ///
    /// Values that fail to parse are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            config.base_url = Some(base_url.trim().to_string());
        }

        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            match raw.trim().parse::<i64>() {
                Ok(ms) if ms > 0 => config.timeout = Some(Duration::from_millis(ms as u64)),
                Ok(_) => config.timeout = None,
                Err(_) => warn!(var = ENV_TIMEOUT_MS, value = %raw, "Ignoring invalid timeout"),
            }
        }

        if let Some(raw) = lookup(ENV_RESPONSE_TYPE) {
            match raw.parse::<ResponseType>() {
                Ok(response_type) => config.default_response_type = response_type,
                Err(_) => warn!(var = ENV_RESPONSE_TYPE, value = %raw, "Ignoring invalid response type"),
            }
        }

        if let Some(raw) = lookup(ENV_DEBUG) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.debug = true,
                "0" | "false" | "no" | "off" | "" => config.debug = false,
                _ => warn!(var = ENV_DEBUG, value = %raw, "Ignoring invalid debug flag"),
            }
        }

        config
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Set the base URL for all requests.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the default response type.
    pub fn default_response_type(mut self, response_type: ResponseType) -> Self {
        self.config.default_response_type = response_type;
        self
    }

    /// Set the default request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Add a default header for all requests.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.push((name.into(), value.into()));
        self
    }

    /// Set the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip decoding.
    pub fn gzip(mut self, enable: bool) -> Self {
        self.config.gzip = enable;
        self
    }

    /// Enable or disable brotli decoding.
    pub fn brotli(mut self, enable: bool) -> Self {
        self.config.brotli = enable;
        self
    }

    /// Enable or disable following redirects.
    pub fn follow_redirects(mut self, enable: bool) -> Self {
        self.config.follow_redirects = enable;
        self
    }

    /// Set the maximum number of redirects to follow.
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.config.max_redirects = max;
        self
    }

    /// Enable or disable lifecycle debug logging.
    pub fn debug(mut self, enable: bool) -> Self {
        self.config.debug = enable;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}
