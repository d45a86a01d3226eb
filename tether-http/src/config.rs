//! Session and transport configuration.

use std::time::Duration;

/// Default maximum number of retries for unsolicited cycles.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default delay before a retry is attempted.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of retries for a cycle that is not solicited.
    pub max_retries: u32,
    /// Time to wait before a retry is attempted.
    pub retry_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Builder for session configuration.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Set the maximum number of retries.
    pub fn max_retries(mut self, max: u32) -> Self {
        self.config.max_retries = max;
        self
    }

    /// Set the delay before a retry.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Settings for [`ReqwestTransport`](crate::ReqwestTransport).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound for a whole transfer. Exceeding it reports a timeout,
    /// which the session may retry.
    pub timeout: Duration,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// How long an unused pooled connection is kept.
    pub idle_timeout: Duration,
    /// Idle connections kept per host.
    pub max_idle_connections: usize,
    /// Sent with every request unless the request sets its own value.
    pub headers: Vec<(String, String)>,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Accept gzip and brotli encoded bodies.
    pub compression: bool,
    /// Redirect hops to follow; `None` delivers 3xx responses as they are.
    pub redirect_limit: Option<usize>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            max_idle_connections: 16,
            headers: Vec::new(),
            user_agent: format!("tether-http/{}", env!("CARGO_PKG_VERSION")),
            compression: true,
            redirect_limit: Some(10),
        }
    }
}

impl TransportConfig {
    /// Start from the defaults.
    pub fn builder() -> TransportConfigBuilder {
        TransportConfigBuilder::default()
    }
}

/// Builder for [`TransportConfig`].
#[derive(Debug, Default)]
pub struct TransportConfigBuilder {
    config: TransportConfig,
}

impl TransportConfigBuilder {
    /// Set the whole-transfer timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Tune the connection pool.
    pub fn pool(mut self, idle_timeout: Duration, max_idle_connections: usize) -> Self {
        self.config.idle_timeout = idle_timeout;
        self.config.max_idle_connections = max_idle_connections;
        self
    }

    /// Add a default header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.headers.push((name.into(), value.into()));
        self
    }

    /// Set the user agent.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Enable or disable gzip and brotli decoding.
    pub fn compression(mut self, enable: bool) -> Self {
        self.config.compression = enable;
        self
    }

    /// Follow at most `limit` redirects, or none at all.
    pub fn redirect_limit(mut self, limit: Option<usize>) -> Self {
        self.config.redirect_limit = limit;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> TransportConfig {
        self.config
    }
}
