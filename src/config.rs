//! Configuration for the job client.
//!
//! Everything the client needs to reach the ingestion service lives in
//! [`ClientConfig`], built via its [`ClientConfigBuilder`]. The config is
//! passed explicitly into [`crate::client::JobClient::new`]; the library never
//! reads process-wide state on its own. [`ClientConfig::from_env`] exists for
//! binaries that want the classic `HTTP_HOST` / `HTTP_PORT` / `TASK_QUEUE`
//! variables, but it is opt-in.

use crate::error::IngestError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default service host.
pub const DEFAULT_HOST: &str = "localhost";
/// Default service port.
pub const DEFAULT_PORT: u16 = 7670;
/// Default queue that the remote engine polls for new jobs.
pub const DEFAULT_TASK_QUEUE: &str = "morpheus_task_queue";
/// Default bound on a single result fetch, in milliseconds.
pub const DEFAULT_JOB_TIMEOUT_MS: u64 = 10_000;

/// Configuration for a [`crate::client::JobClient`].
///
/// # Example
/// ```rust
/// use edgequake_ingest::ClientConfig;
///
/// let config = ClientConfig::builder()
///     .host("ingest.internal")
///     .port(7670)
///     .task_queue("morpheus_task_queue")
///     .job_timeout_ms(30_000)
///     .build()
///     .unwrap();
/// assert_eq!(config.base_url(), "http://ingest.internal:7670");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service host name or address. Default: `localhost`.
    pub host: String,

    /// Service port. Default: 7670.
    pub port: u16,

    /// Use `https://` instead of `http://`. Default: false.
    pub use_tls: bool,

    /// Queue name used as the routing key on submission. Default: `morpheus_task_queue`.
    pub task_queue: String,

    /// Default bound on [`crate::client::JobClient::fetch_job_result_default`]
    /// in milliseconds. Default: 10 000.
    pub job_timeout_ms: u64,

    /// Delay between result polls in milliseconds. Default: 250.
    ///
    /// The service answers `202 Accepted` until the job is done. Short polls
    /// keep latency low for small documents; raise this when many clients
    /// share one service.
    pub poll_interval_ms: u64,

    /// Per-HTTP-request timeout in seconds. Default: 30.
    ///
    /// Bounds a single submit or poll request. It is independent of the job
    /// timeout, which bounds the whole wait for a result.
    pub request_timeout_secs: u64,

    /// Number of documents processed concurrently by
    /// [`crate::ingest::ingest_many`]. Default: 1.
    pub concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            use_tls: false,
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            job_timeout_ms: DEFAULT_JOB_TIMEOUT_MS,
            poll_interval_ms: 250,
            request_timeout_secs: 30,
            concurrency: 1,
        }
    }
}

impl ClientConfig {
    /// Create a new builder for `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by `HTTP_HOST`, `HTTP_PORT` and `TASK_QUEUE`.
    ///
    /// Empty variables are ignored. An unparsable port is an error rather than
    /// a silent fallback.
    pub fn from_env() -> Result<Self, IngestError> {
        let mut builder = Self::builder();

        if let Some(host) = non_empty_var("HTTP_HOST") {
            builder = builder.host(host);
        }
        if let Some(port) = non_empty_var("HTTP_PORT") {
            let port = port.parse::<u16>().map_err(|_| {
                IngestError::InvalidConfig(format!("HTTP_PORT must be a port number, got '{port}'"))
            })?;
            builder = builder.port(port);
        }
        if let Some(queue) = non_empty_var("TASK_QUEUE") {
            builder = builder.task_queue(queue);
        }

        builder.build()
    }

    /// Base URL of the REST service, e.g. `http://localhost:7670`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    /// Never zero, even for a config that skipped the builder.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn use_tls(mut self, v: bool) -> Self {
        self.config.use_tls = v;
        self
    }

    pub fn task_queue(mut self, queue: impl Into<String>) -> Self {
        self.config.task_queue = queue.into();
        self
    }

    pub fn job_timeout_ms(mut self, ms: u64) -> Self {
        self.config.job_timeout_ms = ms;
        self
    }

    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms.max(1);
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ClientConfig, IngestError> {
        let c = &self.config;
        if c.host.trim().is_empty() {
            return Err(IngestError::InvalidConfig("Host must not be empty".into()));
        }
        if c.port == 0 {
            return Err(IngestError::InvalidConfig("Port must be 1–65535".into()));
        }
        if c.task_queue.trim().is_empty() {
            return Err(IngestError::InvalidConfig(
                "Task queue name must not be empty".into(),
            ));
        }
        if c.job_timeout_ms == 0 {
            return Err(IngestError::InvalidConfig(
                "Job timeout must be ≥ 1ms".into(),
            ));
        }
        if c.request_timeout_secs == 0 {
            return Err(IngestError::InvalidConfig(
                "Request timeout must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}
