use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Linkscope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Worker pool and crawl scope configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of concurrent workers (0 picks twice the CPU count)
    pub workers: usize,

    /// Capacity of the job queue
    #[serde(rename = "queue-capacity")]
    pub queue_capacity: usize,

    /// Upper bound on one crawl attempt, including every link probe (seconds)
    #[serde(rename = "crawl-timeout-secs")]
    pub crawl_timeout_secs: u64,

    /// Per-subscriber progress buffer
    #[serde(rename = "progress-buffer")]
    pub progress_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_capacity: 100,
            crawl_timeout_secs: 45,
            progress_buffer: 4,
        }
    }
}

impl EngineConfig {
    /// Resolves the configured worker count, defaulting to 2× the CPU count
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get() * 2
        } else {
            self.workers
        }
    }

    pub fn crawl_timeout(&self) -> Duration {
        Duration::from_secs(self.crawl_timeout_secs)
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// User-Agent header sent with every request
    #[serde(rename = "user-agent")]
    pub user_agent: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "request-timeout-secs")]
    pub request_timeout_secs: u64,

    /// TCP connect timeout (seconds)
    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,

    /// Maximum redirect hops followed per request
    #[serde(rename = "max-redirects")]
    pub max_redirects: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("linkscope/{}", env!("CARGO_PKG_VERSION")),
            request_timeout_secs: 10,
            connect_timeout_secs: 5,
            max_redirects: 10,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "./linkscope.db".to_string(),
        }
    }
}
