use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Network configuration
    pub host: String,
    pub port: u16,
    pub backlog_size: i32,
    /// Bind in `Server::new` rather than in `serve`
    pub bind_on_construct: bool,

    // Connection settings
    pub connection_timeout: Duration,
    pub read_chunk_size: usize,
    pub max_request_head: usize,

    // Worker pool
    pub max_workers: usize,
    /// Pending connections the queue holds before the accept loop blocks; 0 is unbounded
    pub queue_capacity: usize,
    /// Upper bound on how long `stop` waits for workers
    pub shutdown_grace: Duration,

    // Content
    pub document_root: PathBuf,
    pub server_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            backlog_size: 128,
            bind_on_construct: true,

            connection_timeout: Duration::from_secs(3),
            read_chunk_size: 1024,
            max_request_head: 8 * 1024, // 8 KB

            max_workers: num_cpus::get(),
            queue_capacity: 1024,
            shutdown_grace: Duration::from_secs(2),

            document_root: PathBuf::from("."),
            server_name: format!("poolhttpd/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    /// Set the directory files are served from
    pub fn with_document_root<P: AsRef<Path>>(mut self, root: P) -> Self {
        self.document_root = root.as_ref().to_path_buf();
        self
    }

    /// Set the number of worker threads
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Set the per-connection socket timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the task queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the value of the `Server` header
    pub fn with_server_name(mut self, name: &str) -> Self {
        self.server_name = name.to_string();
        self
    }

    /// Defer binding until `serve`
    pub fn with_deferred_bind(mut self) -> Self {
        self.bind_on_construct = false;
        self
    }

    /// Set how long `stop` waits for workers to exit
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Get the full address string (host:port)
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the configuration and canonicalize the document root
    pub fn validate(mut self) -> ServerResult<Self> {
        if self.max_workers == 0 {
            return Err(ServerError::Config("max_workers must be positive".to_string()));
        }
        if self.connection_timeout.is_zero() {
            return Err(ServerError::Config(
                "connection_timeout must be non-zero".to_string(),
            ));
        }
        if self.read_chunk_size == 0 {
            return Err(ServerError::Config(
                "read_chunk_size must be positive".to_string(),
            ));
        }

        let root = fs::canonicalize(&self.document_root).map_err(|e| {
            ServerError::Config(format!(
                "document root {} is not accessible: {}",
                self.document_root.display(),
                e
            ))
        })?;
        if !root.is_dir() {
            return Err(ServerError::Config(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        self.document_root = root;

        Ok(self)
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
