pub mod config;
pub mod connection;
pub mod date;
pub mod error;
pub mod handler;
pub mod http;
pub mod metrics;
pub mod mime;
pub mod queue;
pub mod server;
pub mod static_files;
pub mod worker;

/// Re-exports of common components for easier access
pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{ServerError, ServerResult};
pub use handler::RequestHandler;
pub use http::{HttpParser, Method, Request, Response, Status};
pub use metrics::{Counter, Gauge, Histogram, MetricsCollector, Timer};
pub use queue::{Task, TaskQueue};
pub use server::Server;
pub use static_files::{PathResolver, ResolvedFile};
pub use worker::{Worker, WorkerState};
