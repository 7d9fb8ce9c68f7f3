use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::http::{HttpParser, Response, Status};
use crate::metrics::MetricsCollector;
use crate::static_files::PathResolver;
use log::{debug, info, warn};
use std::sync::Arc;

/// The per-connection pipeline: read, parse, resolve, respond.
///
/// Shared read-only by every worker.
pub struct RequestHandler {
    resolver: PathResolver,
    server_name: String,
    read_chunk_size: usize,
    max_request_head: usize,
    metrics: Arc<MetricsCollector>,
}

impl RequestHandler {
    /// Create a handler serving `config.document_root`
    pub fn new(config: &ServerConfig, metrics: Arc<MetricsCollector>) -> ServerResult<Self> {
        Ok(Self {
            resolver: PathResolver::new(&config.document_root)?,
            server_name: config.server_name.clone(),
            read_chunk_size: config.read_chunk_size,
            max_request_head: config.max_request_head,
            metrics,
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Serve one connection and return the status that was sent.
    ///
    /// An `Err` means no response was written.
    pub fn handle(&self, connection: &mut Connection) -> ServerResult<Status> {
        let head = connection.read_request_head(self.read_chunk_size, self.max_request_head)?;
        let response = self.respond(&head)?;

        connection.write_all(&response.to_bytes()?)?;
        self.metrics.record_response(response.status, connection.bytes_sent());

        Ok(response.status)
    }

    /// Build the response for a raw request head.
    ///
    /// Request-level failures become error responses; anything else is
    /// returned as an error.
    pub fn respond(&self, head: &[u8]) -> ServerResult<Response> {
        match self.serve(head) {
            Ok(response) => Ok(response),
            Err(err) => match err.status() {
                Some(status) => {
                    log_rejection(&err);
                    Ok(Response::error(status, &self.server_name))
                }
                None => Err(err),
            },
        }
    }

    fn serve(&self, head: &[u8]) -> ServerResult<Response> {
        let request = HttpParser::parse_bytes(head)?;
        let file = self.resolver.resolve_servable(&request.path)?;

        debug!(
            "{} {} -> {}",
            request.method,
            request.path,
            file.absolute_path.display()
        );
        Response::for_file(
            request.method,
            &file.absolute_path,
            file.content_type,
            &self.server_name,
        )
    }
}

fn log_rejection(err: &ServerError) {
    match err {
        ServerError::ForbiddenPath(path) => info!("Request escapes document root: {}", path),
        ServerError::NotFound(path) => info!("No such file {}", path.display()),
        other => warn!("Bad request: {}", other),
    }
}
