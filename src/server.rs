use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::metrics::MetricsCollector;
use crate::queue::{Task, TaskQueue};
use crate::worker::{Worker, WorkerState};
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long `stop` spends dialing its own listener to wake `accept`
const WAKE_TIMEOUT: Duration = Duration::from_millis(100);

/// How often the accept loop rechecks the shutdown flag while the queue is full
const ENQUEUE_POLL: Duration = Duration::from_millis(50);

/// Static file server: one accept loop feeding a fixed pool of workers.
///
/// Share it through an `Arc`: one thread blocks in [`Server::serve`] while
/// another calls [`Server::stop`].
pub struct Server {
    config: ServerConfig,
    address: SocketAddr,
    listener: Socket,
    bound: AtomicBool,
    shutdown: AtomicBool,
    queue: TaskQueue,
    handler: Arc<RequestHandler>,
    metrics: Arc<MetricsCollector>,
    workers: Mutex<Vec<Worker>>,
    done_tx: Sender<usize>,
    done_rx: Receiver<usize>,
    accepting: AtomicBool,
    accept_done_tx: Sender<()>,
    accept_done_rx: Receiver<()>,
    connection_count: AtomicUsize,
}

impl Server {
    /// Validate the configuration and create the listening socket.
    ///
    /// Binds immediately unless the config defers it to `serve`.
    pub fn new(config: ServerConfig) -> ServerResult<Self> {
        let config = config.validate()?;

        let address = config
            .socket_address()
            .to_socket_addrs()
            .map_err(|e| ServerError::Config(format!("invalid address {}: {}", config.socket_address(), e)))?
            .next()
            .ok_or_else(|| ServerError::Config(format!("no address for {}", config.socket_address())))?;

        let listener = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
        listener.set_reuse_address(true)?;

        let metrics = Arc::new(MetricsCollector::new());
        let handler = Arc::new(RequestHandler::new(&config, metrics.clone())?);
        let (done_tx, done_rx) = channel::unbounded();
        let (accept_done_tx, accept_done_rx) = channel::bounded(1);

        let server = Self {
            queue: TaskQueue::new(config.queue_capacity),
            config,
            address,
            listener,
            bound: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            handler,
            metrics,
            workers: Mutex::new(Vec::new()),
            done_tx,
            done_rx,
            accepting: AtomicBool::new(false),
            accept_done_tx,
            accept_done_rx,
            connection_count: AtomicUsize::new(0),
        };

        if server.config.bind_on_construct {
            server.bind()?;
        }

        Ok(server)
    }

    /// Bind and listen, unless already bound
    pub fn bind(&self) -> ServerResult<()> {
        if self.bound.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.listener
            .bind(&self.address.into())
            .map_err(|e| ServerError::Config(format!("cannot bind {}: {}", self.address, e)))?;
        self.listener.listen(self.config.backlog_size)?;
        self.bound.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        self.listener
            .local_addr()?
            .as_socket()
            .ok_or_else(|| ServerError::Connection("listener has no inet address".to_string()))
    }

    /// The validated configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// States of the workers currently in the pool
    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.lock().iter().map(Worker::state).collect()
    }

    /// Bind if needed, start the workers, and run the accept loop until
    /// `stop` is called.
    pub fn serve(&self) -> ServerResult<()> {
        if self.is_shutting_down() {
            return Ok(());
        }

        self.bind()?;
        self.start_workers()?;

        info!("Listening at {}...", self.local_addr()?);
        info!("Serving files from: {}", self.handler.resolver().root().display());

        self.accept_loop();
        Ok(())
    }

    fn start_workers(&self) -> ServerResult<()> {
        // Holding the lock orders this against stop_workers taking the pool
        let mut workers = self.workers.lock();
        if self.is_shutting_down() {
            return Ok(());
        }
        if !workers.is_empty() {
            return Err(ServerError::Config("server is already serving".to_string()));
        }

        info!("Starting {} workers...", self.config.max_workers);
        for id in 1..=self.config.max_workers {
            let worker = Worker::spawn(
                id,
                self.queue.clone(),
                self.handler.clone(),
                self.metrics.clone(),
                self.done_tx.clone(),
            )?;
            workers.push(worker);
        }

        Ok(())
    }

    fn accept_loop(&self) {
        self.accepting.store(true, Ordering::SeqCst);
        while !self.is_shutting_down() {
            match self.listener.accept() {
                Ok((socket, addr)) => {
                    if self.is_shutting_down() {
                        debug!("Dropping connection accepted during shutdown");
                        break;
                    }

                    let Some(peer) = addr.as_socket() else {
                        warn!("Accepted connection without an inet peer address");
                        continue;
                    };

                    if let Err(e) = self.enqueue(socket.into(), peer) {
                        self.metrics.record_connection("failed");
                        error!("Cannot queue connection from {}: {}", peer, e);
                    }
                }
                Err(_) if self.is_shutting_down() => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.metrics.record_accept_error();
                    error!("Error accepting connection: {}", e);
                }
            }
        }

        info!("Accept loop finished");
        let _ = self.accept_done_tx.try_send(());
    }

    fn enqueue(&self, stream: TcpStream, peer: SocketAddr) -> ServerResult<()> {
        let id = self.connection_count.fetch_add(1, Ordering::Relaxed);
        let connection = Connection::new(stream, peer, id)?;
        connection.set_timeout(self.config.connection_timeout)?;

        info!("Connected by {}", peer);
        self.metrics.record_connection("accepted");

        let mut task = Task::Connection(connection);
        loop {
            if self.is_shutting_down() {
                debug!("Closing connection from {} accepted during shutdown", peer);
                close_pending(task);
                return Ok(());
            }

            match self.queue.push_deadline(task, Instant::now() + ENQUEUE_POLL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(pending)) => task = pending,
                Err(SendTimeoutError::Disconnected(_)) => {
                    return Err(ServerError::Connection("task queue disconnected".to_string()))
                }
            }
        }
    }

    /// Stop accepting, drain the workers, and wait for them to exit.
    ///
    /// Waits at most `shutdown_grace` for the workers. Connections still
    /// queued when the grace period ends are closed unanswered. Only the
    /// first call has any effect.
    pub fn stop(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Got a shutdown request...");
        let deadline = Instant::now() + self.config.shutdown_grace;

        if self.bound.load(Ordering::SeqCst) {
            if let Err(e) = self.listener.shutdown(Shutdown::Both) {
                debug!("Listener shutdown: {}", e);
            }
            // Not every platform wakes a blocked accept() on shutdown
            if let Ok(addr) = self.local_addr() {
                let _ = TcpStream::connect_timeout(&wake_address(addr), WAKE_TIMEOUT);
            }
        }

        // No task may be queued behind the drain below
        if self.accepting.load(Ordering::SeqCst) {
            let wait = deadline
                .saturating_duration_since(Instant::now())
                .max(ENQUEUE_POLL * 2);
            if self.accept_done_rx.recv_timeout(wait).is_err() {
                warn!("Accept loop did not finish within {:?}", wait);
            }
        }

        self.stop_workers(deadline);
    }

    fn stop_workers(&self, deadline: Instant) {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }

        info!("Killing workers...");
        for _ in &workers {
            if let Err(e) = self.queue.push_deadline(Task::Shutdown, deadline) {
                warn!("Cannot queue shutdown sentinel: {}", e);
                break;
            }
        }

        let mut finished = HashSet::new();
        while finished.len() < workers.len() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.done_rx.recv_timeout(remaining) {
                Ok(id) => {
                    finished.insert(id);
                }
                Err(_) => break,
            }
        }

        // Nothing will serve what is still queued
        let mut closed = 0;
        for task in self.queue.drain() {
            if let Task::Connection(_) = task {
                closed += 1;
            }
            close_pending(task);
        }
        if closed > 0 {
            info!("Closed {} queued connections", closed);
        }

        for worker in workers {
            let id = worker.id();
            if !finished.contains(&id) {
                warn!("Worker {} did not stop within {:?}", id, self.config.shutdown_grace);
                // Lets it exit once its current connection is done
                let _ = self.queue.try_push(Task::Shutdown);
                continue;
            }
            if worker.join().is_err() {
                error!("Worker {} panicked", id);
            }
        }

        info!("Server shutdown complete");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

fn close_pending(task: Task) {
    if let Task::Connection(mut connection) = task {
        if let Err(e) = connection.close() {
            debug!("Failed to close {}: {}", connection.peer_addr(), e);
        }
    }
}

/// Wildcard listeners are reached through loopback
fn wake_address(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), addr.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), addr.port()),
        _ => addr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_address_replaces_wildcards() {
        let v4: SocketAddr = "0.0.0.0:8080".parse().unwrap();
        assert_eq!(wake_address(v4), "127.0.0.1:8080".parse().unwrap());

        let v6: SocketAddr = "[::]:9000".parse().unwrap();
        assert_eq!(wake_address(v6), "[::1]:9000".parse().unwrap());

        let fixed: SocketAddr = "10.0.0.1:80".parse().unwrap();
        assert_eq!(wake_address(fixed), fixed);
    }
}
