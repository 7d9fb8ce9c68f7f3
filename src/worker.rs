use crate::handler::RequestHandler;
use crate::metrics::MetricsCollector;
use crate::queue::{Task, TaskQueue};
use crossbeam::channel::Sender;
use log::{debug, error, info};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Lifecycle of a worker thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Blocked on the queue
    Idle,
    /// Running the pipeline against a live connection
    Handling,
    /// Popped the shutdown sentinel
    Stopped,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Idle,
            1 => WorkerState::Handling,
            _ => WorkerState::Stopped,
        }
    }
}

/// A long-lived thread consuming connections from the task queue
pub struct Worker {
    id: usize,
    state: Arc<AtomicU8>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Spawn a worker thread.
    ///
    /// The worker sends its id on `done` once it leaves its loop.
    pub fn spawn(
        id: usize,
        queue: TaskQueue,
        handler: Arc<RequestHandler>,
        metrics: Arc<MetricsCollector>,
        done: Sender<usize>,
    ) -> io::Result<Self> {
        let state = Arc::new(AtomicU8::new(WorkerState::Idle as u8));
        let thread_state = state.clone();

        let handle = thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || {
                run(id, &queue, &handler, &metrics, &thread_state);
                thread_state.store(WorkerState::Stopped as u8, Ordering::SeqCst);
                let _ = done.send(id);
            })?;

        Ok(Self { id, state, handle })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Current state of the worker
    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Wait for the thread to exit
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run(
    id: usize,
    queue: &TaskQueue,
    handler: &RequestHandler,
    metrics: &MetricsCollector,
    state: &AtomicU8,
) {
    info!("Worker {} started", id);

    loop {
        let mut connection = match queue.pop() {
            Task::Connection(connection) => connection,
            Task::Shutdown => break,
        };

        state.store(WorkerState::Handling as u8, Ordering::SeqCst);
        metrics.handling().increment();
        let timer = metrics.time_handling();

        let peer = connection.peer_addr();
        debug!("Worker {} manages request from {}", id, peer);

        match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&mut connection))) {
            Ok(Ok(status)) => debug!("Worker {} finished with {} ({})", id, peer, status),
            Ok(Err(e)) => {
                metrics.record_connection("failed");
                error!("Worker {} cannot handle {}. Error: {}", id, peer, e);
            }
            Err(_) => {
                metrics.record_connection("failed");
                error!("Worker {} panicked while handling {}", id, peer);
            }
        }

        if let Err(e) = connection.close() {
            debug!("Worker {} failed to close {}: {}", id, peer, e);
        }
        drop(connection);
        drop(timer);

        metrics.handling().decrement();
        state.store(WorkerState::Idle as u8, Ordering::SeqCst);
    }

    info!("Worker {} stopped", id);
}
