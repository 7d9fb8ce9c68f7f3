use crate::connection::Connection;
use crate::error::{ServerError, ServerResult};
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender};
use std::time::Instant;

/// A unit of work handed from the accept loop to a worker
pub enum Task {
    /// An accepted connection waiting to be handled
    Connection(Connection),
    /// Tells the worker that pops it to exit
    Shutdown,
}

/// FIFO of pending connections shared by the accept loop and the workers.
///
/// Cloning yields another handle onto the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` tasks; 0 means unbounded
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = if capacity == 0 {
            channel::unbounded()
        } else {
            channel::bounded(capacity)
        };

        Self { sender, receiver }
    }

    /// Enqueue a task, blocking while the queue is full
    pub fn push(&self, task: Task) -> ServerResult<()> {
        self.sender
            .send(task)
            .map_err(|_| ServerError::Connection("task queue disconnected".to_string()))
    }

    /// Enqueue a task, waiting for room no later than `deadline`.
    ///
    /// On failure the task is handed back inside the error.
    pub fn push_deadline(&self, task: Task, deadline: Instant) -> Result<(), SendTimeoutError<Task>> {
        self.sender.send_deadline(task, deadline)
    }

    /// Enqueue a task only if there is room right now
    pub fn try_push(&self, task: Task) -> ServerResult<()> {
        self.sender
            .try_send(task)
            .map_err(|_| ServerError::Connection("task queue full".to_string()))
    }

    /// Enqueue one shutdown sentinel
    pub fn push_shutdown(&self) -> ServerResult<()> {
        self.push(Task::Shutdown)
    }

    /// Remove every task currently waiting, without blocking
    pub fn drain(&self) -> Vec<Task> {
        self.receiver.try_iter().collect()
    }

    /// Dequeue the oldest task, blocking while the queue is empty.
    ///
    /// A disconnected queue reads as `Shutdown`.
    pub fn pop(&self) -> Task {
        self.receiver.recv().unwrap_or(Task::Shutdown)
    }

    /// Number of tasks waiting
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Maximum number of queued tasks, `None` when unbounded
    pub fn capacity(&self) -> Option<usize> {
        self.sender.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use std::time::Duration;

    fn connection(listener: &TcpListener, id: usize) -> (Connection, TcpStream) {
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (stream, peer) = listener.accept().unwrap();
        (Connection::new(stream, peer, id).unwrap(), client)
    }

    #[test]
    fn pops_in_fifo_order() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let queue = TaskQueue::new(8);
        let mut clients = Vec::new();

        for id in 0..3 {
            let (conn, client) = connection(&listener, id);
            clients.push(client);
            queue.push(Task::Connection(conn)).unwrap();
        }
        queue.push_shutdown().unwrap();
        assert_eq!(queue.len(), 4);

        for expected in 0..3 {
            match queue.pop() {
                Task::Connection(conn) => assert_eq!(conn.id(), expected),
                Task::Shutdown => panic!("sentinel arrived early"),
            }
        }
        assert!(matches!(queue.pop(), Task::Shutdown));
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_blocks_until_push() {
        let queue = TaskQueue::new(0);
        assert_eq!(queue.capacity(), None);

        let consumer = queue.clone();
        let handle = thread::spawn(move || matches!(consumer.pop(), Task::Shutdown));

        thread::sleep(Duration::from_millis(50));
        queue.push_shutdown().unwrap();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn bounded_push_waits_for_room() {
        let queue = TaskQueue::new(1);
        assert_eq!(queue.capacity(), Some(1));
        queue.push_shutdown().unwrap();

        let producer = queue.clone();
        let handle = thread::spawn(move || producer.push_shutdown().is_ok());

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len(), 1);
        assert!(matches!(queue.pop(), Task::Shutdown));
        assert!(handle.join().unwrap());
        assert!(matches!(queue.pop(), Task::Shutdown));
    }

    #[test]
    fn push_deadline_gives_task_back_when_full() {
        let queue = TaskQueue::new(1);
        queue.push_shutdown().unwrap();

        let start = Instant::now();
        let result = queue.push_deadline(Task::Shutdown, start + Duration::from_millis(50));
        assert!(matches!(result, Err(SendTimeoutError::Timeout(Task::Shutdown))));
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(queue.try_push(Task::Shutdown).is_err());
    }

    #[test]
    fn drain_empties_the_queue() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let queue = TaskQueue::new(4);
        let (conn, _client) = connection(&listener, 7);
        queue.push(Task::Connection(conn)).unwrap();
        queue.try_push(Task::Shutdown).unwrap();

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(matches!(&drained[0], Task::Connection(conn) if conn.id() == 7));
        assert!(matches!(drained[1], Task::Shutdown));
        assert!(queue.is_empty());
    }
}
