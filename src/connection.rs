use crate::error::{ServerError, ServerResult};
use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// Marks the end of the request head
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// An accepted client connection.
///
/// Owned by exactly one worker while it is being handled.
pub struct Connection {
    stream: TcpStream,
    peer_addr: SocketAddr,
    id: usize,
    buffer: BytesMut,
    bytes_sent: usize,
}

impl Connection {
    /// Create a new connection from a TcpStream
    pub fn new(stream: TcpStream, peer_addr: SocketAddr, id: usize) -> io::Result<Self> {
        // Responses are written in one go, no point in waiting for Nagle
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            peer_addr,
            id,
            buffer: BytesMut::with_capacity(1024),
            bytes_sent: 0,
        })
    }

    /// Apply the per-connection timeout to reads and writes
    pub fn set_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))
    }

    /// Read until the `CRLFCRLF` terminator and return the bytes before it.
    ///
    /// Reads `chunk_size` bytes at a time. Fails with a connection error if
    /// the peer hangs up early, the read times out, or more than `max_head`
    /// bytes arrive without a terminator.
    pub fn read_request_head(&mut self, chunk_size: usize, max_head: usize) -> ServerResult<Bytes> {
        let mut chunk = vec![0u8; chunk_size.max(1)];
        let mut searched = 0;

        loop {
            if let Some(pos) = find_terminator(&self.buffer, searched) {
                let head = self.buffer.split_to(pos).freeze();
                self.buffer.advance(HEAD_TERMINATOR.len());
                return Ok(head);
            }
            // The terminator may straddle two chunks
            searched = self.buffer.len().saturating_sub(HEAD_TERMINATOR.len() - 1);

            if self.buffer.len() > max_head {
                return Err(ServerError::Connection(format!(
                    "request head exceeds {} bytes",
                    max_head
                )));
            }

            let bytes_read = match self.stream.read(&mut chunk) {
                Ok(n) => n,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(ref e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(ServerError::Connection("read timed out".to_string()));
                }
                Err(e) => return Err(ServerError::Io(e)),
            };

            if bytes_read == 0 {
                return Err(ServerError::Connection(
                    "peer closed connection before request was complete".to_string(),
                ));
            }

            self.buffer.extend_from_slice(&chunk[..bytes_read]);
        }
    }

    /// Write a complete response
    pub fn write_all(&mut self, data: &[u8]) -> ServerResult<()> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        self.bytes_sent += data.len();
        Ok(())
    }

    /// Close the connection.
    ///
    /// Only the write half is shut down so the peer receives everything
    /// already written even if it left unread bytes behind.
    pub fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Write) {
            Err(ref e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    /// Get the connection's peer address
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Get the connection's unique ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Total bytes written to the peer
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }
}

fn find_terminator(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(HEAD_TERMINATOR.len())
        .position(|window| window == HEAD_TERMINATOR)
        .map(|pos| pos + from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn pair() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, peer) = listener.accept().unwrap();
        (Connection::new(server, peer, 1).unwrap(), client)
    }

    #[test]
    fn finds_terminator_across_offsets() {
        assert_eq!(find_terminator(b"GET / HTTP/1.0\r\n\r\n", 0), Some(14));
        assert_eq!(find_terminator(b"abc\r\n\r\n", 2), Some(3));
        assert_eq!(find_terminator(b"abc\r\n", 0), None);
        assert_eq!(find_terminator(b"ab", 10), None);
    }

    #[test]
    fn reads_head_in_small_chunks() {
        let (mut conn, mut client) = pair();
        let writer = thread::spawn(move || {
            client.write_all(b"GET /a HTTP/1.0\r\nHost: x\r\n\r\nignored").unwrap();
            client
        });

        let head = conn.read_request_head(3, 1024).unwrap();
        assert_eq!(&head[..], b"GET /a HTTP/1.0\r\nHost: x");
        drop(writer.join().unwrap());
    }

    #[test]
    fn early_hangup_is_a_connection_error() {
        let (mut conn, mut client) = pair();
        client.write_all(b"GET / HTTP/1.0\r\n").unwrap();
        drop(client);

        assert!(matches!(
            conn.read_request_head(16, 1024),
            Err(ServerError::Connection(_))
        ));
    }

    #[test]
    fn oversized_head_is_rejected() {
        let (mut conn, mut client) = pair();
        let writer = thread::spawn(move || {
            let _ = client.write_all(&[b'a'; 256]);
            client
        });

        assert!(matches!(
            conn.read_request_head(64, 100),
            Err(ServerError::Connection(_))
        ));
        drop(writer.join().unwrap());
    }

    #[test]
    fn read_timeout_is_a_connection_error() {
        let (mut conn, _client) = pair();
        conn.set_timeout(Duration::from_millis(50)).unwrap();

        assert!(matches!(
            conn.read_request_head(16, 1024),
            Err(ServerError::Connection(_))
        ));
    }

    #[test]
    fn counts_bytes_written_and_closes_write_half() {
        let (mut conn, mut client) = pair();
        conn.write_all(b"HTTP/1.0 200 OK\r\n\r\n").unwrap();
        conn.write_all(b"body").unwrap();
        assert_eq!(conn.bytes_sent(), 23);
        conn.close().unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert_eq!(received.len(), conn.bytes_sent());
    }
}
