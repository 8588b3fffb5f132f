//! Session operations abstraction
//!
//! Connections are driven through the [`SessionOps`] trait so that the
//! request handler and the test client work the same over plain TCP and TLS.
//! [`HttpSession`] layers a read buffer on top, which the request parser needs
//! to pull one line at a time without losing bytes that belong to the body.

use super::{Error, Result};
use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

const READ_CHUNK: usize = 8192;

/// Session operations trait
///
/// This trait defines the operations that can be performed on a session,
/// abstracting over plain TCP and TLS connections.
pub trait SessionOps {
    /// Poll the session for events
    ///
    /// Returns true if the session is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the session. `Ok(0)` means the peer is done sending.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the session
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush buffered output
    fn flush(&mut self) -> Result<()>;

    /// Close the session
    fn close(&mut self) -> Result<()>;

    /// Address of the remote end
    fn peer_addr(&self) -> Result<SocketAddr>;
}

/// A session whose transport is picked at runtime
pub type BoxedSession = Box<dyn SessionOps>;

impl<T: SessionOps + ?Sized> SessionOps for Box<T> {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        (**self).poll(events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        (**self).peer_addr()
    }
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
}

/// Wait for `events` on a raw descriptor; `None` waits forever
pub(crate) fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
        },
        revents: 0,
    };

    let timeout_ms = timeout
        .map(|d| i32::try_from(d.as_millis()).unwrap_or(i32::MAX))
        .unwrap_or(-1);

    loop {
        let result = unsafe { poll(&mut pfd as *mut pollfd, 1, timeout_ms) };
        if result >= 0 {
            return Ok(result > 0);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(Error::Io(err));
        }
    }
}

/// HTTP session wrapping a transport with a read buffer
pub struct HttpSession<S: SessionOps> {
    session: S,
    timeout: Option<Duration>,
    buffer: BytesMut,
}

impl<S: SessionOps> HttpSession<S> {
    /// Create a new HTTP session without an I/O timeout
    pub fn new(session: S) -> Self {
        HttpSession {
            session,
            timeout: None,
            buffer: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Set the timeout for operations
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Read one line, terminator included.
    ///
    /// At most `limit + 1` bytes are returned so callers can tell an
    /// over-long line from one that fits exactly. At end of stream the
    /// remaining buffered bytes are returned, which may be empty.
    pub fn read_line(&mut self, limit: usize) -> Result<Vec<u8>> {
        let max = limit.saturating_add(1);
        loop {
            let scan = self.buffer.len().min(max);
            if let Some(pos) = self.buffer[..scan].iter().position(|&b| b == b'\n') {
                return Ok(self.buffer.split_to(pos + 1).to_vec());
            }
            if self.buffer.len() >= max {
                return Ok(self.buffer.split_to(max).to_vec());
            }
            if self.fill()? == 0 {
                return Ok(self.buffer.split().to_vec());
            }
        }
    }

    /// Read data, serving buffered bytes first
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.buffer.is_empty() {
            let n = buf.len().min(self.buffer.len());
            buf[..n].copy_from_slice(&self.buffer[..n]);
            self.buffer.advance(n);
            return Ok(n);
        }
        self.read_transport(buf)
    }

    /// Read until the peer closes the stream
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize> {
        let start = out.len();
        out.extend_from_slice(&self.buffer);
        self.buffer.clear();

        let mut temp = [0u8; READ_CHUNK];
        loop {
            let n = self.read_transport(&mut temp)?;
            if n == 0 {
                return Ok(out.len() - start);
            }
            out.extend_from_slice(&temp[..n]);
        }
    }

    /// Write the whole buffer
    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            if let Some(timeout) = self.timeout {
                if !self.session.poll(PollEvents::Write, Some(timeout))? {
                    return Err(Error::Timeout);
                }
            }
            let n = self.session.write(buf)?;
            if n == 0 {
                return Err(Error::ConnectionClosed);
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Flush the transport
    pub fn flush(&mut self) -> Result<()> {
        self.session.flush()
    }

    /// Close the session
    pub fn close(&mut self) -> Result<()> {
        self.session.close()
    }

    fn fill(&mut self) -> Result<usize> {
        let mut temp = [0u8; READ_CHUNK];
        let n = self.read_transport(&mut temp)?;
        self.buffer.extend_from_slice(&temp[..n]);
        Ok(n)
    }

    fn read_transport(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Some(timeout) = self.timeout {
            if !self.session.poll(PollEvents::Read, Some(timeout))? {
                return Err(Error::Timeout);
            }
        }
        self.session.read(buf)
    }
}

/// Plain file descriptor session operations
pub struct FdSessionOps {
    stream: TcpStream,
}

impl FdSessionOps {
    /// Create a new FD session operations from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        FdSessionOps { stream }
    }
}

impl SessionOps for FdSessionOps {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush().map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }

    fn peer_addr(&self) -> Result<SocketAddr> {
        self.stream.peer_addr().map_err(Error::from)
    }
}

/// Helper to create an HTTP session from a TCP stream
pub fn from_tcp_stream(stream: TcpStream) -> HttpSession<FdSessionOps> {
    HttpSession::new(FdSessionOps::new(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_fd_session_ops() {
        let (mut client, server) = connected_pair();
        client.write_all(b"Hello").unwrap();

        let mut session = FdSessionOps::new(server);
        assert!(session.poll(PollEvents::Read, Some(Duration::from_secs(1))).unwrap());

        let mut buf = [0u8; 5];
        let n = session.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"Hello");
    }

    #[test]
    fn test_read_line_keeps_body_bytes() {
        let (mut client, server) = connected_pair();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\nbody")
            .unwrap();
        client.shutdown(Shutdown::Write).unwrap();

        let mut session = from_tcp_stream(server);
        assert_eq!(session.read_line(100).unwrap(), b"GET / HTTP/1.1\r\n");
        assert_eq!(session.read_line(100).unwrap(), b"Host: x\r\n");
        assert_eq!(session.read_line(100).unwrap(), b"\r\n");

        let mut rest = Vec::new();
        session.read_to_end(&mut rest).unwrap();
        assert_eq!(rest, b"body");
    }

    #[test]
    fn test_read_line_limit() {
        let (mut client, server) = connected_pair();
        client.write_all(b"abcdefghij\r\n").unwrap();

        let mut session = from_tcp_stream(server);
        let line = session.read_line(4).unwrap();
        assert_eq!(line, b"abcde");
    }

    #[test]
    fn test_read_line_at_eof() {
        let (client, server) = connected_pair();
        drop(client);

        let mut session = from_tcp_stream(server);
        assert!(session.read_line(100).unwrap().is_empty());
    }

    #[test]
    fn test_http_session_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let _handle = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(2));
        });

        let stream = TcpStream::connect(addr).unwrap();
        let mut session = from_tcp_stream(stream);
        session.set_timeout(Some(Duration::from_millis(100)));

        let mut buf = [0u8; 10];
        let result = session.read(&mut buf);
        assert!(matches!(result.unwrap_err(), Error::Timeout));
    }
}
