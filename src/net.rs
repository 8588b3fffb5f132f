//! Listening sockets and the shutdown waker
//!
//! The accept loop blocks in `poll(2)` on two descriptors: the listening
//! socket and the read end of a socket pair. Writing a byte into the other
//! end (or dropping it) wakes the loop so it can exit.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

/// Backlog of the listening socket
pub const LISTEN_BACKLOG: i32 = 5;

/// Result type for socket setup
pub type Result<T> = std::result::Result<T, Error>;

/// Socket errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Whether another socket already holds the address
    pub fn is_addr_in_use(&self) -> bool {
        matches!(self, Error::Bind { source, .. } if source.kind() == io::ErrorKind::AddrInUse)
    }
}

fn bind_error(addr: SocketAddr) -> impl Fn(io::Error) -> Error {
    move |source| Error::Bind { addr, source }
}

/// Bind and listen on `addr` with `SO_REUSEADDR`
///
/// The returned listener is non-blocking; wait for it with [`wait_for_accept`].
pub fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_error(addr))?;
    socket.set_reuse_address(true).map_err(bind_error(addr))?;
    socket.bind(&addr.into()).map_err(bind_error(addr))?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error(addr))?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Create a connected trigger/signal pair
pub fn shutdown_channel() -> Result<(ShutdownTrigger, ShutdownSignal)> {
    let (tx, rx) = UnixStream::pair()?;
    tx.set_nonblocking(true)?;
    rx.set_nonblocking(true)?;
    Ok((ShutdownTrigger { stream: tx }, ShutdownSignal { stream: rx }))
}

/// Sending half; dropping it also counts as a shutdown request
#[derive(Debug)]
pub struct ShutdownTrigger {
    stream: UnixStream,
}

impl ShutdownTrigger {
    /// Ask the accept loop to exit
    pub fn trigger(&self) -> io::Result<()> {
        match (&self.stream).write(&[1]) {
            Ok(_) => Ok(()),
            // buffer full: a wakeup is already pending
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Receiving half, polled by the accept loop
#[derive(Debug)]
pub struct ShutdownSignal {
    stream: UnixStream,
}

/// What woke up [`wait_for_accept`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// A connection is waiting to be accepted
    Acceptable,
    /// Shutdown was requested
    Shutdown,
}

/// Block until a connection arrives or shutdown is requested
///
/// Shutdown wins when both are ready.
pub fn wait_for_accept(listener: &TcpListener, signal: &ShutdownSignal) -> io::Result<Readiness> {
    use libc::{poll, pollfd, POLLIN};

    let mut fds = [
        pollfd {
            fd: listener.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        },
        pollfd {
            fd: signal.stream.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        },
    ];

    loop {
        let result = unsafe { poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }

        if fds[1].revents != 0 {
            return Ok(Readiness::Shutdown);
        }
        if fds[0].revents != 0 {
            return Ok(Readiness::Acceptable);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn test_bind_reports_port() {
        let listener = bind_listener(loopback()).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_collision() {
        let first = bind_listener(loopback()).unwrap();
        let taken = first.local_addr().unwrap();

        let err = bind_listener(taken).unwrap_err();
        assert!(err.is_addr_in_use(), "unexpected error: {}", err);
        assert!(err.to_string().contains(&taken.to_string()));
    }

    #[test]
    fn test_connection_wakes_poll() {
        let listener = bind_listener(loopback()).unwrap();
        let (_trigger, signal) = shutdown_channel().unwrap();

        let _client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        assert_eq!(
            wait_for_accept(&listener, &signal).unwrap(),
            Readiness::Acceptable
        );
        assert!(listener.accept().is_ok());
    }

    #[test]
    fn test_trigger_wakes_poll() {
        let listener = bind_listener(loopback()).unwrap();
        let (trigger, signal) = shutdown_channel().unwrap();

        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.trigger().unwrap();
            trigger
        });

        assert_eq!(
            wait_for_accept(&listener, &signal).unwrap(),
            Readiness::Shutdown
        );
        waker.join().unwrap();
    }

    #[test]
    fn test_dropped_trigger_counts_as_shutdown() {
        let listener = bind_listener(loopback()).unwrap();
        let (trigger, signal) = shutdown_channel().unwrap();
        drop(trigger);

        assert_eq!(
            wait_for_accept(&listener, &signal).unwrap(),
            Readiness::Shutdown
        );
    }
}
