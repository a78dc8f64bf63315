//! Blocking duplex streams usable as the socket boundary.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};

/// A connected, blocking-mode byte stream.
///
/// The connection clones it once per direction: the socket producer reads
/// from one handle while the socket consumer writes to another.
pub trait Transport: Read + Write + Send + 'static {
    /// Create another handle to the same underlying socket.
    fn try_clone_transport(&self) -> io::Result<Self>
    where
        Self: Sized;

    /// Shut down both directions, unblocking any thread inside a socket call.
    fn shutdown_both(&self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn try_clone_transport(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

#[cfg(unix)]
impl Transport for std::os::unix::net::UnixStream {
    fn try_clone_transport(&self) -> io::Result<Self> {
        self.try_clone()
    }

    fn shutdown_both(&self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}
