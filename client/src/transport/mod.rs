//! Blocking byte-stream transport used by a backup session

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Byte stream a session talks over.
///
/// Receives must honour the timeout set by `set_read_timeout`; a timed out
/// read surfaces as an `io::Error` of kind `TimedOut` or `WouldBlock`.
pub trait Transport: Read + Write + Send {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Close both directions. Further I/O fails.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

/// Connect to `address`, trying every resolved socket address in turn
pub fn connect(address: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for socket_addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                debug!("Connected to {}", socket_addr);
                return Ok(stream);
            }
            Err(e) => {
                debug!("Connection to {} failed: {}", socket_addr, e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} did not resolve to any address", address),
        )
    }))
}

/// Shared flag set once a session is aborted
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Aborts a running session from another thread.
///
/// Sets the session's [`CancelFlag`] and shuts the socket down so a blocked
/// receive returns immediately.
#[derive(Debug)]
pub struct AbortHandle {
    flag: CancelFlag,
    stream: Option<TcpStream>,
}

impl AbortHandle {
    pub fn new(flag: CancelFlag, stream: &TcpStream) -> io::Result<Self> {
        Ok(Self {
            flag,
            stream: Some(stream.try_clone()?),
        })
    }

    /// Handle that only raises the flag
    pub fn flag_only(flag: CancelFlag) -> Self {
        Self { flag, stream: None }
    }

    pub fn abort(&self) {
        self.flag.cancel();
        if let Some(stream) = &self.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
