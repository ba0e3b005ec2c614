//! Byte-stream channels to a debug unit.
//!
//! The session needs three things from a channel: write everything, read
//! exactly `n` bytes, and throw away whatever is already buffered.

use std::{
    fmt::Display,
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    os::unix::net::UnixStream,
    path::PathBuf,
    process::{Child, Command},
    str::FromStr,
    thread,
    time::Duration,
};

use crate::{Error, Result};

/// Outstanding pipelined operations a socket peer is assumed to buffer.
pub const DEFAULT_MAX_PIPELINED: usize = 16;

pub trait Transport {
    /// Blocks until every byte is accepted.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Blocks until `buf` is full. End of stream is an error.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Discards input that is already available without blocking and returns
    /// how many bytes were dropped.
    fn drain(&mut self) -> io::Result<usize>;

    fn max_pipelined(&self) -> usize {
        DEFAULT_MAX_PIPELINED
    }
}

/// Where a debug unit listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// `host:port`
    Tcp(String),
    Unix(PathBuf),
}

impl FromStr for Target {
    type Err = std::convert::Infallible;

    /// A bare number is a TCP port on localhost, `host:port` is TCP, and
    /// anything else is the path of a UNIX domain socket.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.parse::<u16>().is_ok() {
            return Ok(Self::Tcp(format!("localhost:{s}")));
        }
        if !s.contains('/') {
            if let Some((host, port)) = s.rsplit_once(':') {
                if !host.is_empty() && port.parse::<u16>().is_ok() {
                    return Ok(Self::Tcp(s.to_string()));
                }
            }
        }
        Ok(Self::Unix(PathBuf::from(s)))
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Tcp(address) => write!(f, "tcp:{address}"),
            Target::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

enum Stream {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Stream {
    fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.set_nonblocking(nonblocking),
            Stream::Unix(s) => s.set_nonblocking(nonblocking),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.read(buf),
            Stream::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Tcp(s) => s.write(buf),
            Stream::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(s) => s.flush(),
            Stream::Unix(s) => s.flush(),
        }
    }
}

/// A UNIX domain or TCP stream socket.
pub struct SocketTransport {
    stream: Stream,
    target: Target,
}

impl SocketTransport {
    pub fn connect(target: &Target) -> Result<Self> {
        let stream = match target {
            Target::Tcp(address) => {
                let addresses: Vec<_> = address
                    .to_socket_addrs()
                    .map_err(|source| Error::Socket {
                        target: target.to_string(),
                        source,
                    })?
                    .collect();
                let stream =
                    TcpStream::connect(&addresses[..]).map_err(|source| Error::Connect {
                        target: target.to_string(),
                        source,
                    })?;
                // Commands are tiny and latency bound.
                stream.set_nodelay(true).map_err(|source| Error::Socket {
                    target: target.to_string(),
                    source,
                })?;
                Stream::Tcp(stream)
            }
            Target::Unix(path) => {
                let stream = UnixStream::connect(path).map_err(|source| {
                    let target = target.to_string();
                    match source.kind() {
                        io::ErrorKind::InvalidInput => Error::Socket { target, source },
                        _ => Error::Connect { target, source },
                    }
                })?;
                Stream::Unix(stream)
            }
        };
        log::debug!("Connected to {target}");
        Ok(Self {
            stream,
            target: target.clone(),
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }
}

impl Transport for SocketTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes)?;
        self.stream.flush()
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.stream.read_exact(buf)
    }

    fn drain(&mut self) -> io::Result<usize> {
        self.stream.set_nonblocking(true)?;
        let mut buf = [0; 256];
        let mut drained = 0;
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Err(io::Error::from(io::ErrorKind::UnexpectedEof)),
                Ok(n) => drained += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(drained),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }
}

/// Socket served by a helper process the session owns, such as a JTAG
/// tunnel or `system-console` script. The helper is killed on drop.
pub struct ProxiedTransport {
    inner: SocketTransport,
    child: Child,
}

impl ProxiedTransport {
    pub const CONNECT_ATTEMPTS: usize = 50;
    pub const CONNECT_INTERVAL: Duration = Duration::from_millis(100);

    /// Starts `command` and connects to `target` once the helper listens.
    pub fn spawn(mut command: Command, target: &Target) -> Result<Self> {
        let program = command.get_program().to_string_lossy().into_owned();
        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: program.clone(),
            source,
        })?;
        log::info!("Spawned {program} (pid {})", child.id());

        let mut attempt = 0;
        let inner = loop {
            attempt += 1;
            match SocketTransport::connect(target) {
                Ok(inner) => break inner,
                Err(e) if attempt < Self::CONNECT_ATTEMPTS => {
                    log::trace!("{program} not listening yet ({e})");
                    if let Ok(Some(status)) = child.try_wait() {
                        log::error!("{program} exited early: {status}");
                        return Err(e);
                    }
                    thread::sleep(Self::CONNECT_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(e);
                }
            }
        };
        log::debug!("{program} serves {}", inner.target());
        Ok(Self { inner, child })
    }
}

impl Transport for ProxiedTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.send(bytes)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.recv(buf)
    }

    fn drain(&mut self) -> io::Result<usize> {
        self.inner.drain()
    }
}

impl Drop for ProxiedTransport {
    fn drop(&mut self) {
        log::debug!("Stopping helper process {}", self.child.id());
        if let Err(e) = self.child.kill() {
            log::warn!("Cannot kill helper process {}: {e}", self.child.id());
        }
        let _ = self.child.wait();
    }
}
