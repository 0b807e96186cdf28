use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::{debug, info};

use crate::address::LinkAddress;
use crate::error::{Result, TransportError};

/// Timeout applied to serial ports when the caller asks for "no timeout".
#[cfg(feature = "serial")]
const SERIAL_BLOCKING_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// A connected duplex link implementing `Read` and `Write`.
///
/// Frames from every device share one `LinkStream`; the reader side and the
/// writer side are obtained with [`LinkStream::try_clone`].
pub struct LinkStream {
    inner: LinkStreamInner,
}

enum LinkStreamInner {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(feature = "serial")]
    Serial(Box<dyn serialport::SerialPort>),
}

impl Read for LinkStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.read(buf),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.read(buf),
        }
    }
}

impl Write for LinkStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.write(buf),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.flush(),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port.flush(),
        }
    }
}

impl LinkStream {
    /// Open the link described by `address`.
    pub fn open(address: &LinkAddress) -> Result<Self> {
        match address {
            LinkAddress::Serial { path, baud_rate } => Self::open_serial(path, *baud_rate),
            LinkAddress::Tcp(target) => Self::connect_tcp(target),
            LinkAddress::Unix(path) => Self::connect_unix(path),
        }
    }

    /// Open a serial device at the given baud rate (8N1, no flow control).
    #[cfg(feature = "serial")]
    pub fn open_serial(path: &std::path::Path, baud_rate: u32) -> Result<Self> {
        let name = path.to_string_lossy().into_owned();
        let port = serialport::new(name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(SERIAL_BLOCKING_TIMEOUT)
            .open()
            .map_err(|err| TransportError::Open {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        info!(?path, baud_rate, "opened serial link");
        Ok(Self {
            inner: LinkStreamInner::Serial(port),
        })
    }

    /// Open a serial device at the given baud rate (8N1, no flow control).
    #[cfg(not(feature = "serial"))]
    pub fn open_serial(path: &std::path::Path, baud_rate: u32) -> Result<Self> {
        let _ = (path, baud_rate);
        Err(TransportError::Unsupported("serial"))
    }

    /// Connect to a TCP serial bridge.
    pub fn connect_tcp(target: &str) -> Result<Self> {
        let stream = TcpStream::connect(target).map_err(|source| TransportError::Connect {
            target: target.to_string(),
            source,
        })?;
        stream.set_nodelay(true)?;
        info!(target, "connected tcp link");
        Ok(Self {
            inner: LinkStreamInner::Tcp(stream),
        })
    }

    /// Connect to a Unix domain socket (device simulators).
    #[cfg(unix)]
    pub fn connect_unix(path: &std::path::Path) -> Result<Self> {
        let stream = std::os::unix::net::UnixStream::connect(path).map_err(|source| {
            TransportError::Connect {
                target: path.display().to_string(),
                source,
            }
        })?;
        info!(?path, "connected unix socket link");
        Ok(Self::from_unix(stream))
    }

    /// Connect to a Unix domain socket (device simulators).
    #[cfg(not(unix))]
    pub fn connect_unix(path: &std::path::Path) -> Result<Self> {
        let _ = path;
        Err(TransportError::Unsupported("unix socket"))
    }

    /// Create a connected, in-process pair of links.
    ///
    /// The first half is handed to the hub, the second plays the device side.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        debug!("created in-process link pair");
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Wrap an already connected Unix stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: LinkStreamInner::Unix(stream),
        }
    }

    /// Wrap an already connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        Self {
            inner: LinkStreamInner::Tcp(stream),
        }
    }

    /// Set read timeout on the underlying link.
    ///
    /// Serial ports share one timeout for both directions, so this also
    /// bounds writes on serial links.
    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_read_timeout(timeout).map_err(Into::into),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => port
                .set_timeout(timeout.unwrap_or(SERIAL_BLOCKING_TIMEOUT))
                .map_err(|err| TransportError::Io(err.into())),
        }
    }

    /// Set write timeout on the underlying link.
    ///
    /// A no-op for serial ports, whose single timeout is set through
    /// [`LinkStream::set_read_timeout`].
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        match &mut self.inner {
            LinkStreamInner::Tcp(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => stream.set_write_timeout(timeout).map_err(Into::into),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(_) => Ok(()),
        }
    }

    /// Try to clone this link (a second handle onto the same device).
    pub fn try_clone(&self) -> Result<Self> {
        let inner = match &self.inner {
            LinkStreamInner::Tcp(stream) => LinkStreamInner::Tcp(stream.try_clone()?),
            #[cfg(unix)]
            LinkStreamInner::Unix(stream) => LinkStreamInner::Unix(stream.try_clone()?),
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(port) => LinkStreamInner::Serial(
                port.try_clone()
                    .map_err(|err| TransportError::Io(err.into()))?,
            ),
        };
        Ok(Self { inner })
    }

    /// Link kind name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            LinkStreamInner::Tcp(_) => "tcp",
            #[cfg(unix)]
            LinkStreamInner::Unix(_) => "unix",
            #[cfg(feature = "serial")]
            LinkStreamInner::Serial(_) => "serial",
        }
    }
}

impl std::fmt::Debug for LinkStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkStream")
            .field("kind", &self.kind())
            .finish()
    }
}
