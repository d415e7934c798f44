//! Socket transports carrying RESP traffic.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use native_tls::{TlsConnector, TlsStream};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Endpoint a connection is opened against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedisTransport {
    /// TCP endpoint with optional TLS.
    Tcp(TcpEndpoint),
    /// Unix domain socket.
    Unix(PathBuf),
}

/// TCP endpoint configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsOptions>,
}

impl TcpEndpoint {
    fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }
}

/// TLS connection options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TlsOptions {
    /// Domain name presented during the TLS handshake.
    pub domain: String,
    /// Skip certificate validation when true (intended for tests).
    pub insecure_skip_verify: bool,
}

impl TlsOptions {
    fn connector(&self) -> io::Result<TlsConnector> {
        let mut builder = TlsConnector::builder();
        if self.insecure_skip_verify {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        builder.build().map_err(io::Error::other)
    }
}

/// Open socket, plain or encrypted.
pub enum ActiveConnection {
    PlainTcp(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ActiveConnection {
    /// Apply the same read and write timeout to the underlying socket.
    pub fn set_io_timeout(&self, timeout: Duration) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))
            }
            ActiveConnection::Tls(stream) => {
                stream.get_ref().set_read_timeout(Some(timeout))?;
                stream.get_ref().set_write_timeout(Some(timeout))
            }
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => {
                stream.set_read_timeout(Some(timeout))?;
                stream.set_write_timeout(Some(timeout))
            }
        }
    }

    /// Close both directions of the socket, ignoring already-closed peers.
    pub fn shutdown(&mut self) {
        let _ = match self {
            ActiveConnection::PlainTcp(stream) => stream.shutdown(std::net::Shutdown::Both),
            ActiveConnection::Tls(stream) => stream.shutdown(),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.shutdown(std::net::Shutdown::Both),
        };
    }
}

impl Read for ActiveConnection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.read(buf),
            ActiveConnection::Tls(stream) => stream.read(buf),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ActiveConnection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.write(buf),
            ActiveConnection::Tls(stream) => stream.write(buf),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ActiveConnection::PlainTcp(stream) => stream.flush(),
            ActiveConnection::Tls(stream) => stream.flush(),
            #[cfg(unix)]
            ActiveConnection::Unix(stream) => stream.flush(),
        }
    }
}

fn connect_tcp(config: &TcpEndpoint, timeout: Duration) -> io::Result<TcpStream> {
    let addrs = config.socket_addrs()?;
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses resolved for {}:{}", config.host, config.port),
        )
    }))
}

/// Establish a socket connection using the provided transport definition.
pub fn connect_transport(
    transport: &RedisTransport,
    connect_timeout: Duration,
) -> io::Result<ActiveConnection> {
    match transport {
        RedisTransport::Tcp(config) => {
            let stream = connect_tcp(config, connect_timeout)?;
            if let Some(tls) = &config.tls {
                let connector = tls.connector()?;
                stream.set_read_timeout(Some(connect_timeout))?;
                stream.set_write_timeout(Some(connect_timeout))?;
                let stream = connector
                    .connect(&tls.domain, stream)
                    .map_err(io::Error::other)?;
                Ok(ActiveConnection::Tls(Box::new(stream)))
            } else {
                Ok(ActiveConnection::PlainTcp(stream))
            }
        }
        RedisTransport::Unix(path) => {
            #[cfg(unix)]
            {
                let stream = UnixStream::connect(path)?;
                Ok(ActiveConnection::Unix(stream))
            }
            #[cfg(not(unix))]
            {
                let _ = (path, connect_timeout);
                Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "unix domain sockets are not supported on this platform",
                ))
            }
        }
    }
}
