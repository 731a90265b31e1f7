//! TCP/TLS driver — plain byte links to a backend over `std::net`.
//!
//! [`TcpDriver`] opens one TCP stream per handle, optionally wrapped in TLS
//! via `rustls`. It performs no protocol handshake: callers drive the
//! backend's wire protocol through [`Link::send`] / [`Link::recv`].
//! Liveness is a non-blocking peek: EOF means the peer hung up, no pending
//! data means the link is still open.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use super::{Driver, Link, Target};
use crate::config::PoolConfig;
use crate::error::DriverError;

// ── Transport ────────────────────────────────────────────────────────

enum Transport {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

// ── TcpLink ──────────────────────────────────────────────────────────

/// A [`Link`] over TCP, optionally encrypted with TLS.
pub struct TcpLink {
    transport: Transport,
    peer: String,
}

impl std::fmt::Debug for TcpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLink")
            .field("peer", &self.peer)
            .field("tls", &matches!(self.transport, Transport::Tls(_)))
            .finish()
    }
}

impl TcpLink {
    fn socket(&self) -> &TcpStream {
        match &self.transport {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.sock,
        }
    }
}

impl Link for TcpLink {
    fn is_alive(&mut self) -> bool {
        let socket = self.socket();
        if socket.set_nonblocking(true).is_err() {
            return false;
        }

        let mut byte = [0u8; 1];
        let alive = match socket.peek(&mut byte) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) => e.kind() == std::io::ErrorKind::WouldBlock,
        };

        socket.set_nonblocking(false).is_ok() && alive
    }

    fn close(&mut self) {
        if let Transport::Tls(stream) = &mut self.transport {
            stream.conn.send_close_notify();
            let _ = stream.flush();
        }
        let _ = self.socket().shutdown(Shutdown::Both);
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, DriverError> {
        match &mut self.transport {
            Transport::Plain(stream) => stream.write_all(data)?,
            Transport::Tls(stream) => stream.write_all(data)?,
        }
        Ok(data.len())
    }

    fn recv(&mut self, max_bytes: usize) -> Result<Vec<u8>, DriverError> {
        let mut buf = vec![0u8; max_bytes];
        let n = match &mut self.transport {
            Transport::Plain(stream) => stream.read(&mut buf)?,
            Transport::Tls(stream) => stream.read(&mut buf)?,
        };
        buf.truncate(n);
        Ok(buf)
    }
}

// ── TcpDriver ────────────────────────────────────────────────────────

/// Driver that connects to `host:port` over TCP, with optional TLS.
///
/// With TLS enabled the client configuration (Mozilla roots from
/// `webpki-roots`) is built in [`Driver::init`]; connecting before a
/// successful init fails.
pub struct TcpDriver {
    connect_timeout: Duration,
    read_timeout: Duration,
    use_tls: bool,
    tls: OnceLock<Arc<rustls::ClientConfig>>,
}

impl std::fmt::Debug for TcpDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpDriver")
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("use_tls", &self.use_tls)
            .finish_non_exhaustive()
    }
}

impl TcpDriver {
    /// Plain TCP links.
    pub fn plain(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            use_tls: false,
            tls: OnceLock::new(),
        }
    }

    /// TLS links verified against the bundled Mozilla root store.
    pub fn tls(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            use_tls: true,
            ..Self::plain(connect_timeout, read_timeout)
        }
    }

    /// TLS links using a caller-supplied `rustls` client configuration.
    pub fn with_client_config(
        connect_timeout: Duration,
        read_timeout: Duration,
        client_config: Arc<rustls::ClientConfig>,
    ) -> Self {
        let tls = OnceLock::new();
        let _ = tls.set(client_config);
        Self {
            connect_timeout,
            read_timeout,
            use_tls: true,
            tls,
        }
    }

    /// Build a driver from the pool's transport settings.
    pub fn from_config(config: &PoolConfig) -> Self {
        if config.use_tls {
            Self::tls(config.connect_timeout, config.read_timeout)
        } else {
            Self::plain(config.connect_timeout, config.read_timeout)
        }
    }

    fn default_client_config() -> Result<rustls::ClientConfig, DriverError> {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        Ok(rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| DriverError::Init(format!("tls protocol versions: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth())
    }

    fn open_stream(&self, target: &Target) -> Result<TcpStream, DriverError> {
        let addr_str = target.addr();
        let connect_err = |reason: String| DriverError::Connect {
            addr: addr_str.clone(),
            reason,
        };

        let addr = addr_str
            .to_socket_addrs()
            .map_err(|e| connect_err(format!("dns resolution failed: {e}")))?
            .next()
            .ok_or_else(|| connect_err("no address found".to_string()))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| connect_err(e.to_string()))?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }
}

impl Driver for TcpDriver {
    fn init(&self) -> Result<(), DriverError> {
        if self.use_tls && self.tls.get().is_none() {
            let config = Self::default_client_config()?;
            let _ = self.tls.set(Arc::new(config));
        }
        Ok(())
    }

    fn connect(&self, target: &Target) -> Result<Box<dyn Link>, DriverError> {
        let stream = self.open_stream(target)?;
        let peer = target.addr();

        let transport = if self.use_tls {
            let client_config = self
                .tls
                .get()
                .ok_or_else(|| DriverError::Init("tls driver used before init".to_string()))?;
            let server_name = rustls::pki_types::ServerName::try_from(target.host.clone())
                .map_err(|e| DriverError::Tls(format!("invalid server name '{}': {e}", target.host)))?;
            let session = rustls::ClientConnection::new(Arc::clone(client_config), server_name)
                .map_err(|e| DriverError::Tls(format!("session creation: {e}")))?;
            Transport::Tls(Box::new(rustls::StreamOwned::new(session, stream)))
        } else {
            Transport::Plain(stream)
        };

        tracing::debug!(
            peer = %peer,
            tls = self.use_tls,
            "established tcp link"
        );

        Ok(Box::new(TcpLink { transport, peer }))
    }
}
