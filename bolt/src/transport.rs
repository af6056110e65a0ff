use crate::addressing::Address;
use crate::config::{Config, TransportMode, Trust};
use crate::errors::{AddressError, BoltError, BoltResult, TransportError};
use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

/// An ordered, reliable, blocking byte stream with clean shutdown. The
/// two production implementations are a plain socket and a TLS session
/// over one.
pub trait Stream: Read + Write + Send {
    fn shutdown(&mut self) -> std::io::Result<()>;
}

impl Stream for TcpStream {
    fn shutdown(&mut self) -> std::io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

impl Stream for rustls::StreamOwned<rustls::ClientConnection, TcpStream> {
    fn shutdown(&mut self) -> std::io::Result<()> {
        self.conn.send_close_notify();
        let _ = self.flush();
        self.sock.shutdown(Shutdown::Both)
    }
}

/// Blocking transport over TCP or TLS with per-operation timeouts.
pub struct Transport {
    stream: Box<dyn Stream>,
    local: Option<SocketAddr>,
    remote: Option<SocketAddr>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish()
    }
}

impl Transport {
    /// Connect to one of the address's resolved endpoints, first success
    /// wins. Resolves the address if it has not been resolved yet.
    pub fn open(address: &Address, config: &Config) -> BoltResult<Transport> {
        if !address.is_resolved() {
            address.resolve()?;
        }

        let mut last_error: BoltError = AddressError::NameNotResolved.into();
        for socket_addr in address.resolved() {
            match Self::open_endpoint(&socket_addr, address.host(), config) {
                Ok(transport) => return Ok(transport),
                Err(error) => last_error = error,
            }
        }
        Err(last_error)
    }

    fn open_endpoint(socket_addr: &SocketAddr, host: &str, config: &Config) -> BoltResult<Transport> {
        let tcp = if config.connect_timeout_ms > 0 {
            TcpStream::connect_timeout(socket_addr, Duration::from_millis(config.connect_timeout_ms))?
        } else {
            TcpStream::connect(socket_addr)?
        };

        tcp.set_nodelay(config.no_delay)?;
        if config.keep_alive {
            socket2::SockRef::from(&tcp).set_keepalive(true)?;
        }
        if config.recv_timeout_ms > 0 {
            tcp.set_read_timeout(Some(Duration::from_millis(config.recv_timeout_ms)))?;
        }

        let local = tcp.local_addr().ok();
        let remote = tcp.peer_addr().ok();
        let stream: Box<dyn Stream> = match config.transport {
            TransportMode::Plaintext => Box::new(tcp),
            TransportMode::Encrypted => Box::new(tls_stream(tcp, host, &config.trust)?),
        };

        Ok(Transport { stream, local, remote })
    }

    #[cfg(test)]
    pub(crate) fn from_stream(stream: Box<dyn Stream>) -> Transport {
        Transport { stream, local: None, remote: None }
    }

    /// Write the full span and flush.
    pub fn send(&mut self, data: &[u8]) -> BoltResult<usize> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(data.len())
    }

    /// Fill the full span. A closed peer surfaces as end-of-transmission.
    pub fn receive_exact(&mut self, span: &mut [u8]) -> BoltResult<usize> {
        self.stream.read_exact(span)?;
        Ok(span.len())
    }

    pub fn shutdown(&mut self) {
        let _ = self.stream.shutdown();
    }

    #[inline]
    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.local
    }

    #[inline]
    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.remote
    }
}

fn tls_stream(
    tcp: TcpStream,
    host: &str,
    trust: &Trust,
) -> BoltResult<rustls::StreamOwned<rustls::ClientConnection, TcpStream>> {
    let tls_config = client_config(trust)?;
    let server_name = rustls::ServerName::try_from(host).map_err(|_| TransportError::Tls)?;
    let connection =
        rustls::ClientConnection::new(Arc::new(tls_config), server_name).map_err(|_| TransportError::Tls)?;
    Ok(rustls::StreamOwned::new(connection, tcp))
}

fn client_config(trust: &Trust) -> BoltResult<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    if trust.certificates.is_empty() {
        for cert in rustls_native_certs::load_native_certs().map_err(|_| TransportError::Tls)? {
            roots.add(&rustls::Certificate(cert.0)).map_err(|_| TransportError::Tls)?;
        }
    } else {
        let mut pem = trust.certificates.as_slice();
        for der in rustls_pemfile::certs(&mut pem).map_err(|_| TransportError::Tls)? {
            roots.add(&rustls::Certificate(der)).map_err(|_| TransportError::Tls)?;
        }
    }

    let mut tls_config = rustls::ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();

    if trust.skip_verify {
        tls_config.dangerous().set_certificate_verifier(Arc::new(AcceptAnyCertificate));
    }

    Ok(tls_config)
}

/// Certificate verifier for `Trust::skip_verify`.
struct AcceptAnyCertificate;

impl rustls::client::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: std::time::SystemTime,
    ) -> Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}
