//! Blocking socket with optional TLS upgrade.
use bytes::BytesMut;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::{
    Result,
    error::{Error, ErrorKind},
    postgres::frontend::SslRequest,
};

/// The transport under a connection: plain TCP, or TLS negotiated through
/// the postgres `SSLRequest` preamble.
pub enum Socket {
    Tcp(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Socket {
    /// Open the transport.
    ///
    /// `timeout` covers the TCP connect and every subsequent read and write
    /// as a per-operation limit.
    pub fn connect(host: &str, port: u16, timeout: Option<Duration>, use_ssl: bool) -> Result<Socket> {
        let cannot_connect = |e: &dyn std::fmt::Display| {
            Error::new(ErrorKind::Operational, format!("cannot connect to {host}:{port}: {e}"))
        };

        let mut tcp = match timeout {
            Some(timeout) => {
                let addr = (host, port)
                    .to_socket_addrs()
                    .map_err(|e| cannot_connect(&e))?
                    .next()
                    .ok_or_else(|| cannot_connect(&"no address resolved"))?;
                TcpStream::connect_timeout(&addr, timeout).map_err(|e| cannot_connect(&e))?
            }
            None => TcpStream::connect((host, port)).map_err(|e| cannot_connect(&e))?,
        };
        tcp.set_nodelay(true)?;
        tcp.set_read_timeout(timeout)?;
        tcp.set_write_timeout(timeout)?;

        if !use_ssl {
            return Ok(Socket::Tcp(tcp));
        }

        // Ask for TLS before any protocol traffic. The server answers the
        // 8-byte preamble with a single byte.
        let mut request = BytesMut::with_capacity(8);
        SslRequest.write(&mut request);
        tcp.write_all(&request)?;

        let mut answer = [0u8; 1];
        tcp.read_exact(&mut answer)?;
        if answer[0] != b'S' {
            return Err(Error::interface("Server refuses SSL"));
        }

        Ok(Socket::Tls(Box::new(tls_handshake(host, tcp)?)))
    }
}

fn tls_handshake(host: &str, tcp: TcpStream) -> Result<StreamOwned<ClientConnection, TcpStream>> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        // an unusable platform certificate should not block the handshake
        let _ = roots.add(cert);
    }

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let name = ServerName::try_from(host.to_owned())
        .map_err(|_| Error::interface(format!("invalid TLS server name {host:?}")))?;
    let conn = ClientConnection::new(Arc::new(config), name)
        .map_err(|e| Error::interface(e.to_string()))?;

    Ok(StreamOwned::new(conn, tcp))
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(tcp) => tcp.read(buf),
            Socket::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(tcp) => tcp.write(buf),
            Socket::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Socket::Tcp(tcp) => tcp.flush(),
            Socket::Tls(tls) => tls.flush(),
        }
    }
}
