//! Client-side TLS session pumped over the nonblocking socket.
//!
//! The session verifies the peer against the system trust roots and sends
//! SNI for the host name. Record plumbing follows the read_tls /
//! process_new_packets / write_tls cycle; a `WouldBlock` from the
//! transport becomes the matching transient socket error so the driver
//! retries at its next step.

use std::io::{self, Read, Write};
use std::sync::Arc;

use log::debug;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use socket2::Socket;

use crate::error::SocketError;
use crate::net::socket::{classify_read, classify_write};

pub(crate) struct TlsSession {
    conn: ClientConnection,
}

impl TlsSession {
    pub(crate) fn new(hostname: &str) -> Result<TlsSession, SocketError> {
        let mut roots = RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs()
            .map_err(|e| SocketError::TlsHandshake(format!("cannot load system trust roots: {}", e)))?;
        for cert in native {
            if let Err(e) = roots.add(cert) {
                debug!("skipping unusable system root certificate: {}", e);
            }
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let name = ServerName::try_from(hostname.to_owned())
            .map_err(|_| SocketError::TlsHandshake(format!("invalid sni host name {:?}", hostname)))?;
        let conn = ClientConnection::new(Arc::new(config), name)
            .map_err(|e| SocketError::TlsHandshake(e.to_string()))?;
        Ok(TlsSession { conn })
    }

    /// One bounded handshake exchange. Returns
    /// [`SocketError::ConnectTryAgain`] while the handshake is still in
    /// flight.
    pub(crate) fn drive_handshake(&mut self, sock: &Socket) -> Result<(), SocketError> {
        self.flush_records(sock, true)?;
        if self.conn.is_handshaking() && self.conn.wants_read() {
            self.pump_read(sock, true)?;
        }
        if self.conn.is_handshaking() {
            self.flush_records(sock, true)?;
            if self.conn.is_handshaking() {
                return Err(SocketError::ConnectTryAgain);
            }
        }
        Ok(())
    }

    /// Encrypts `buf` and pushes records toward the socket. The plaintext
    /// is accepted in full; records that would block stay queued for the
    /// next call.
    pub(crate) fn write(&mut self, sock: &Socket, buf: &[u8]) -> Result<usize, SocketError> {
        self.flush_records(sock, false)?;
        let n = self
            .conn
            .writer()
            .write(buf)
            .map_err(|e| SocketError::Tls(e.to_string()))?;
        match self.flush_records(sock, false) {
            Ok(()) | Err(SocketError::WriteTryAgain) => Ok(n),
            Err(e) => Err(e),
        }
    }

    /// Decrypts into `buf`, pulling more records off the socket when the
    /// plaintext buffer runs dry.
    pub(crate) fn read(&mut self, sock: &Socket, buf: &mut [u8]) -> Result<usize, SocketError> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(0) => return Err(SocketError::ReadEof),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.pump_read(sock, false)?;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Err(SocketError::ReadEof);
                }
                Err(e) => return Err(SocketError::Tls(e.to_string())),
            }
        }
    }

    fn flush_records(&mut self, sock: &Socket, handshake: bool) -> Result<(), SocketError> {
        while self.conn.wants_write() {
            let mut stream = sock;
            match self.conn.write_tls(&mut stream) {
                Ok(0) => {
                    return Err(transient(handshake, SocketError::WriteTryAgain));
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(transient(handshake, SocketError::WriteTryAgain));
                }
                Err(e) if handshake => {
                    return Err(SocketError::TlsHandshake(e.to_string()));
                }
                Err(e) => return Err(classify_write(&e)),
            }
        }
        Ok(())
    }

    fn pump_read(&mut self, sock: &Socket, handshake: bool) -> Result<(), SocketError> {
        let mut stream = sock;
        match self.conn.read_tls(&mut stream) {
            Ok(0) => Err(if handshake {
                SocketError::TlsHandshake("connection closed during handshake".to_owned())
            } else {
                SocketError::ReadEof
            }),
            Ok(_) => {
                self.conn.process_new_packets().map_err(|e| {
                    if handshake {
                        SocketError::TlsHandshake(e.to_string())
                    } else {
                        SocketError::Tls(e.to_string())
                    }
                })?;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(transient(handshake, SocketError::ReadTryAgain))
            }
            Err(e) if handshake => Err(SocketError::TlsHandshake(e.to_string())),
            Err(e) => Err(classify_read(&e)),
        }
    }
}

fn transient(handshake: bool, data_phase: SocketError) -> SocketError {
    if handshake {
        SocketError::ConnectTryAgain
    } else {
        data_phase
    }
}
