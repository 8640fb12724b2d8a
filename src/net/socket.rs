//! Nonblocking IPv4 stream socket.
//!
//! Every operation either makes progress or returns a typed
//! [`SocketError`]. Transient codes (`*TryAgain`, `ConnectInProgress`,
//! `ConnectAlreadyInProcess`) mean "retry after yielding"; everything else
//! is terminal and surfaces on the request.

use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};

use log::warn;
use nix::errno::Errno;
use nix::sys::socket::setsockopt;
use nix::sys::socket::sockopt::TcpNoDelay;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::error::SocketError;
use crate::net::tls::TlsSession;

/// A nonblocking TCP socket with optional TLS layered on top.
pub struct InetSocket {
    sock: Socket,
    hostname: String,
    ip: Option<Ipv4Addr>,
    port_network: u16,
    tcp_connected: bool,
    connected: bool,
    tls: Option<TlsSession>,
}

impl InetSocket {
    /// Creates the socket. `TCP_NODELAY` is set so small frames leave
    /// immediately.
    pub fn new() -> Result<InetSocket, SocketError> {
        let sock = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| SocketError::CreationFailed(e.raw_os_error().unwrap_or(0)))?;
        if let Err(e) = setsockopt(&sock, TcpNoDelay, &true) {
            warn!("cannot set TCP_NODELAY: {}", e);
        }
        Ok(InetSocket {
            sock,
            hostname: String::new(),
            ip: None,
            port_network: 0,
            tcp_connected: false,
            connected: false,
            tls: None,
        })
    }

    /// Remote address and the host name used for SNI.
    pub fn set_host(&mut self, ip: Ipv4Addr, hostname: &str) {
        self.ip = Some(ip);
        self.hostname = hostname.to_owned();
    }

    /// Remote port in network byte order.
    pub fn set_port(&mut self, port_network: u16) {
        self.port_network = port_network;
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<(), SocketError> {
        self.sock
            .set_nonblocking(nonblocking)
            .map_err(|e| SocketError::Io(e.raw_os_error().unwrap_or(0)))
    }

    /// True once the TCP connection, and the TLS handshake when requested,
    /// have completed.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Advances the connection by one step. On a nonblocking socket the
    /// first call typically returns [`SocketError::ConnectInProgress`] and
    /// later calls [`SocketError::ConnectAlreadyInProcess`] until the
    /// connection is established. With `use_tls` the handshake is driven
    /// inline, one bounded exchange per call.
    pub fn connect(&mut self, use_tls: bool) -> Result<(), SocketError> {
        if self.connected {
            return Ok(());
        }
        let Some(ip) = self.ip else {
            return Err(SocketError::NotInitialised);
        };
        if !self.tcp_connected {
            let addr = SockAddr::from(SocketAddrV4::new(ip, u16::from_be(self.port_network)));
            match self.sock.connect(&addr) {
                Ok(()) => self.tcp_connected = true,
                Err(e) => match Errno::from_raw(e.raw_os_error().unwrap_or(0)) {
                    Errno::EISCONN => self.tcp_connected = true,
                    errno => return Err(classify_connect(errno)),
                },
            }
        }
        if use_tls {
            if self.tls.is_none() {
                self.tls = Some(TlsSession::new(&self.hostname)?);
            }
            if let Some(tls) = self.tls.as_mut() {
                tls.drive_handshake(&self.sock)?;
            }
        }
        self.connected = true;
        Ok(())
    }

    /// Writes `len` bytes of `data` starting at `offset`, returning how
    /// many were accepted.
    pub fn write(&mut self, data: &[u8], len: usize, offset: usize) -> Result<usize, SocketError> {
        if !self.connected {
            return Err(SocketError::NotConnected);
        }
        let start = offset.min(data.len());
        let end = (start + len).min(data.len());
        let chunk = &data[start..end];
        if chunk.is_empty() {
            return Ok(0);
        }
        match self.tls.as_mut() {
            Some(tls) => tls.write(&self.sock, chunk),
            None => match self.sock.send(chunk) {
                Ok(n) => Ok(n),
                Err(e) => Err(classify_write(&e)),
            },
        }
    }

    /// Reads at most `len` bytes.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>, SocketError> {
        if !self.connected {
            return Err(SocketError::NotConnected);
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; len];
        let n = match self.tls.as_mut() {
            Some(tls) => tls.read(&self.sock, &mut buf)?,
            None => {
                let mut stream = &self.sock;
                match stream.read(&mut buf) {
                    Ok(0) => return Err(SocketError::ReadEof),
                    Ok(n) => n,
                    Err(e) => return Err(classify_read(&e)),
                }
            }
        };
        buf.truncate(n);
        Ok(buf)
    }

    /// Accumulates bytes into `out` until `delimiter` appears as its
    /// suffix. Returns `Ok` once the delimiter, included in `out`, has been
    /// reached; a transient error leaves the partial read in `out` for the
    /// next call to continue.
    pub fn read_until(&mut self, delimiter: &[u8], out: &mut Vec<u8>) -> Result<(), SocketError> {
        if !self.connected {
            return Err(SocketError::NotConnected);
        }
        if delimiter.is_empty() {
            return Ok(());
        }
        loop {
            let mut byte = [0u8; 1];
            match self.tls.as_mut() {
                Some(tls) => {
                    tls.read(&self.sock, &mut byte)?;
                }
                None => {
                    let mut stream = &self.sock;
                    match stream.read(&mut byte) {
                        Ok(0) => return Err(SocketError::ReadEof),
                        Ok(_) => {}
                        Err(e) => return Err(classify_read(&e)),
                    }
                }
            }
            out.push(byte[0]);
            if out.ends_with(delimiter) {
                return Ok(());
            }
        }
    }
}

fn classify_connect(errno: Errno) -> SocketError {
    match errno {
        Errno::EACCES | Errno::EPERM => SocketError::ConnectNotEnoughPermissions,
        Errno::EADDRINUSE => SocketError::ConnectAddressInUse,
        Errno::EADDRNOTAVAIL => SocketError::ConnectAddressNotAvailable,
        Errno::EAFNOSUPPORT => SocketError::ConnectAddressFamilyNotSupported,
        Errno::EAGAIN => SocketError::ConnectTryAgain,
        Errno::EALREADY => SocketError::ConnectAlreadyInProcess,
        Errno::EBADF => SocketError::ConnectBadFileDescriptor,
        Errno::ECONNREFUSED => SocketError::ConnectRefused,
        Errno::EFAULT => SocketError::ConnectAddressOutsideUserSpace,
        Errno::EINPROGRESS => SocketError::ConnectInProgress,
        Errno::EINTR => SocketError::ConnectInterrupted,
        Errno::EISCONN => SocketError::ConnectConnected,
        Errno::ENETUNREACH => SocketError::ConnectNetworkUnreachable,
        Errno::ENOTSOCK => SocketError::ConnectNotSocket,
        Errno::EPROTOTYPE => SocketError::ConnectProtocolNotSupported,
        Errno::ETIMEDOUT => SocketError::ConnectTimedOut,
        other => SocketError::Io(other as i32),
    }
}

pub(crate) fn classify_write(e: &io::Error) -> SocketError {
    match Errno::from_raw(e.raw_os_error().unwrap_or(0)) {
        Errno::EAGAIN => SocketError::WriteTryAgain,
        Errno::EBADF => SocketError::WriteBadFileDescriptor,
        Errno::EDESTADDRREQ => SocketError::WriteDestinationAddressRequired,
        Errno::EDQUOT => SocketError::WriteUserQuota,
        Errno::EFAULT => SocketError::WriteBufferOutOfRange,
        Errno::EFBIG => SocketError::WriteBig,
        Errno::EINTR => SocketError::WriteInterrupted,
        Errno::EINVAL => SocketError::WriteInvalidArgument,
        Errno::EIO => SocketError::WriteLowLevelIo,
        Errno::ENOSPC => SocketError::WriteNoSpace,
        Errno::EPERM => SocketError::WriteNotPermitted,
        Errno::EPIPE => SocketError::WriteBrokenPipe,
        other => SocketError::Io(other as i32),
    }
}

pub(crate) fn classify_read(e: &io::Error) -> SocketError {
    match Errno::from_raw(e.raw_os_error().unwrap_or(0)) {
        Errno::EAGAIN | Errno::EINTR => SocketError::ReadTryAgain,
        other => SocketError::Io(other as i32),
    }
}
