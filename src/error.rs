//! Error taxonomy of the engine.
//!
//! Every failure is a tagged code with a human message. Socket errors are
//! split into transient codes, which the drivers absorb and retry, and
//! terminal codes, which surface on the request. [`SocketError::ReadDone`]
//! is not a failure at all: it is the delimiter-reached signal of
//! `read_until` and is consumed by the driver.

use thiserror::Error;

/// Failures of URL parsing and host resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("bad url format")]
    BadFormat,
    #[error("remote host not found")]
    HostNotFound,
    #[error("a temporary error occurred on an authoritative name server, try again later")]
    TryAgain,
    #[error("a nonrecoverable name server error occurred")]
    NoRecovery,
    #[error("the requested name is valid but does not have an ip address")]
    NoData,
    #[error("ip address conversion failed")]
    IpConversion,
}

/// Request-level failures raised outside of socket operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("network offline")]
    Offline,
    #[error("invalid url")]
    InvalidUrl,
    #[error("remote host not found")]
    HostNotFound,
    #[error("output file path is empty")]
    FilePathEmpty,
    #[error("destination directory does not exist")]
    DestinationDirDoesNotExist,
    #[error("scheduler run() invoked twice")]
    SchedulerLaunchedTwice,
    #[error("scheduler is not running")]
    SchedulerNotRunning,
    #[error("request type is not supported")]
    RequestNotSupported,
}

/// Socket operation failures, classified per operation the way the
/// underlying errno values are.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    #[error("socket could not be created (os error {0})")]
    CreationFailed(i32),
    #[error("socket is not initialised")]
    NotInitialised,
    #[error("wrong ip format")]
    WrongIpFormat,
    #[error("socket is not connected")]
    NotConnected,

    #[error("connect: permission denied")]
    ConnectNotEnoughPermissions,
    #[error("connect: local address is already in use")]
    ConnectAddressInUse,
    #[error("connect: address not available")]
    ConnectAddressNotAvailable,
    #[error("connect: address family not supported")]
    ConnectAddressFamilyNotSupported,
    #[error("connect: insufficient entries in the routing cache")]
    ConnectTryAgain,
    #[error("connect: a previous connection attempt has not yet been completed")]
    ConnectAlreadyInProcess,
    #[error("connect: not a valid open file descriptor")]
    ConnectBadFileDescriptor,
    #[error("connect: no one listening on the remote address")]
    ConnectRefused,
    #[error("connect: the socket structure address is outside the user's address space")]
    ConnectAddressOutsideUserSpace,
    #[error("connect: the connection cannot be completed immediately")]
    ConnectInProgress,
    #[error("connect: interrupted by a signal")]
    ConnectInterrupted,
    #[error("connect: the socket is already connected")]
    ConnectConnected,
    #[error("connect: network is unreachable")]
    ConnectNetworkUnreachable,
    #[error("connect: the file descriptor does not refer to a socket")]
    ConnectNotSocket,
    #[error("connect: protocol not supported")]
    ConnectProtocolNotSupported,
    #[error("connect: timeout while attempting connection")]
    ConnectTimedOut,

    #[error("write: the operation would block")]
    WriteTryAgain,
    #[error("write: not a valid open file descriptor")]
    WriteBadFileDescriptor,
    #[error("write: peer address has not been set")]
    WriteDestinationAddressRequired,
    #[error("write: disk quota exhausted")]
    WriteUserQuota,
    #[error("write: interrupted before any data was transmitted")]
    WriteInterrupted,
    #[error("write: buffer is outside the accessible address space")]
    WriteBufferOutOfRange,
    #[error("write: attempt to write beyond the maximum allowed size")]
    WriteBig,
    #[error("write: invalid argument")]
    WriteInvalidArgument,
    #[error("write: low-level i/o error")]
    WriteLowLevelIo,
    #[error("write: no room for the data on the device")]
    WriteNoSpace,
    #[error("write: the operation was prevented by a file seal")]
    WriteNotPermitted,
    #[error("write: the reading end of the socket is closed")]
    WriteBrokenPipe,
    #[error("write: timeout while writing")]
    WriteTimedOut,

    #[error("read: the operation would block")]
    ReadTryAgain,
    #[error("read: delimiter reached")]
    ReadDone,
    #[error("read: timeout while reading")]
    ReadTimedOut,
    #[error("read: connection closed by the remote side")]
    ReadEof,

    #[error("tls handshake failed: {0}")]
    TlsHandshake(String),
    #[error("tls session error: {0}")]
    Tls(String),

    #[error("socket i/o error (os error {0})")]
    Io(i32),
}

impl SocketError {
    /// A transient error tells the driver to retry after yielding; the
    /// operation has made no irreversible progress.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SocketError::ConnectTryAgain
                | SocketError::ConnectInProgress
                | SocketError::ConnectAlreadyInProcess
                | SocketError::WriteTryAgain
                | SocketError::ReadTryAgain
        )
    }
}

/// Failures of HTTP response framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("bad response format")]
    BadResponseFormat,
    #[error("response carries neither content-length nor chunked transfer-encoding")]
    ResponseSizeUnknown,
}

/// Any failure the engine can surface on a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Url(#[from] UrlError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error(transparent)]
    Http(#[from] HttpError),
    /// A raw OS error from the output-file path, outside the socket
    /// taxonomy.
    #[error("file i/o error (os error {0})")]
    File(i32),
}

impl Error {
    pub(crate) fn is_read_done(&self) -> bool {
        matches!(self, Error::Socket(SocketError::ReadDone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SocketError::ConnectTryAgain.is_transient());
        assert!(SocketError::ConnectInProgress.is_transient());
        assert!(SocketError::ConnectAlreadyInProcess.is_transient());
        assert!(SocketError::WriteTryAgain.is_transient());
        assert!(SocketError::ReadTryAgain.is_transient());

        assert!(!SocketError::ConnectRefused.is_transient());
        assert!(!SocketError::ConnectTimedOut.is_transient());
        assert!(!SocketError::ReadDone.is_transient());
        assert!(!SocketError::ReadEof.is_transient());
        assert!(!SocketError::WriteBrokenPipe.is_transient());
    }

    #[test]
    fn read_done_is_consumed_not_failed() {
        let err: Error = SocketError::ReadDone.into();
        assert!(err.is_read_done());
        let err: Error = SocketError::ReadTimedOut.into();
        assert!(!err.is_read_done());
    }
}
