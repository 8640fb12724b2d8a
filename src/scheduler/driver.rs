//! The per-request driver: a resumable state machine advancing one request
//! across connect, write, read-headers and read-body.
//!
//! `step()` performs at most one nonblocking socket operation plus
//! bookkeeping, so a scheduler can round-robin many drivers fairly. Every
//! step re-checks the cancel and pause flags and the phase deadline. The
//! phase clock starts at phase entry and is not reset by partial progress;
//! a transient stall outliving the request timeout fails with the
//! phase-specific code.

use std::mem;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::error::{HttpError, RequestError, SocketError};
use crate::http::framing;
use crate::http::header_names;
use crate::http::status::HttpStatus;
use crate::net::InetSocket;
use crate::request::{Kind, Request, Status};

/// What one `step()` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// Bytes moved or a phase boundary was crossed.
    Progress,
    /// A transient error; come back later.
    Idle,
    /// The pause flag was observed; the task can be parked.
    Paused,
    /// The request reached a terminal state; drop the driver.
    Finished,
}

enum Phase {
    // The driver was interrupted mid-transition; stepping it again is a
    // bug in the scheduler.
    Poisoned,
    Init,
    Connect,
    Write { data: Arc<Vec<u8>>, written: usize },
    ReadHead { head: Vec<u8> },
    ReadBody(Body),
}

enum Body {
    Length { remaining: u64 },
    ChunkSize { line: Vec<u8> },
    ChunkData { remaining: u64 },
    ChunkTrailer { got: usize },
    Raw { buf: Vec<u8> },
}

pub(crate) struct Driver {
    request: Arc<Request>,
    socket: Option<InetSocket>,
    phase: Phase,
    phase_started: Instant,
    paused_since: Option<Instant>,
    frame_max: usize,
}

impl Driver {
    pub(crate) fn new(request: Arc<Request>, frame_max: usize) -> Driver {
        Driver {
            request,
            socket: None,
            phase: Phase::Init,
            phase_started: Instant::now(),
            paused_since: None,
            frame_max,
        }
    }

    pub(crate) fn request(&self) -> &Arc<Request> {
        &self.request
    }

    pub(crate) fn step(&mut self) -> Step {
        if self.request.status().is_terminal() {
            return Step::Finished;
        }
        if self.request.is_canceled() {
            info!("request {} is canceled", self.request.uuid());
            self.request.set_status(Status::Canceled);
            return Step::Finished;
        }
        if self.request.is_paused() {
            if self.request.status() != Status::Paused {
                info!("request {} is paused", self.request.uuid());
                self.request.set_status(Status::Paused);
            }
            self.paused_since.get_or_insert_with(Instant::now);
            return Step::Paused;
        }
        // Time spent suspended does not count against the phase deadline.
        if let Some(since) = self.paused_since.take() {
            self.phase_started += since.elapsed();
        }

        match mem::replace(&mut self.phase, Phase::Poisoned) {
            Phase::Poisoned => panic!("stepped a poisoned driver"),
            Phase::Init => self.init(),
            Phase::Connect => self.connect(),
            Phase::Write { data, written } => self.write(data, written),
            Phase::ReadHead { head } => self.read_head(head),
            Phase::ReadBody(body) => self.read_body(body),
        }
    }

    fn init(&mut self) -> Step {
        info!(
            "starting processing of request {} to {}",
            self.request.uuid(),
            self.request.url().compose_url(false)
        );
        if self.request.kind() == Kind::TcpRaw
            && self.request.request_data().is_empty()
            && self.request.bytes_to_read() == 0
            && self.request.response_delimiter().is_empty()
        {
            // Nothing to write and nothing to read: no exchange this
            // driver could perform.
            warn!(
                "request {} carries no payload and no read framing",
                self.request.uuid()
            );
            self.request
                .set_error(RequestError::RequestNotSupported.into());
            return Step::Finished;
        }
        let mut socket = match InetSocket::new() {
            Ok(socket) => socket,
            Err(e) => {
                self.request.set_error(e.into());
                return Step::Finished;
            }
        };
        let Some(ip) = self.request.url().host_ips().first().copied() else {
            self.request.set_error(RequestError::HostNotFound.into());
            return Step::Finished;
        };
        self.request.set_status(Status::Processed);
        socket.set_host(ip, self.request.url().host());
        socket.set_port(self.request.url().port_network());
        if let Err(e) = socket.set_nonblocking(true) {
            self.request.set_error(e.into());
            return Step::Finished;
        }
        self.socket = Some(socket);
        self.enter(Phase::Connect);
        Step::Progress
    }

    fn connect(&mut self) -> Step {
        let use_tls = self.request.is_ssl();
        let Some(socket) = self.socket.as_mut() else {
            self.request.set_error(SocketError::NotInitialised.into());
            return Step::Finished;
        };
        match socket.connect(use_tls) {
            Ok(()) => {
                debug!("request {}: connected", self.request.uuid());
                let data = self.request.request_data();
                self.request.set_status(Status::Writing);
                self.enter(Phase::Write { data, written: 0 });
                Step::Progress
            }
            Err(e) if e.is_transient() => {
                self.phase = Phase::Connect;
                self.stalled(SocketError::ConnectTimedOut)
            }
            Err(e) => {
                self.request.set_error(e.into());
                Step::Finished
            }
        }
    }

    fn write(&mut self, data: Arc<Vec<u8>>, written: usize) -> Step {
        if written >= data.len() {
            return self.enter_read();
        }
        let frame = (data.len() - written).min(self.frame_max);
        let Some(socket) = self.socket.as_mut() else {
            self.request.set_error(SocketError::NotInitialised.into());
            return Step::Finished;
        };
        match socket.write(&data, frame, written) {
            Ok(n) => {
                debug!("request {}: {} bytes written", self.request.uuid(), n);
                let written = written + n;
                if written >= data.len() {
                    self.enter_read()
                } else {
                    self.phase = Phase::Write { data, written };
                    Step::Progress
                }
            }
            Err(e) if e.is_transient() => {
                self.phase = Phase::Write { data, written };
                self.stalled(SocketError::WriteTimedOut)
            }
            Err(e) => {
                self.request.set_error(e.into());
                Step::Finished
            }
        }
    }

    fn enter_read(&mut self) -> Step {
        if self.request.kind().is_http() {
            self.request.set_status(Status::Reading);
            self.enter(Phase::ReadHead { head: Vec::new() });
            return Step::Progress;
        }
        let delimiter = self.request.response_delimiter();
        let bytes_to_read = self.request.bytes_to_read();
        if !delimiter.is_empty() {
            self.request.set_status(Status::Reading);
            self.enter(Phase::ReadBody(Body::Raw { buf: Vec::new() }));
            Step::Progress
        } else if bytes_to_read > 0 {
            self.request.set_status(Status::Reading);
            self.enter(Phase::ReadBody(Body::Length {
                remaining: bytes_to_read,
            }));
            Step::Progress
        } else {
            // Nothing to read back.
            self.finish()
        }
    }

    fn read_head(&mut self, mut head: Vec<u8>) -> Step {
        let Some(socket) = self.socket.as_mut() else {
            self.request.set_error(SocketError::NotInitialised.into());
            return Step::Finished;
        };
        match socket.read_until(b"\r\n\r\n", &mut head) {
            Ok(()) => {
                debug!(
                    "request {}: {} header bytes read",
                    self.request.uuid(),
                    head.len()
                );
                self.process_head(&head)
            }
            Err(e) if e.is_transient() => {
                self.phase = Phase::ReadHead { head };
                self.stalled(SocketError::ReadTimedOut)
            }
            Err(e) => {
                self.request.set_error(e.into());
                Step::Finished
            }
        }
    }

    fn process_head(&mut self, head: &[u8]) -> Step {
        let Some(response) = self.request.init_http_response(head) else {
            return Step::Finished;
        };
        if response.http_status() != Some(HttpStatus::Ok) {
            // A non-200 exchange carries no body we would read; the
            // request itself succeeded.
            return self.finish();
        }
        let content_length = response
            .headers()
            .and_then(|h| h.value_of(header_names::CONTENT_LENGTH))
            .map(str::to_owned);
        if let Some(value) = content_length {
            let Ok(length) = value.trim().parse::<u64>() else {
                self.request.set_error(HttpError::BadResponseFormat.into());
                return Step::Finished;
            };
            if length == 0 {
                warn!("request {}: content-length is 0", self.request.uuid());
                return self.finish();
            }
            info!(
                "request {}: content-length {}",
                self.request.uuid(),
                length
            );
            self.request.update_bytes_to_read(length);
            self.enter(Phase::ReadBody(Body::Length { remaining: length }));
            return Step::Progress;
        }
        let transfer_encoding = response
            .headers()
            .and_then(|h| h.value_of(header_names::TRANSFER_ENCODING))
            .map(str::to_owned);
        if let Some(value) = transfer_encoding {
            if !value.contains("chunked") {
                warn!(
                    "request {}: transfer-encoding {:?} is not chunked",
                    self.request.uuid(),
                    value
                );
                return self.finish();
            }
            self.enter(Phase::ReadBody(Body::ChunkSize { line: Vec::new() }));
            return Step::Progress;
        }
        self.request.set_error(HttpError::ResponseSizeUnknown.into());
        Step::Finished
    }

    fn read_body(&mut self, body: Body) -> Step {
        let Some(socket) = self.socket.as_mut() else {
            self.request.set_error(SocketError::NotInitialised.into());
            return Step::Finished;
        };
        match body {
            Body::Length { remaining } => {
                let frame = remaining.min(self.frame_max as u64) as usize;
                match socket.read(frame) {
                    Ok(data) => {
                        let n = data.len() as u64;
                        self.request.add_response_data(data);
                        if self.request.status().is_terminal() {
                            return Step::Finished;
                        }
                        let remaining = remaining - n;
                        if remaining == 0 {
                            self.finish()
                        } else {
                            self.phase = Phase::ReadBody(Body::Length { remaining });
                            Step::Progress
                        }
                    }
                    Err(e) if e.is_transient() => {
                        self.phase = Phase::ReadBody(Body::Length { remaining });
                        self.stalled(SocketError::ReadTimedOut)
                    }
                    Err(e) => {
                        self.request.set_error(e.into());
                        Step::Finished
                    }
                }
            }
            Body::ChunkSize { mut line } => match socket.read_until(b"\r\n", &mut line) {
                Ok(()) => match framing::parse_chunk_size(&line) {
                    Ok(0) => self.finish(),
                    Ok(size) => {
                        debug!(
                            "request {}: chunk of {} bytes",
                            self.request.uuid(),
                            size
                        );
                        self.phase = Phase::ReadBody(Body::ChunkData { remaining: size });
                        Step::Progress
                    }
                    Err(e) => {
                        self.request.set_error(e.into());
                        Step::Finished
                    }
                },
                Err(e) if e.is_transient() => {
                    self.phase = Phase::ReadBody(Body::ChunkSize { line });
                    self.stalled(SocketError::ReadTimedOut)
                }
                Err(e) => {
                    self.request.set_error(e.into());
                    Step::Finished
                }
            },
            Body::ChunkData { remaining } => {
                let frame = remaining.min(self.frame_max as u64) as usize;
                match socket.read(frame) {
                    Ok(data) => {
                        let n = data.len() as u64;
                        self.request.add_response_data(data);
                        if self.request.status().is_terminal() {
                            return Step::Finished;
                        }
                        let remaining = remaining - n;
                        if remaining == 0 {
                            self.phase = Phase::ReadBody(Body::ChunkTrailer { got: 0 });
                        } else {
                            self.phase = Phase::ReadBody(Body::ChunkData { remaining });
                        }
                        Step::Progress
                    }
                    Err(e) if e.is_transient() => {
                        self.phase = Phase::ReadBody(Body::ChunkData { remaining });
                        self.stalled(SocketError::ReadTimedOut)
                    }
                    Err(e) => {
                        self.request.set_error(e.into());
                        Step::Finished
                    }
                }
            }
            Body::ChunkTrailer { got } => match socket.read(2 - got) {
                Ok(data) => {
                    let got = got + data.len();
                    if got >= 2 {
                        self.phase = Phase::ReadBody(Body::ChunkSize { line: Vec::new() });
                    } else {
                        self.phase = Phase::ReadBody(Body::ChunkTrailer { got });
                    }
                    Step::Progress
                }
                Err(e) if e.is_transient() => {
                    self.phase = Phase::ReadBody(Body::ChunkTrailer { got });
                    self.stalled(SocketError::ReadTimedOut)
                }
                Err(e) => {
                    self.request.set_error(e.into());
                    Step::Finished
                }
            },
            Body::Raw { mut buf } => {
                let delimiter = self.request.response_delimiter();
                match socket.read_until(&delimiter, &mut buf) {
                    Ok(()) => {
                        self.deliver_raw(buf);
                        if self.request.status().is_terminal() {
                            return Step::Finished;
                        }
                        self.finish()
                    }
                    Err(e) if e.is_transient() => {
                        // Deliver what arrived, except a tail that may be a
                        // delimiter prefix and has to stay in the buffer.
                        let keep = delimiter.len().saturating_sub(1).min(buf.len());
                        let ready: Vec<u8> = buf.drain(..buf.len() - keep).collect();
                        let done_by_cap = self.deliver_raw(ready);
                        if self.request.status().is_terminal() {
                            return Step::Finished;
                        }
                        if done_by_cap {
                            return self.finish();
                        }
                        self.phase = Phase::ReadBody(Body::Raw { buf });
                        self.stalled(SocketError::ReadTimedOut)
                    }
                    Err(e) => {
                        self.request.set_error(e.into());
                        Step::Finished
                    }
                }
            }
        }
    }

    /// Hands raw body bytes to the request, never exceeding the expected
    /// byte count when one is configured. Returns true when the count has
    /// been reached.
    fn deliver_raw(&mut self, mut bytes: Vec<u8>) -> bool {
        let cap = self.request.bytes_to_read();
        if cap > 0 {
            let remaining = cap.saturating_sub(self.request.bytes_read());
            if bytes.len() as u64 > remaining {
                bytes.truncate(remaining as usize);
            }
        }
        if !bytes.is_empty() {
            self.request.add_response_data(bytes);
        }
        cap > 0 && self.request.bytes_read() >= cap
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.phase_started = Instant::now();
    }

    fn finish(&mut self) -> Step {
        self.request.set_status(Status::Done);
        info!("request {} successfully processed", self.request.uuid());
        Step::Finished
    }

    fn stalled(&mut self, timeout_code: SocketError) -> Step {
        if self.phase_started.elapsed() >= self.request.timeout() {
            self.request.set_error(timeout_code.into());
            Step::Finished
        } else {
            Step::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg;
    use crate::error::Error;
    use crate::url::Url;

    #[test]
    fn raw_request_without_an_exchange_is_rejected() {
        let request = Request::tcp(Url::parse("http://127.0.0.1:80/").unwrap());
        let mut driver = Driver::new(request.clone(), cfg::COOP_FRAME_MAX);
        assert_eq!(driver.step(), Step::Finished);
        assert_eq!(request.status(), Status::Error);
        assert_eq!(
            request.error(),
            Some(Error::Request(RequestError::RequestNotSupported))
        );
    }

    #[test]
    fn raw_request_with_read_framing_reaches_the_socket() {
        let request = Request::tcp(Url::parse("http://127.0.0.1:80/").unwrap());
        request.set_response_delimiter(b"\n".to_vec());
        let mut driver = Driver::new(request.clone(), cfg::COOP_FRAME_MAX);
        assert_eq!(driver.step(), Step::Progress);
        assert_eq!(request.status(), Status::Processed);
    }
}
