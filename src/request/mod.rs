//! The request entity: configuration, observable state, observer
//! registration and the response accumulator.

pub mod observers;
pub mod response;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use crossbeam::channel::Sender;
use log::{error, warn};
use uuid::Uuid;

use crate::cfg;
use crate::error::{Error, RequestError};
use crate::http::framing::{self, Method};
use crate::http::header_names;
use crate::http::headers::{Header, Headers};
use crate::http::params::{Parameter, Parameters};
use crate::request::observers::{EventCtx, ObserverSet, Subscription};
use crate::request::response::Response;
use crate::scheduler::Command;
use crate::url::Url;
use crate::utils::unique_path;

/// What kind of exchange a request performs. Drives the framer and the
/// body-read strategy of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    TcpRaw,
    HttpGet,
    HttpPost,
    HttpPut,
}

impl Kind {
    pub(crate) fn is_http(self) -> bool {
        !matches!(self, Kind::TcpRaw)
    }

    pub(crate) fn method(self) -> Option<Method> {
        match self {
            Kind::TcpRaw => None,
            Kind::HttpGet => Some(Method::Get),
            Kind::HttpPost => Some(Method::Post),
            Kind::HttpPut => Some(Method::Put),
        }
    }
}

/// Scheduling priority. `OutOfQueue` requests bypass the concurrency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    OutOfQueue,
}

/// Lifecycle state of a request.
///
/// `Paused` and `Resumed` are pseudo-states: the driver keeps its
/// substate and continues where it left off. `Done`, `Error` and
/// `Canceled` are terminal; a request reaches at most one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Waiting = 0,
    Processed,
    Writing,
    Reading,
    Paused,
    Resumed,
    Done,
    Error,
    Canceled,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error | Status::Canceled)
    }

    fn from_u8(value: u8) -> Status {
        match value {
            0 => Status::Waiting,
            1 => Status::Processed,
            2 => Status::Writing,
            3 => Status::Reading,
            4 => Status::Paused,
            5 => Status::Resumed,
            6 => Status::Done,
            7 => Status::Error,
            _ => Status::Canceled,
        }
    }
}

struct Config {
    priority: Priority,
    bytes_to_read: u64,
    ssl: bool,
    delimiter: Vec<u8>,
    output_path: Option<PathBuf>,
    request_data: Vec<u8>,
    timeout: Duration,
    headers: Headers,
    params: Parameters,
}

struct OutputFile {
    final_path: PathBuf,
    part_path: PathBuf,
    file: Option<fs::File>,
}

struct EventObservers {
    bytes_read: Arc<ObserverSet>,
    status_changed: Arc<ObserverSet>,
    paused: Arc<ObserverSet>,
    resumed: Arc<ObserverSet>,
    canceled: Arc<ObserverSet>,
    finished: Arc<ObserverSet>,
    failed: Arc<ObserverSet>,
}

impl EventObservers {
    fn new() -> EventObservers {
        EventObservers {
            bytes_read: ObserverSet::new(),
            status_changed: ObserverSet::new(),
            paused: ObserverSet::new(),
            resumed: ObserverSet::new(),
            canceled: ObserverSet::new(),
            finished: ObserverSet::new(),
            failed: ObserverSet::new(),
        }
    }
}

/// One outbound network operation.
///
/// Constructed by the user, configured before submission, then handed to a
/// scheduler which owns its processing. Users interact with an in-flight
/// request only through the atomic `pause`/`resume`/`cancel` flags and the
/// registered observers.
pub struct Request {
    uuid: String,
    kind: Kind,
    url: Url,
    config: Mutex<Config>,
    submitted: AtomicBool,
    status: AtomicU8,
    paused: AtomicBool,
    canceled: AtomicBool,
    bytes_read: AtomicU64,
    error: Mutex<Option<Error>>,
    response: Mutex<Option<Arc<Response>>>,
    output: Mutex<Option<OutputFile>>,
    composed: OnceLock<Arc<Vec<u8>>>,
    observers: EventObservers,
    scheduler: Mutex<Option<Sender<Command>>>,
}

impl Request {
    fn with_kind(kind: Kind, url: Url) -> Arc<Request> {
        Arc::new(Request {
            uuid: Uuid::new_v4().to_string(),
            kind,
            url,
            config: Mutex::new(Config {
                priority: Priority::Normal,
                bytes_to_read: 0,
                ssl: false,
                delimiter: Vec::new(),
                output_path: None,
                request_data: Vec::new(),
                timeout: cfg::DEFAULT_TIMEOUT,
                headers: Headers::new(),
                params: Parameters::new(),
            }),
            submitted: AtomicBool::new(false),
            status: AtomicU8::new(Status::Waiting as u8),
            paused: AtomicBool::new(false),
            canceled: AtomicBool::new(false),
            bytes_read: AtomicU64::new(0),
            error: Mutex::new(None),
            response: Mutex::new(None),
            output: Mutex::new(None),
            composed: OnceLock::new(),
            observers: EventObservers::new(),
            scheduler: Mutex::new(None),
        })
    }

    fn http(kind: Kind, url: Url) -> Arc<Request> {
        let request = Request::with_kind(kind, url);
        let scheme_ok = matches!(request.url.scheme(), "http" | "https");
        let port_ok = matches!(request.url.port_local(), 80 | 443);
        if !request.url.is_valid() || (!scheme_ok && !port_ok) {
            error!("invalid url for an http request: {}", request.url.compose_url(false));
            request.set_error(RequestError::InvalidUrl.into());
            return request;
        }
        {
            let mut config = request.config.lock().unwrap();
            config
                .headers
                .add(Header::new(header_names::HOST, request.url.host()));
            if request.url.port_local() == 443 {
                config.ssl = true;
            }
        }
        request
    }

    /// Raw TCP exchange: the configured request bytes are written and the
    /// response is framed by the expected byte count and/or delimiter.
    pub fn tcp(url: Url) -> Arc<Request> {
        Request::with_kind(Kind::TcpRaw, url)
    }

    /// HTTP GET request.
    pub fn get(url: Url) -> Arc<Request> {
        Request::http(Kind::HttpGet, url)
    }

    /// HTTP POST request; the body is built from the parameter list.
    pub fn post(url: Url) -> Arc<Request> {
        Request::http(Kind::HttpPost, url)
    }

    /// HTTP PUT request; the body is built from the parameter list.
    pub fn put(url: Url) -> Arc<Request> {
        Request::http(Kind::HttpPut, url)
    }

    // --- configuration, rejected after submission ---

    fn configure<F: FnOnce(&mut Config)>(&self, what: &str, apply: F) {
        if self.submitted.load(Ordering::SeqCst) {
            warn!("request {}: {} after submission is ignored", self.uuid, what);
            return;
        }
        apply(&mut self.config.lock().unwrap());
    }

    pub fn set_priority(&self, priority: Priority) {
        self.configure("set_priority", |c| c.priority = priority);
    }

    /// Expected response size in bytes; 0 means unknown.
    pub fn set_bytes_to_read(&self, bytes: u64) {
        self.configure("set_bytes_to_read", |c| c.bytes_to_read = bytes);
    }

    pub fn set_ssl(&self, ssl: bool) {
        self.configure("set_ssl", |c| c.ssl = ssl);
    }

    /// Byte sequence that terminates a raw TCP response.
    pub fn set_response_delimiter(&self, delimiter: Vec<u8>) {
        self.configure("set_response_delimiter", |c| c.delimiter = delimiter);
    }

    /// Streams the response into `path` instead of memory. While data
    /// arrives it is written to `<path>.part`; the file is renamed on Done
    /// and removed on Error or Canceled.
    pub fn output_to_file(&self, path: PathBuf) {
        self.configure("output_to_file", |c| c.output_path = Some(path));
    }

    /// Bytes written to the peer by a raw TCP request. HTTP kinds compose
    /// their frame from the URL, headers and parameters instead.
    pub fn set_request_data(&self, data: Vec<u8>) {
        self.configure("set_request_data", |c| c.request_data = data);
    }

    /// Maximum idle duration per driver phase.
    pub fn set_timeout(&self, timeout: Duration) {
        self.configure("set_timeout", |c| c.timeout = timeout);
    }

    pub fn add_header(&self, header: Header) {
        self.configure("add_header", |c| c.headers.add(header));
    }

    pub fn add_param(&self, parameter: Parameter) {
        self.configure("add_param", |c| c.params.add(parameter));
    }

    // --- accessors ---

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn error(&self) -> Option<Error> {
        self.error.lock().unwrap().clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn priority(&self) -> Priority {
        self.config.lock().unwrap().priority
    }

    pub fn bytes_to_read(&self) -> u64 {
        self.config.lock().unwrap().bytes_to_read
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::SeqCst)
    }

    pub fn is_ssl(&self) -> bool {
        self.config.lock().unwrap().ssl
    }

    pub fn response_delimiter(&self) -> Vec<u8> {
        self.config.lock().unwrap().delimiter.clone()
    }

    pub fn response(&self) -> Option<Arc<Response>> {
        self.response.lock().unwrap().clone()
    }

    pub fn timeout(&self) -> Duration {
        self.config.lock().unwrap().timeout
    }

    /// The serialized request frame. Composed exactly once; repeated calls
    /// return the same bytes.
    pub fn request_data(&self) -> Arc<Vec<u8>> {
        self.composed
            .get_or_init(|| {
                let config = self.config.lock().unwrap();
                let bytes = match self.kind.method() {
                    None => config.request_data.clone(),
                    Some(method) => {
                        framing::compose(method, &self.url, &config.headers, &config.params)
                    }
                };
                Arc::new(bytes)
            })
            .clone()
    }

    // --- user-driven lifecycle ---

    /// Asks the driver to suspend processing at its next step.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Resumes a paused request. The driver continues from the substate it
    /// was suspended in.
    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.status() == Status::Paused {
            self.set_status(Status::Resumed);
        }
        self.nudge_scheduler();
    }

    /// Cancels the request. The driver observes the flag at its next step;
    /// cancellation is terminal.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        // A parked driver has no step of its own coming, so poke the
        // scheduler to give it one.
        self.nudge_scheduler();
    }

    fn nudge_scheduler(&self) {
        if let Some(tx) = self.scheduler.lock().unwrap().as_ref() {
            let _ = tx.send(Command::Resume(self.uuid.clone()));
        }
    }

    // --- observer registration ---

    pub fn on_bytes_read<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventCtx) + Send + Sync + 'static,
    {
        self.observers.bytes_read.add(Arc::new(callback))
    }

    pub fn on_status_changed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventCtx) + Send + Sync + 'static,
    {
        self.observers.status_changed.add(Arc::new(callback))
    }

    pub fn on_paused<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventCtx) + Send + Sync + 'static,
    {
        self.observers.paused.add(Arc::new(callback))
    }

    pub fn on_resumed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventCtx) + Send + Sync + 'static,
    {
        self.observers.resumed.add(Arc::new(callback))
    }

    pub fn on_canceled<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventCtx) + Send + Sync + 'static,
    {
        self.observers.canceled.add(Arc::new(callback))
    }

    pub fn on_finished<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventCtx) + Send + Sync + 'static,
    {
        self.observers.finished.add(Arc::new(callback))
    }

    pub fn on_failed<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventCtx) + Send + Sync + 'static,
    {
        self.observers.failed.add(Arc::new(callback))
    }

    // --- handler-only surface ---

    /// Marks the request as owned by a scheduler and prepares the output
    /// file. Returns false if it was already submitted.
    pub(crate) fn mark_submitted(&self) -> bool {
        if self.submitted.swap(true, Ordering::SeqCst) {
            return false;
        }
        let path = self.config.lock().unwrap().output_path.clone();
        if let Some(path) = path {
            if path.as_os_str().is_empty() {
                self.set_error(RequestError::FilePathEmpty.into());
                return true;
            }
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    self.set_error(RequestError::DestinationDirDoesNotExist.into());
                    return true;
                }
            }
            let final_path = unique_path(&path);
            let mut part = final_path.clone().into_os_string();
            part.push(".part");
            *self.output.lock().unwrap() = Some(OutputFile {
                final_path,
                part_path: part.into(),
                file: None,
            });
        }
        true
    }

    pub(crate) fn attach_scheduler(&self, tx: Sender<Command>) {
        *self.scheduler.lock().unwrap() = Some(tx);
    }

    /// Appends response bytes to the accumulator or the output file, then
    /// bumps the byte counter and fires the bytes-read observers once.
    pub(crate) fn add_response_data(&self, data: Vec<u8>) {
        let n = data.len() as u64;
        if n == 0 {
            return;
        }
        let to_file = self.output.lock().unwrap().is_some();
        if to_file {
            if let Err(err) = self.write_output(&data) {
                self.set_error(err);
                return;
            }
        } else {
            let response = {
                let mut guard = self.response.lock().unwrap();
                guard
                    .get_or_insert_with(|| Arc::new(Response::new(self.uuid.clone(), false)))
                    .clone()
            };
            response.append(&data);
        }
        self.bytes_read.fetch_add(n, Ordering::SeqCst);
        self.observers.bytes_read.fire(&self.event_ctx());
    }

    fn write_output(&self, data: &[u8]) -> Result<(), Error> {
        let mut guard = self.output.lock().unwrap();
        let Some(out) = guard.as_mut() else {
            return Ok(());
        };
        if out.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&out.part_path)
                .map_err(|e| Error::File(e.raw_os_error().unwrap_or(0)))?;
            out.file = Some(file);
        }
        if let Some(file) = out.file.as_mut() {
            file.write_all(data)
                .map_err(|e| Error::File(e.raw_os_error().unwrap_or(0)))?;
        }
        Ok(())
    }

    /// Performs the transition bookkeeping, then fires the status-changed
    /// observers followed by the event-specific ones. Transitions out of a
    /// terminal state are ignored.
    pub(crate) fn set_status(&self, new: Status) {
        if self.status().is_terminal() {
            return;
        }
        self.status.store(new as u8, Ordering::SeqCst);
        match new {
            Status::Waiting | Status::Processed | Status::Writing | Status::Reading => {}
            Status::Paused => {
                self.paused.store(true, Ordering::SeqCst);
                self.close_output();
            }
            Status::Resumed => {
                self.paused.store(false, Ordering::SeqCst);
            }
            Status::Done => {
                self.finish_output();
            }
            Status::Error => {
                self.discard_output();
            }
            Status::Canceled => {
                self.canceled.store(true, Ordering::SeqCst);
                self.discard_output();
            }
        }
        let ctx = self.event_ctx();
        self.observers.status_changed.fire(&ctx);
        match new {
            Status::Paused => self.observers.paused.fire(&ctx),
            Status::Resumed => self.observers.resumed.fire(&ctx),
            Status::Canceled => self.observers.canceled.fire(&ctx),
            Status::Done => self.observers.finished.fire(&ctx),
            Status::Error => self.observers.failed.fire(&ctx),
            _ => {}
        }
    }

    /// Records the failure and forces the Error terminal state. The
    /// delimiter-reached signal is consumed, not stored.
    pub(crate) fn set_error(&self, error: Error) {
        if error.is_read_done() {
            return;
        }
        *self.error.lock().unwrap() = Some(error);
        self.set_status(Status::Error);
    }

    /// Parses the HTTP head into the response handle. A parse failure is
    /// surfaced on the request.
    pub(crate) fn init_http_response(&self, head: &[u8]) -> Option<Arc<Response>> {
        let to_file = self.output.lock().unwrap().is_some();
        match Response::from_http_head(self.uuid.clone(), head, to_file) {
            Ok(response) => {
                let response = Arc::new(response);
                *self.response.lock().unwrap() = Some(response.clone());
                Some(response)
            }
            Err(e) => {
                self.set_error(e.into());
                None
            }
        }
    }

    /// Driver-side update once the Content-Length header is known.
    pub(crate) fn update_bytes_to_read(&self, bytes: u64) {
        self.config.lock().unwrap().bytes_to_read = bytes;
    }

    fn close_output(&self) {
        if let Some(out) = self.output.lock().unwrap().as_mut() {
            out.file = None;
        }
    }

    fn finish_output(&self) {
        if let Some(out) = self.output.lock().unwrap().as_mut() {
            out.file = None;
            if out.part_path.exists() {
                if let Err(e) = fs::rename(&out.part_path, &out.final_path) {
                    error!(
                        "request {}: cannot rename {:?} to {:?}: {}",
                        self.uuid, out.part_path, out.final_path, e
                    );
                }
            }
        }
    }

    fn discard_output(&self) {
        if let Some(out) = self.output.lock().unwrap().as_mut() {
            out.file = None;
            if out.part_path.exists() {
                if let Err(e) = fs::remove_file(&out.part_path) {
                    error!(
                        "request {}: cannot remove partial file {:?}: {}",
                        self.uuid, out.part_path, e
                    );
                }
            }
        }
    }

    fn event_ctx(&self) -> EventCtx {
        EventCtx {
            uuid: self.uuid.clone(),
            status: self.status(),
            bytes_read: self.bytes_read.load(Ordering::SeqCst),
            error: self.error.lock().unwrap().clone(),
            response: self.response.lock().unwrap().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SocketError;
    use std::sync::atomic::AtomicUsize;

    fn local_url() -> Url {
        Url::parse("http://127.0.0.1:80/a").unwrap()
    }

    #[test]
    fn uuid_is_stable_and_distinct() {
        let a = Request::get(local_url());
        let b = Request::get(local_url());
        assert_eq!(a.uuid(), a.uuid());
        assert_ne!(a.uuid(), b.uuid());
    }

    #[test]
    fn http_request_gets_host_header_and_ssl_from_port() {
        let r = Request::get(Url::parse("https://127.0.0.1:443/x").unwrap());
        assert!(r.is_ssl());
        let data = r.request_data();
        let text = String::from_utf8(data.as_ref().clone()).unwrap();
        assert!(text.contains("Host: 127.0.0.1\r\n"));
    }

    #[test]
    fn invalid_scheme_and_port_is_rejected() {
        let r = Request::get(Url::parse("ftp://127.0.0.1:21/x").unwrap());
        assert_eq!(r.status(), Status::Error);
        assert_eq!(r.error(), Some(RequestError::InvalidUrl.into()));
    }

    #[test]
    fn odd_port_is_fine_when_scheme_is_http() {
        let r = Request::get(Url::parse("http://127.0.0.1:8080/x").unwrap());
        assert_eq!(r.status(), Status::Waiting);
    }

    #[test]
    fn composition_is_memoized() {
        let r = Request::get(local_url());
        let first = r.request_data();
        let second = r.request_data();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn configuration_after_submission_is_ignored() {
        let r = Request::tcp(local_url());
        r.set_bytes_to_read(5);
        assert!(r.mark_submitted());
        r.set_bytes_to_read(99);
        assert_eq!(r.bytes_to_read(), 5);
        assert!(!r.mark_submitted());
    }

    #[test]
    fn terminal_state_is_reached_once() {
        let r = Request::tcp(local_url());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        r.on_canceled(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();
        r.set_status(Status::Canceled);
        r.set_status(Status::Done);
        r.set_status(Status::Canceled);
        assert_eq!(r.status(), Status::Canceled);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn set_error_forces_error_state_and_fires_failed() {
        let r = Request::tcp(local_url());
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        r.on_failed(move |ctx| {
            *sink.lock().unwrap() = ctx.error().cloned();
        })
        .detach();
        r.set_error(SocketError::ConnectRefused.into());
        assert_eq!(r.status(), Status::Error);
        assert_eq!(
            *seen.lock().unwrap(),
            Some(SocketError::ConnectRefused.into())
        );
    }

    #[test]
    fn read_done_signal_is_consumed() {
        let r = Request::tcp(local_url());
        r.set_error(SocketError::ReadDone.into());
        assert_eq!(r.status(), Status::Waiting);
        assert_eq!(r.error(), None);
    }

    #[test]
    fn bytes_read_is_monotonic_and_observed() {
        let r = Request::tcp(local_url());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        r.on_bytes_read(move |ctx| sink.lock().unwrap().push(ctx.bytes_read()))
            .detach();
        r.add_response_data(b"he".to_vec());
        r.add_response_data(b"llo".to_vec());
        assert_eq!(r.bytes_read(), 5);
        assert_eq!(*seen.lock().unwrap(), [2, 5]);
        assert_eq!(r.response().unwrap().data().unwrap(), b"hello");
    }

    #[test]
    fn status_observers_fire_before_event_observers() {
        let r = Request::tcp(local_url());
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = order.clone();
        let b = order.clone();
        r.on_status_changed(move |_| a.lock().unwrap().push("status"))
            .detach();
        r.on_finished(move |_| b.lock().unwrap().push("finished"))
            .detach();
        r.set_status(Status::Done);
        assert_eq!(*order.lock().unwrap(), ["status", "finished"]);
    }

    #[test]
    fn pause_and_resume_toggle_flags_and_fire() {
        let r = Request::tcp(local_url());
        let resumed = Arc::new(AtomicUsize::new(0));
        let counter = resumed.clone();
        r.on_resumed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .detach();
        r.pause();
        assert!(r.is_paused());
        // The driver observes the flag and performs the transition.
        r.set_status(Status::Paused);
        r.resume();
        assert!(!r.is_paused());
        assert_eq!(r.status(), Status::Resumed);
        assert_eq!(resumed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn output_file_lifecycle_on_done_and_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("body.bin");

        let r = Request::tcp(local_url());
        r.output_to_file(path.clone());
        assert!(r.mark_submitted());
        r.add_response_data(b"hello".to_vec());
        assert!(dir.path().join("body.bin.part").exists());
        r.set_status(Status::Done);
        assert!(path.exists());
        assert!(!dir.path().join("body.bin.part").exists());
        assert_eq!(fs::read(&path).unwrap(), b"hello");

        // A second request to the same path is uniquified, and an error
        // removes its partial file.
        let r2 = Request::tcp(local_url());
        r2.output_to_file(path.clone());
        assert!(r2.mark_submitted());
        r2.add_response_data(b"partial".to_vec());
        r2.set_error(SocketError::ReadTimedOut.into());
        assert!(!dir.path().join("body(1).bin").exists());
        assert!(!dir.path().join("body(1).bin.part").exists());
        // The first file is untouched.
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn missing_destination_dir_fails_at_submission() {
        let dir = tempfile::tempdir().unwrap();
        let r = Request::tcp(local_url());
        r.output_to_file(dir.path().join("nope").join("body.bin"));
        r.mark_submitted();
        assert_eq!(
            r.error(),
            Some(RequestError::DestinationDirDoesNotExist.into())
        );
    }
}
