//! Response accumulator.

use std::sync::Mutex;

use crate::error::HttpError;
use crate::http::framing;
use crate::http::headers::Headers;
use crate::http::status::HttpStatus;

/// The response of one request, bound to it by UUID.
///
/// When the request streams to a file the accumulator owns no bytes and
/// [`Response::data`] returns `None`. HTTP responses additionally carry
/// the parsed status code and the decoded header map.
pub struct Response {
    uuid: String,
    data: Mutex<Option<Vec<u8>>>,
    http_status: Option<HttpStatus>,
    headers: Option<Headers>,
}

impl Response {
    /// Plain accumulator for raw TCP exchanges.
    pub(crate) fn new(uuid: String, to_file: bool) -> Response {
        Response {
            uuid,
            data: Mutex::new(if to_file { None } else { Some(Vec::new()) }),
            http_status: None,
            headers: None,
        }
    }

    /// Builds a response from the head bytes of an HTTP exchange.
    pub(crate) fn from_http_head(
        uuid: String,
        head: &[u8],
        to_file: bool,
    ) -> Result<Response, HttpError> {
        let parsed = framing::parse_head(head)?;
        Ok(Response {
            uuid,
            data: Mutex::new(if to_file { None } else { Some(Vec::new()) }),
            http_status: Some(parsed.status),
            headers: Some(parsed.headers),
        })
    }

    pub(crate) fn append(&self, bytes: &[u8]) {
        if let Some(data) = self.data.lock().expect("response data poisoned").as_mut() {
            data.extend_from_slice(bytes);
        }
    }

    /// UUID of the request this response belongs to.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Snapshot of the accumulated bytes, `None` when streaming to a file.
    pub fn data(&self) -> Option<Vec<u8>> {
        self.data.lock().expect("response data poisoned").clone()
    }

    /// Parsed HTTP status, absent for raw TCP exchanges.
    pub fn http_status(&self) -> Option<HttpStatus> {
        self.http_status
    }

    /// Decoded response headers, absent for raw TCP exchanges.
    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }
}
