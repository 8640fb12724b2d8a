//! HTTP/1.1 request composition and response-head parsing.

use crate::error::HttpError;
use crate::http::header_names;
use crate::http::headers::Headers;
use crate::http::params::{percent_encode, Parameters};
use crate::http::status::HttpStatus;
use crate::url::Url;

/// HTTP method of a composed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
        }
    }
}

/// Serializes the request frame. Composition is pure: the same inputs
/// always produce the same bytes.
pub fn compose(method: Method, url: &Url, headers: &Headers, params: &Parameters) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(method.as_str().as_bytes());
    out.push(b' ');
    if url.path().is_empty() || !url.path().starts_with('/') {
        out.push(b'/');
    }
    out.extend_from_slice(url.path().as_bytes());

    match method {
        Method::Get => {
            let query = request_query(url, params);
            if !query.is_empty() {
                out.push(b'?');
                out.extend_from_slice(query.as_bytes());
            }
            out.extend_from_slice(b" HTTP/1.1\r\n");
            write_headers(&mut out, headers);
            out.extend_from_slice(b"\r\n");
        }
        Method::Post | Method::Put => {
            let body = form_body(headers, params);
            out.extend_from_slice(b" HTTP/1.1\r\n");
            write_headers(&mut out, headers);
            out.extend_from_slice(header_names::CONTENT_LENGTH.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(body.len().to_string().as_bytes());
            out.extend_from_slice(b"\r\n\r\n");
            out.extend_from_slice(body.as_bytes());
        }
    }
    out
}

fn write_headers(out: &mut Vec<u8>, headers: &Headers) {
    for header in headers {
        out.extend_from_slice(header.name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(header.value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
}

/// Merges the parameter list into the URL query, `&`-separated.
fn request_query(url: &Url, params: &Parameters) -> String {
    let mut query = String::new();
    for param in params.iter() {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&param.name);
        if !param.value.is_empty() {
            query.push('=');
            query.push_str(&param.value);
        }
    }
    if !url.query().is_empty() {
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(url.query());
    }
    query
}

/// Builds the POST/PUT body from the parameter list. Names and values are
/// percent-encoded when the request declares the form-urlencoded content
/// type.
fn form_body(headers: &Headers, params: &Parameters) -> String {
    let urlencoded = headers
        .value_of(header_names::CONTENT_TYPE)
        .map(|v| v == "application/x-www-form-urlencoded")
        .unwrap_or(false);
    let mut body = String::new();
    for param in params.iter() {
        if !body.is_empty() {
            body.push('&');
        }
        if urlencoded {
            body.push_str(&percent_encode(&param.name));
            body.push('=');
            body.push_str(&percent_encode(&param.value));
        } else {
            body.push_str(&param.name);
            body.push('=');
            body.push_str(&param.value);
        }
    }
    body
}

/// Parsed status line and header block of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: HttpStatus,
    pub headers: Headers,
}

/// Parses the accumulated head bytes, everything up to and including the
/// CRLFCRLF terminator.
pub fn parse_head(data: &[u8]) -> Result<ResponseHead, HttpError> {
    if data.len() < 12 || !data.starts_with(b"HTTP/1.1") {
        return Err(HttpError::BadResponseFormat);
    }
    let status = std::str::from_utf8(&data[9..12])
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .and_then(HttpStatus::from_code)
        .ok_or(HttpError::BadResponseFormat)?;
    let text = String::from_utf8_lossy(data);
    let headers = Headers::parse(&text);
    Ok(ResponseHead { status, headers })
}

/// Parses one chunk-size line of a chunked body: optional `;extension`
/// suffix trimmed, the rest read as hex.
pub fn parse_chunk_size(line: &[u8]) -> Result<u64, HttpError> {
    let text = std::str::from_utf8(line).map_err(|_| HttpError::BadResponseFormat)?;
    let text = text.trim_end_matches(['\r', '\n']);
    let size = match text.split_once(';') {
        Some((size, _extension)) => size,
        None => text,
    };
    u64::from_str_radix(size.trim(), 16).map_err(|_| HttpError::BadResponseFormat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::headers::Header;
    use crate::http::params::Parameter;

    fn headers_with_host(host: &str) -> Headers {
        let mut headers = Headers::new();
        headers.add(Header::new(header_names::HOST, host));
        headers
    }

    #[test]
    fn composes_plain_get() {
        let url = Url::parse("http://127.0.0.1:80/a").unwrap();
        let bytes = compose(
            Method::Get,
            &url,
            &headers_with_host("127.0.0.1"),
            &Parameters::new(),
        );
        assert_eq!(bytes, b"GET /a HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n");
    }

    #[test]
    fn empty_path_defaults_to_root() {
        let url = Url::parse("http://127.0.0.1").unwrap();
        let bytes = compose(
            Method::Get,
            &url,
            &headers_with_host("127.0.0.1"),
            &Parameters::new(),
        );
        assert!(bytes.starts_with(b"GET / HTTP/1.1\r\n"));
    }

    #[test]
    fn merges_params_and_url_query() {
        let url = Url::parse("http://127.0.0.1/search?page=2").unwrap();
        let mut params = Parameters::new();
        params.add(Parameter::new("q", "rust"));
        params.add(Parameter::new("dir", ""));
        let bytes = compose(Method::Get, &url, &headers_with_host("127.0.0.1"), &params);
        assert!(bytes.starts_with(b"GET /search?q=rust&dir&page=2 HTTP/1.1\r\n"));
    }

    #[test]
    fn composes_form_urlencoded_post() {
        let url = Url::parse("http://127.0.0.1/submit").unwrap();
        let mut headers = headers_with_host("127.0.0.1");
        headers.add(Header::new(
            header_names::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        ));
        let mut params = Parameters::new();
        params.add(Parameter::new("a/b", "c d"));
        let bytes = compose(Method::Post, &url, &headers, &params);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.ends_with("\r\n\r\na%2Fb=c%20d"));
        assert!(text.contains("Content-Length: 11\r\n"));
    }

    #[test]
    fn composition_is_pure() {
        let url = Url::parse("http://127.0.0.1/a?x=1").unwrap();
        let mut params = Parameters::new();
        params.add(Parameter::new("k", "v"));
        let headers = headers_with_host("127.0.0.1");
        let first = compose(Method::Get, &url, &headers, &params);
        let second = compose(Method::Get, &url, &headers, &params);
        assert_eq!(first, second);
    }

    #[test]
    fn parses_response_head() {
        let head = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\n";
        let parsed = parse_head(head).unwrap();
        assert_eq!(parsed.status, HttpStatus::Ok);
        assert_eq!(parsed.headers.value_of("content-length"), Some("5"));
    }

    #[test]
    fn rejects_non_http_head() {
        assert_eq!(
            parse_head(b"ICY 200 OK\r\n\r\n").unwrap_err(),
            HttpError::BadResponseFormat
        );
        assert_eq!(
            parse_head(b"HTTP/1.1 bad\r\n\r\n").unwrap_err(),
            HttpError::BadResponseFormat
        );
    }

    #[test]
    fn parses_chunk_sizes() {
        assert_eq!(parse_chunk_size(b"5\r\n").unwrap(), 5);
        assert_eq!(parse_chunk_size(b"1a\r\n").unwrap(), 26);
        assert_eq!(parse_chunk_size(b"0\r\n").unwrap(), 0);
        assert_eq!(parse_chunk_size(b"5;name=val\r\n").unwrap(), 5);
        assert!(parse_chunk_size(b"zz\r\n").is_err());
    }
}
