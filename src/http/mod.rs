//! HTTP/1.1 framing: request composition, response-head parsing, headers,
//! parameters and status codes.

pub mod framing;
pub mod header_names;
pub mod headers;
pub mod params;
pub mod status;

pub use framing::{compose, parse_head, Method, ResponseHead};
pub use headers::{Header, Headers};
pub use params::{percent_encode, Parameter, Parameters};
pub use status::HttpStatus;
