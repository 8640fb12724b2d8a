//! Socket layer: nonblocking TCP with optional TLS.

pub mod socket;
mod tls;

pub use socket::InetSocket;
