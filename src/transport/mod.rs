//! Network boundary: request/response types and the HTTP transport.

mod client;
mod types;

pub use client::{HttpTransport, Transport, TransportError};
pub use types::{to_payload, Payload, Request, Response};
