//! The pluggable wire seam of the edgefab workspace: length-delimited
//! frames over TCP carrying bincode-encoded payloads. Only the payload
//! schema (in `edgefab-types`) is normative; this crate is one concrete
//! transport and can be swapped for an HTTP/QUIC variant with the same
//! request/response shape.

mod client;
mod framing;
mod server;

pub use client::RpcClient;
pub use framing::FramedStream;
pub use server::{Server, Service};
