//! Agent Client Protocol (ACP) session layer.
//!
//! Newline-delimited JSON over an arbitrary
//! [`TransportProvider`](crate::transport::TransportProvider):
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing
//!   with a maximum line length.
//! - `types`: outbound requests and inbound notification shapes.
//! - `connection`: handshake, outbound sends, the receive loop, shutdown.
//! - `router`: method-based dispatch to a [`Handler`](router::Handler).

pub mod codec;
pub mod connection;
pub mod router;
pub mod types;

pub use connection::{Connection, ConnectionOptions, ConnectionState};
pub use router::{route_message, Completion, Handler, HandlerFuture};
