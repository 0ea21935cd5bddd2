//! Connection to the remote speech model.
//!
//! A transport reports what happens on the wire as [`TransportEvent`]s on a
//! channel and accepts capture packets through a [`PacketSink`]. The session
//! never sees the socket itself.

#[cfg(feature = "live")]
pub mod live;
pub mod mock;
pub mod protocol;

use crate::error::Result;
use crossbeam_channel::Sender;
use std::sync::Arc;

pub use crate::pipeline::capture::PacketSink;
#[cfg(feature = "live")]
pub use live::{LiveTransport, LiveTransportFactory};
pub use mock::{MockTransport, MockTransportFactory, MockTransportHandle};
pub use protocol::ServerMessage;

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connected and ready to stream.
    Opened,
    /// An inbound frame.
    Message(ServerMessage),
    /// The connection failed.
    Error(String),
    /// The remote end closed the connection.
    Closed { code: Option<u16>, reason: String },
}

/// One streaming connection.
pub trait Transport: Send {
    /// Begin connecting. Events go to `events`; capture packets go to the
    /// returned sink. Failing here means the connection never started.
    fn open(&mut self, events: Sender<TransportEvent>) -> Result<Arc<dyn PacketSink>>;

    /// Close the connection, or abandon a connect still in flight.
    ///
    /// Idempotent. No further events are delivered after close returns.
    fn close(&mut self);
}

/// Builds a fresh transport for each session.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Transport>>;
}
