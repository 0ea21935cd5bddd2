//! In-memory transport for tests and offline demos.
//!
//! The handle plays the remote end: it delivers events into the session and
//! records every packet the session sends.

use crate::audio::frame::EncodedPacket;
use crate::error::{OmniVoiceError, Result};
use crate::transport::{PacketSink, ServerMessage, Transport, TransportEvent, TransportFactory};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct MockWire {
    events: Mutex<Option<Sender<TransportEvent>>>,
    last_sender: Mutex<Option<Sender<TransportEvent>>>,
    packets: Mutex<Vec<EncodedPacket>>,
    opens: AtomicUsize,
    close_calls: AtomicUsize,
    closed: AtomicBool,
    reject_sends: AtomicBool,
}

/// Remote end of a `MockTransport`.
#[derive(Debug, Clone, Default)]
pub struct MockTransportHandle {
    wire: Arc<MockWire>,
}

impl MockTransportHandle {
    /// Deliver an event as the server would. Returns false if the transport is
    /// closed or was never opened.
    pub fn emit(&self, event: TransportEvent) -> bool {
        lock(&self.wire.events)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Deliver an event even after close, as a late network callback would.
    pub fn emit_late(&self, event: TransportEvent) -> bool {
        lock(&self.wire.last_sender)
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn open(&self) -> bool {
        self.emit(TransportEvent::Opened)
    }

    pub fn audio(&self, data: impl Into<String>) -> bool {
        self.emit(TransportEvent::Message(ServerMessage::audio(data)))
    }

    pub fn interrupted(&self) -> bool {
        self.emit(TransportEvent::Message(ServerMessage::interrupted()))
    }

    pub fn error(&self, reason: &str) -> bool {
        self.emit(TransportEvent::Error(reason.to_string()))
    }

    pub fn remote_close(&self, code: Option<u16>, reason: &str) -> bool {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        })
    }

    /// Make every subsequent send fail.
    pub fn reject_sends(&self, reject: bool) {
        self.wire.reject_sends.store(reject, Ordering::SeqCst);
    }

    /// Packets received from the session, in order.
    pub fn packets(&self) -> Vec<EncodedPacket> {
        lock(&self.wire.packets).clone()
    }

    pub fn packet_count(&self) -> usize {
        lock(&self.wire.packets).len()
    }

    pub fn opens(&self) -> usize {
        self.wire.opens.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.wire.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.wire.closed.load(Ordering::SeqCst)
    }
}

struct MockSink {
    wire: Arc<MockWire>,
}

impl PacketSink for MockSink {
    fn send(&self, packet: EncodedPacket) -> Result<()> {
        if self.wire.closed.load(Ordering::SeqCst) {
            return Err(OmniVoiceError::Delivery {
                message: "transport closed".to_string(),
            });
        }
        if self.wire.reject_sends.load(Ordering::SeqCst) {
            return Err(OmniVoiceError::Delivery {
                message: "mock send failure".to_string(),
            });
        }
        lock(&self.wire.packets).push(packet);
        Ok(())
    }
}

/// Transport whose remote end is driven through a `MockTransportHandle`.
#[derive(Debug, Default)]
pub struct MockTransport {
    handle: MockTransportHandle,
    open_error: Option<String>,
}

impl MockTransport {
    pub fn new() -> (Self, MockTransportHandle) {
        let transport = Self::default();
        let handle = transport.handle.clone();
        (transport, handle)
    }

    /// Fail `open` synchronously with a transport connect error.
    pub fn with_open_failure(mut self, reason: &str) -> Self {
        self.open_error = Some(reason.to_string());
        self
    }
}

impl Transport for MockTransport {
    fn open(&mut self, events: Sender<TransportEvent>) -> Result<Arc<dyn PacketSink>> {
        self.handle.wire.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = &self.open_error {
            return Err(OmniVoiceError::TransportConnect {
                message: reason.clone(),
            });
        }
        *lock(&self.handle.wire.last_sender) = Some(events.clone());
        *lock(&self.handle.wire.events) = Some(events);
        Ok(Arc::new(MockSink {
            wire: Arc::clone(&self.handle.wire),
        }))
    }

    fn close(&mut self) {
        self.handle.wire.close_calls.fetch_add(1, Ordering::SeqCst);
        self.handle.wire.closed.store(true, Ordering::SeqCst);
        lock(&self.handle.wire.events).take();
    }
}

/// Factory that hands out mock transports and keeps their handles.
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    handles: Mutex<Vec<MockTransportHandle>>,
    open_error: Option<String>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open_failure(mut self, reason: &str) -> Self {
        self.open_error = Some(reason.to_string());
        self
    }

    /// Handle for the most recently created transport.
    pub fn last(&self) -> Option<MockTransportHandle> {
        lock(&self.handles).last().cloned()
    }

    pub fn created(&self) -> usize {
        lock(&self.handles).len()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self) -> Result<Box<dyn Transport>> {
        let (mut transport, handle) = MockTransport::new();
        transport.open_error = self.open_error.clone();
        lock(&self.handles).push(handle);
        Ok(Box::new(transport))
    }
}
