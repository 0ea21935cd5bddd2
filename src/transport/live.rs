//! WebSocket transport to the live provider.
//!
//! The connection runs as a tokio task. It talks to the session only through
//! the event channel and an unbounded outbound queue, so sends from the capture
//! thread never block.

use crate::audio::frame::EncodedPacket;
use crate::config::LiveConfig;
use crate::error::{OmniVoiceError, Result};
use crate::transport::protocol::{RealtimeInputFrame, SetupFrame, parse_server_message};
use crate::transport::{PacketSink, Transport, TransportEvent, TransportFactory};
use crossbeam_channel::Sender;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

enum Outbound {
    Packet(EncodedPacket),
    Close,
}

struct LiveSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl PacketSink for LiveSink {
    fn send(&self, packet: EncodedPacket) -> Result<()> {
        self.tx
            .send(Outbound::Packet(packet))
            .map_err(|_| OmniVoiceError::Delivery {
                message: "connection closed".to_string(),
            })
    }
}

/// Delivers events until the transport is closed locally.
#[derive(Clone)]
struct EventGate {
    events: Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl EventGate {
    fn emit(&self, event: TransportEvent) {
        if self.closed.load(Ordering::SeqCst) {
            debug!(?event, "event after close dropped");
            return;
        }
        if self.events.send(event).is_err() {
            debug!("session gone, event dropped");
        }
    }
}

/// One live session connection.
pub struct LiveTransport {
    config: LiveConfig,
    runtime: Handle,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    closed: Arc<AtomicBool>,
}

impl LiveTransport {
    pub fn new(config: LiveConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            outbound: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn url(&self, api_key: &str) -> String {
        format!("{}?key={}", self.config.endpoint, api_key)
    }
}

impl Transport for LiveTransport {
    fn open(&mut self, events: Sender<TransportEvent>) -> Result<Arc<dyn PacketSink>> {
        if self.outbound.is_some() || self.closed.load(Ordering::SeqCst) {
            return Err(OmniVoiceError::TransportConnect {
                message: "transport already used".to_string(),
            });
        }
        let api_key = self
            .config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| OmniVoiceError::AuthenticationFailed {
                message: "no API key configured (set OMNIVOICE_API_KEY or GEMINI_API_KEY)"
                    .to_string(),
            })?;

        let setup = SetupFrame::new(
            &self.config.model,
            &self.config.voice,
            Some(&self.config.system_instruction),
        )
        .to_json()
        .map_err(|e| OmniVoiceError::Transport {
            message: format!("Failed to encode setup: {}", e),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let gate = EventGate {
            events,
            closed: Arc::clone(&self.closed),
        };
        info!(endpoint = %self.config.endpoint, model = %self.config.model, "connecting");
        self.runtime
            .spawn(run_connection(self.url(&api_key), setup, gate, rx));

        self.outbound = Some(tx.clone());
        Ok(Arc::new(LiveSink { tx }))
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(tx) = self.outbound.take()
            && tx.send(Outbound::Close).is_err()
        {
            debug!("connection task already finished");
        }
    }
}

impl Drop for LiveTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builds a `LiveTransport` per session on a shared runtime.
pub struct LiveTransportFactory {
    config: LiveConfig,
    runtime: Handle,
}

impl LiveTransportFactory {
    pub fn new(config: LiveConfig, runtime: Handle) -> Self {
        Self { config, runtime }
    }
}

impl TransportFactory for LiveTransportFactory {
    fn create(&self) -> Result<Box<dyn Transport>> {
        Ok(Box::new(LiveTransport::new(
            self.config.clone(),
            self.runtime.clone(),
        )))
    }
}

/// Human-readable reason for a failed handshake, keeping the HTTP status so
/// quota and auth refusals can be told apart.
fn connect_error_reason(error: &tungstenite::Error) -> String {
    match error {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            let body = response
                .body()
                .as_deref()
                .map(String::from_utf8_lossy)
                .unwrap_or_default();
            format!("HTTP {} {}", status.as_u16(), body).trim().to_string()
        }
        other => other.to_string(),
    }
}

/// Resolve when the session asks to close (or drops every sender).
async fn wait_for_close(outbound: &mut mpsc::UnboundedReceiver<Outbound>) {
    while let Some(item) = outbound.recv().await {
        if matches!(item, Outbound::Close) {
            return;
        }
    }
}

async fn run_connection(
    url: String,
    setup: String,
    gate: EventGate,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let ws = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                gate.emit(TransportEvent::Error(connect_error_reason(&e)));
                return;
            }
        },
        _ = wait_for_close(&mut outbound) => {
            debug!("connect abandoned");
            return;
        }
    };

    let (mut write, mut read) = ws.split();
    if let Err(e) = write.send(Message::Text(setup)).await {
        gate.emit(TransportEvent::Error(format!("Failed to send setup: {}", e)));
        return;
    }
    debug!("setup sent");

    let mut opened = false;
    loop {
        tokio::select! {
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => handle_frame(&text, &gate, &mut opened),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => handle_frame(&text, &gate, &mut opened),
                    Err(e) => warn!("non-UTF-8 binary frame ignored: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.into_owned()))
                        .unwrap_or((None, String::new()));
                    info!(?code, %reason, "server closed connection");
                    gate.emit(TransportEvent::Closed { code, reason });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    gate.emit(TransportEvent::Error(e.to_string()));
                    return;
                }
                None => {
                    gate.emit(TransportEvent::Closed {
                        code: None,
                        reason: "connection lost".to_string(),
                    });
                    return;
                }
            },
            item = outbound.recv() => match item {
                Some(Outbound::Packet(packet)) => {
                    let json = match RealtimeInputFrame::new(packet).to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("failed to encode capture packet: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = write.send(Message::Text(json)).await {
                        warn!("failed to send capture packet: {}", e);
                    }
                }
                Some(Outbound::Close) | None => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!("close frame not sent: {}", e);
                    }
                    debug!("connection closed locally");
                    return;
                }
            },
        }
    }
}

fn handle_frame(text: &str, gate: &EventGate, opened: &mut bool) {
    let message = match parse_server_message(text) {
        Ok(message) => message,
        Err(e) => {
            warn!("unparseable server frame: {}", e);
            return;
        }
    };

    if message.setup_complete && !*opened {
        *opened = true;
        info!("session open");
        gate.emit(TransportEvent::Opened);
    }
    if let Some(time_left) = &message.go_away {
        warn!(%time_left, "server will close the connection soon");
    }
    if !message.audio.is_empty() || message.interrupted || message.turn_complete {
        gate.emit(TransportEvent::Message(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn gate() -> (EventGate, crossbeam_channel::Receiver<TransportEvent>) {
        let (tx, rx) = unbounded();
        (
            EventGate {
                events: tx,
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    #[test]
    fn test_setup_complete_opens_once() {
        let (gate, rx) = gate();
        let mut opened = false;
        handle_frame(r#"{"setupComplete":{}}"#, &gate, &mut opened);
        handle_frame(r#"{"setupComplete":{}}"#, &gate, &mut opened);
        assert_eq!(rx.try_recv().unwrap(), TransportEvent::Opened);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_audio_and_interrupt_frames_become_messages() {
        let (gate, rx) = gate();
        let mut opened = true;
        handle_frame(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#,
            &gate,
            &mut opened,
        );
        handle_frame(r#"{"serverContent":{"interrupted":true}}"#, &gate, &mut opened);
        handle_frame(r#"{"usageMetadata":{}}"#, &gate, &mut opened);
        handle_frame("garbage", &gate, &mut opened);

        match rx.try_recv().unwrap() {
            TransportEvent::Message(msg) => assert_eq!(msg.audio, vec!["AAAA".to_string()]),
            other => panic!("Expected audio message, got {other:?}"),
        }
        match rx.try_recv().unwrap() {
            TransportEvent::Message(msg) => assert!(msg.interrupted),
            other => panic!("Expected interruption, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_gate_drops_events_after_close() {
        let (gate, rx) = gate();
        gate.closed.store(true, Ordering::SeqCst);
        gate.emit(TransportEvent::Opened);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_open_without_api_key_fails_authentication() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let config = LiveConfig {
            api_key: None,
            ..LiveConfig::default()
        };
        let mut transport = LiveTransport::new(config, runtime.handle().clone());
        let (tx, _rx) = unbounded();
        assert!(matches!(
            transport.open(tx),
            Err(OmniVoiceError::AuthenticationFailed { .. })
        ));
    }

    #[test]
    fn test_close_before_open_is_safe() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let mut transport = LiveTransport::new(LiveConfig::default(), runtime.handle().clone());
        transport.close();
        transport.close();
        let (tx, _rx) = unbounded();
        assert!(transport.open(tx).is_err());
    }
}
