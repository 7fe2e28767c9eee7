//! [`WebSocketBridge`] – exposes the bus to external clients over WebSocket.
//!
//! Clients exchange JSON text frames tagged by `op`:
//!
//! | Frame | Direction | Effect |
//! |---|---|---|
//! | `{"op":"subscribe","channel":"telemetry"}` | client → bridge | forward messages matching `channel` to this client |
//! | `{"op":"unsubscribe","channel":"telemetry"}` | client → bridge | stop forwarding them |
//! | `{"op":"publish","channel":"control.robot.arm-1","payload":{...}}` | both ways | deliver one message |
//!
//! Channels follow the [`binding_matches`][crate::bus::binding_matches]
//! rules.  A payload that is a JSON document travels embedded in the frame;
//! any other payload travels as a JSON string.
//!
//! The bridge implements [`PubSub`]: `publish` fans out to subscribed
//! clients, `subscribe` yields what clients publish.

use std::net::SocketAddr;

use armsim_types::ArmError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::bus::{BusMessage, MessageBus, Subscription};
use crate::pubsub::{PubSub, PubSubStream};

/// Default TCP port of the bridge.
pub const DEFAULT_PORT: u16 = 8765;

/// One WebSocket text frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum WireFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Publish { channel: String, payload: Value },
}

impl WireFrame {
    pub fn publish(channel: &str, payload: &[u8]) -> Self {
        WireFrame::Publish {
            channel: channel.to_string(),
            payload: encode_payload(payload),
        }
    }
}

/// Embed `payload` in a frame: parsed when it is JSON, a string otherwise.
pub fn encode_payload(payload: &[u8]) -> Value {
    serde_json::from_slice(payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()))
}

/// Bytes handed to the bus for a frame payload.  Strings are passed through
/// unquoted.
pub fn decode_payload(payload: Value) -> Vec<u8> {
    match payload {
        Value::String(text) => text.into_bytes(),
        other => other.to_string().into_bytes(),
    }
}

// ---------------------------------------------------------------------------
// WebSocketBridge
// ---------------------------------------------------------------------------

/// A [`PubSub`] whose peers are WebSocket clients.
///
/// # Example
///
/// ```rust,no_run
/// use armsim_middleware::WebSocketBridge;
///
/// #[tokio::main]
/// async fn main() {
///     let bridge = WebSocketBridge::default();
///     let listener = bridge.listen("0.0.0.0:8765").await.expect("bind bridge port");
///     listener.spawn();
/// }
/// ```
#[derive(Clone, Debug, Default)]
pub struct WebSocketBridge {
    /// Bridge → clients.
    outbound: MessageBus,
    /// Clients → bridge.
    inbound: MessageBus,
}

impl WebSocketBridge {
    /// Create a bridge buffering up to `capacity` messages per lane and
    /// direction.
    pub fn new(capacity: usize) -> Self {
        Self {
            outbound: MessageBus::new(capacity),
            inbound: MessageBus::new(capacity),
        }
    }

    /// Bind the client listener on `addr`.  Call
    /// [`BridgeListener::spawn`] to start accepting.
    pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<BridgeListener, ArmError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "websocket bridge listening");
        Ok(BridgeListener {
            listener,
            bridge: self.clone(),
        })
    }

    /// Number of live client forwarding subscriptions (per lane).
    pub fn forwarding_clients(&self) -> usize {
        self.outbound.subscriber_count()
    }

    async fn handle_client(self, stream: TcpStream, peer: SocketAddr) -> Result<(), ArmError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| ArmError::Channel(format!("ws handshake from {peer}: {e}")))?;
        debug!(%peer, "websocket client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut channels = Vec::new();
        let mut forward = None;

        loop {
            tokio::select! {
                message = next_forwarded(&mut forward) => {
                    let Some(message) = message else { break };
                    let frame = WireFrame::publish(&message.binding, &message.payload);
                    let json = serde_json::to_string(&frame)
                        .map_err(|e| ArmError::Serialization(e.to_string()))?;
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                frame = ws_rx.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_frame(text.as_str(), peer, &mut channels, &mut forward);
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
            }
        }

        debug!(%peer, "websocket client disconnected");
        Ok(())
    }

    fn handle_frame(
        &self,
        text: &str,
        peer: SocketAddr,
        channels: &mut Vec<String>,
        forward: &mut Option<Subscription>,
    ) {
        let frame: WireFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%peer, error = %e, "ignoring unrecognised websocket frame");
                return;
            }
        };

        match frame {
            WireFrame::Subscribe { channel } => {
                if !channels.contains(&channel) {
                    channels.push(channel);
                }
                *forward = Some(self.outbound.subscribe_bindings(channels.as_slice()));
            }
            WireFrame::Unsubscribe { channel } => {
                channels.retain(|c| *c != channel);
                *forward = (!channels.is_empty())
                    .then(|| self.outbound.subscribe_bindings(channels.as_slice()));
            }
            WireFrame::Publish { channel, payload } => {
                if let Err(e) = self.inbound.send(&channel, decode_payload(payload)) {
                    warn!(%peer, %channel, error = %e, "failed to publish client frame");
                }
            }
        }
    }
}

#[async_trait]
impl PubSub for WebSocketBridge {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), ArmError> {
        self.outbound.send(channel, payload).map(|_| ())
    }

    fn subscribe(&self, bindings: &[String]) -> PubSubStream {
        self.inbound.subscribe_bindings(bindings).into_stream()
    }
}

async fn next_forwarded(forward: &mut Option<Subscription>) -> Option<BusMessage> {
    match forward {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// BridgeListener
// ---------------------------------------------------------------------------

/// A bound bridge listener, not yet accepting.
pub struct BridgeListener {
    listener: TcpListener,
    bridge: WebSocketBridge,
}

impl BridgeListener {
    /// Address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr, ArmError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept clients forever, one task each.
    pub async fn serve(self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let bridge = self.bridge.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bridge.handle_client(stream, peer).await {
                            error!(%peer, error = %e, "websocket client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "websocket accept failed");
                }
            }
        }
    }

    /// Run [`serve`][Self::serve] on its own task.  Abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.serve())
    }
}
