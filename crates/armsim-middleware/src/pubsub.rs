//! The publish/subscribe boundary.
//!
//! The workspace never talks to a broker directly.  It publishes byte
//! payloads to a named channel and consumes a stream of messages for the
//! bindings it subscribed to; everything else (connections, retries,
//! exchange declaration, framing) lives behind this trait.
//!
//! - [`MessageBus`][crate::bus::MessageBus] – in-process implementation used
//!   by the `armsim` binary's `local` transport and the test suites.
//! - [`WebSocketBridge`][crate::ws_bridge::WebSocketBridge] – the `websocket`
//!   transport; external clients publish and subscribe over JSON frames.

use async_trait::async_trait;
use armsim_types::ArmError;
use futures_util::stream::BoxStream;

use crate::bus::BusMessage;

/// Stream of inbound messages for one subscription.
pub type PubSubStream = BoxStream<'static, BusMessage>;

/// Every message-broker integration must implement this trait.
///
/// # Contract
///
/// * `publish` – hand `payload` to the broker on `channel`.  Having no
///   consumer on the other end is not an error.
///
/// * `subscribe` – return a live stream of messages whose channel matches
///   one of `bindings`.  The stream ends when the broker shuts down.
#[async_trait]
pub trait PubSub: Send + Sync {
    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), ArmError>;

    /// Subscribe to every channel matched by `bindings`.
    fn subscribe(&self, bindings: &[String]) -> PubSubStream;
}
