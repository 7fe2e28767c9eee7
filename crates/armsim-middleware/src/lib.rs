//! `armsim-middleware` – The Message Boundary
//!
//! Carries opaque byte payloads between the workspace and the outside world
//! without caring about their meaning.
//!
//! # Modules
//!
//! - [`pubsub`] – [`PubSub`]: the publish/subscribe boundary the workspace
//!   talks to.  Connection lifecycle, retries and framing belong to the
//!   implementation, never to the caller.
//! - [`bus`] – [`MessageBus`]: an in-process broker built on Tokio broadcast
//!   channels, one lane per top-level channel segment, that implements
//!   [`PubSub`] with routing-key style bindings.
//! - [`ws_bridge`] – [`WebSocketBridge`]: a [`PubSub`] whose peers are
//!   WebSocket clients speaking JSON frames.

pub mod bus;
pub mod pubsub;
pub mod ws_bridge;

pub use bus::{BusMessage, MessageBus, Subscription, binding_matches, lane_of};
pub use pubsub::{PubSub, PubSubStream};
pub use ws_bridge::{BridgeListener, WebSocketBridge, WireFrame};
