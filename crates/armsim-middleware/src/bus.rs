//! In-process message broker.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every matching message without any single subscriber
//! blocking the others or the publisher.
//!
//! # Bindings
//!
//! A subscription lists one or more *bindings*.  A message published on
//! `channel` is delivered when the channel equals a binding or extends it
//! with a dot-separated suffix, which is how per-arm routing keys work:
//!
//! | Binding | Channel | Delivered |
//! |---|---|---|
//! | `control.robot` | `control.robot` | yes |
//! | `control.robot` | `control.robot.arm-1` | yes |
//! | `control.robot` | `control.robotics` | no |
//! | `telemetry` | `control.robot` | no |
//!
//! # Lanes
//!
//! Each top-level channel segment (`telemetry`, `control`, ...) gets its own
//! broadcast channel, its *lane*.  A subscription is attached to the lanes of
//! its bindings only, so a flood of telemetry never shares a buffer with
//! control traffic.
//!
//! | Channel | Lane |
//! |---|---|
//! | `telemetry` | `telemetry` |
//! | `control.robot.arm-1` | `control` |
//!
//! # Back-pressure
//!
//! Publishing never blocks.  A subscriber that falls more than `capacity`
//! messages behind on one lane loses the oldest messages of that lane; the
//! loss is logged and the subscription keeps going.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use armsim_types::ArmError;
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::{self, SelectAll};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::pubsub::{PubSub, PubSubStream};

/// Default per-lane capacity (number of buffered messages before old ones
/// are dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 1024;

/// A message as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Channel (routing key) the message was published on.
    pub binding: String,
    pub payload: Vec<u8>,
}

/// `true` when a message on `channel` should reach a subscriber bound to
/// `binding`.
pub fn binding_matches(binding: &str, channel: &str) -> bool {
    match channel.strip_prefix(binding) {
        Some("") => true,
        Some(rest) => rest.starts_with('.'),
        None => false,
    }
}

/// Lane a channel or binding is carried on: its first dot-separated segment.
pub fn lane_of(channel: &str) -> &str {
    channel.split_once('.').map_or(channel, |(lane, _)| lane)
}

/// Shared broker handle. Clone it cheaply – all clones share the same
/// lanes.
#[derive(Clone, Debug)]
pub struct MessageBus {
    capacity: usize,
    lanes: Arc<Mutex<HashMap<String, broadcast::Sender<BusMessage>>>>,
}

impl MessageBus {
    /// Create a new bus buffering up to `capacity` messages per subscriber
    /// and lane.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Publish `payload` on `channel`.
    ///
    /// Returns the number of live subscriptions on the channel's lane the
    /// message was handed to (before binding filters are applied).  `Ok(0)`
    /// means nobody is listening, which is a normal condition.
    pub fn send(&self, channel: &str, payload: Vec<u8>) -> Result<usize, ArmError> {
        let Some(sender) = self.lanes.lock().get(lane_of(channel)).cloned() else {
            trace!(channel, "no subscribers on the lane");
            return Ok(0);
        };
        let message = BusMessage {
            binding: channel.to_string(),
            payload,
        };
        match sender.send(message) {
            Ok(n) => Ok(n),
            Err(broadcast::error::SendError(_)) => {
                trace!(channel, "no subscribers on the lane");
                Ok(0)
            }
        }
    }

    /// Subscribe to every channel matched by `bindings`.
    pub fn subscribe_bindings(&self, bindings: &[String]) -> Subscription {
        let capacity = self.capacity;
        let shared: Arc<[String]> = bindings.into();
        let mut lanes = self.lanes.lock();
        let mut streams = SelectAll::new();
        let names: BTreeSet<&str> = bindings.iter().map(|b| lane_of(b)).collect();
        for name in names {
            let sender = lanes
                .entry(name.to_string())
                .or_insert_with(|| broadcast::channel(capacity).0);
            streams.push(lane_stream(
                name.to_string(),
                Arc::clone(&shared),
                sender.subscribe(),
            ));
        }
        Subscription {
            bindings: bindings.to_vec(),
            streams,
        }
    }

    /// Number of live lane receivers, summed over all lanes.  A subscription
    /// spanning two lanes counts twice.
    pub fn subscriber_count(&self) -> usize {
        self.lanes.lock().values().map(|s| s.receiver_count()).sum()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl PubSub for MessageBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), ArmError> {
        self.send(channel, payload).map(|_| ())
    }

    fn subscribe(&self, bindings: &[String]) -> PubSubStream {
        self.subscribe_bindings(bindings).into_stream()
    }
}

fn lane_stream(
    lane: String,
    bindings: Arc<[String]>,
    receiver: broadcast::Receiver<BusMessage>,
) -> PubSubStream {
    Box::pin(stream::unfold(
        (receiver, lane, bindings),
        |(mut receiver, lane, bindings)| async move {
            loop {
                match receiver.recv().await {
                    Ok(message)
                        if bindings.iter().any(|b| binding_matches(b, &message.binding)) =>
                    {
                        return Some((message, (receiver, lane, bindings)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        // Subscriber fell behind on this lane; log and continue.
                        warn!(%lane, ?bindings, lagged_by = n, "subscription lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        },
    ))
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A receiver that only yields messages whose channel matches one of its
/// bindings, merged across the lanes those bindings live on.
pub struct Subscription {
    bindings: Vec<String>,
    streams: SelectAll<PubSubStream>,
}

impl Subscription {
    /// Wait for the next matching message.
    ///
    /// Returns `None` when the bus is closed and no further messages will
    /// arrive.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.streams.next().await
    }

    /// Bindings this subscription listens on.
    pub fn bindings(&self) -> &[String] {
        &self.bindings
    }

    /// Convert into a boxed stream, the shape the [`PubSub`] boundary hands
    /// out.
    pub fn into_stream(self) -> PubSubStream {
        Box::pin(self.streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn bindings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn binding_rules() {
        assert!(binding_matches("control.robot", "control.robot"));
        assert!(binding_matches("control.robot", "control.robot.arm-1"));
        assert!(!binding_matches("control.robot", "control.robotics"));
        assert!(!binding_matches("telemetry", "control.robot"));
        assert!(!binding_matches("control.robot.arm-1", "control.robot"));
    }

    #[tokio::test]
    async fn publish_and_receive() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe_bindings(&bindings(&["telemetry"]));

        bus.publish("telemetry", b"hello".to_vec()).await?;

        let received = sub.recv().await.ok_or("no message received")?;
        assert_eq!(received.binding, "telemetry");
        assert_eq!(received.payload, b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn subscription_filters_other_channels() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe_bindings(&bindings(&["control.robot"]));

        // Should NOT match.
        bus.send("telemetry", b"skip".to_vec())?;
        // Should match through the suffix rule.
        bus.send("control.robot.arm-7", b"take".to_vec())?;

        let received = sub.recv().await.ok_or("no message received")?;
        assert_eq!(received.payload, b"take");
        Ok(())
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_message() -> Result<(), Box<dyn std::error::Error>> {
        let bus = MessageBus::default();
        let mut a = bus.subscribe_bindings(&bindings(&["telemetry"]));
        let mut b = bus.subscribe_bindings(&bindings(&["telemetry"]));

        bus.send("telemetry", vec![1, 2, 3])?;

        assert_eq!(a.recv().await.ok_or("a")?.payload, vec![1, 2, 3]);
        assert_eq!(b.recv().await.ok_or("b")?.payload, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = MessageBus::default();
        assert_eq!(bus.send("telemetry", vec![0]).unwrap(), 0);
    }

    #[tokio::test]
    async fn unmatched_subscriber_sees_nothing() {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe_bindings(&bindings(&["control.robot"]));
        bus.send("telemetry", vec![1]).unwrap();

        let result = tokio::time::timeout(Duration::from_millis(50), sub.recv()).await;
        assert!(result.is_err(), "control subscriber must not receive telemetry");
    }

    /// Flooding a small bus while a subscriber sleeps drops the oldest
    /// messages but never blocks the publisher or ends the subscription.
    #[tokio::test]
    async fn slow_subscriber_loses_oldest_messages() {
        const CAPACITY: usize = 16;
        let bus = MessageBus::new(CAPACITY);
        let mut slow = bus.subscribe_bindings(&bindings(&["telemetry"]));

        for i in 0..1_000u32 {
            bus.send("telemetry", i.to_be_bytes().to_vec()).unwrap();
        }

        let first = slow.recv().await.expect("subscription survives lag");
        let n = u32::from_be_bytes(first.payload.try_into().unwrap());
        assert!(n >= 1_000 - CAPACITY as u32, "expected a recent message, got #{n}");
    }

    #[test]
    fn lanes_are_first_segments() {
        assert_eq!(lane_of("telemetry"), "telemetry");
        assert_eq!(lane_of("control.robot"), "control");
        assert_eq!(lane_of("control.robot.arm-1"), "control");
    }

    /// Telemetry volume far beyond the lane capacity must not push a pending
    /// control message out of the control subscriber's buffer.
    #[tokio::test]
    async fn telemetry_flood_keeps_control_intact() {
        let bus = MessageBus::new(2);
        let mut control = bus.subscribe_bindings(&bindings(&["control.robot"]));
        let _telemetry = bus.subscribe_bindings(&bindings(&["telemetry"]));

        bus.send("control.robot", b"off".to_vec()).unwrap();
        for i in 0..100u32 {
            bus.send("telemetry", i.to_be_bytes().to_vec()).unwrap();
        }

        let received = tokio::time::timeout(Duration::from_millis(50), control.recv())
            .await
            .expect("control message delivered")
            .expect("bus open");
        assert_eq!(received.payload, b"off");
    }

    #[tokio::test]
    async fn one_subscription_spans_several_lanes() {
        let bus = MessageBus::default();
        let mut sub = bus.subscribe_bindings(&bindings(&["telemetry", "control.robot"]));
        assert_eq!(bus.subscriber_count(), 2);

        bus.send("control.robot.arm-2", vec![1]).unwrap();
        bus.send("telemetry", vec![2]).unwrap();

        let mut payloads = vec![
            sub.recv().await.expect("first").payload,
            sub.recv().await.expect("second").payload,
        ];
        payloads.sort();
        assert_eq!(payloads, vec![vec![1], vec![2]]);
    }

    #[test]
    fn bindings_on_one_lane_share_a_receiver() {
        let bus = MessageBus::default();
        let _sub = bus.subscribe_bindings(&bindings(&["control.robot", "control.robot.arm-1"]));
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn stream_ends_when_bus_is_dropped() {
        let bus = MessageBus::default();
        let mut stream = PubSub::subscribe(&bus, &bindings(&["telemetry"]));
        bus.send("telemetry", vec![9]).unwrap();
        drop(bus);

        assert_eq!(stream.next().await.map(|m| m.payload), Some(vec![9]));
        assert!(stream.next().await.is_none());
    }
}
