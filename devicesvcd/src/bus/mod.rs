//! Transport-independent bus binding surface (spec §4.8). Two
//! concrete bindings -- `mqtt` and `redis_streams` -- each drive one
//! background listener task per spec §5(iii), forwarding decoded
//! inbound messages onto a shared channel the dispatcher drains.

pub mod dispatch;
pub mod mqtt;
pub mod redis_streams;

use async_trait::async_trait;
use device_svc_api::Error;

/// One message observed on a subscribed topic.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publishes `payload` on `topic`. Fire-and-forget: failures are
    /// logged and dropped by the caller, never retried here (spec
    /// §4.5).
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Error>;

    /// Subscribes to a topic filter, already rendered in the
    /// transport's own wildcard convention by the caller.
    async fn subscribe(&self, topic_filter: &str) -> Result<(), Error>;
}
