//! Event publication (spec §4.5): wraps a cooked event in a response
//! envelope and publishes it under the per-command device-events
//! topic, updating the events-sent/readings-sent metrics on success.

use crate::bus::Bus;
use crate::metrics::Metrics;
use device_svc_api::event::{CookedEvent, Envelope};
use std::sync::atomic::Ordering;
use tracing::error;
use uuid::Uuid;

/// Publishes `event` on `<prefix>/events/device/<profile>/<device>/<command>`
/// (spec §4.3 step 10, §6 "Bus topics"). The envelope's
/// `correlationID` is whatever the caller propagated, or a fresh UUID
/// if this publication was not made in response to an inbound
/// request (e.g. an autoevent tick).
pub async fn publish_event(bus: &dyn Bus, metrics: &Metrics, base_topic_prefix: &str, correlation_id: Option<String>, event: &CookedEvent) {
    let body = match event.encode() {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to serialize event, dropping");
            return;
        }
    };

    let envelope = Envelope::success(correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()), event.encoding().content_type(), &body);

    let wire = match serde_json::to_vec(&envelope) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, "failed to serialize event envelope, dropping");
            return;
        }
    };

    let topic = format!(
        "{}/events/device/{}/{}/{}",
        base_topic_prefix.trim_end_matches('/'),
        event.profile,
        event.device,
        event.command
    );

    match bus.publish(&topic, wire).await {
        Ok(()) => {
            metrics.events_sent.fetch_add(1, Ordering::Relaxed);
            metrics.readings_sent.fetch_add(event.readings.len() as u64, Ordering::Relaxed);
        }
        // A hard publish failure is logged at ERROR and the event is
        // dropped, not retried -- retries are the bus binding's own
        // concern (spec §4.5).
        Err(e) => error!(topic = %topic, error = %e, "failed to publish event, dropping"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use device_svc_api::device::Name;
    use device_svc_api::event::Reading;
    use device_svc_api::{Error, Value};
    use tokio::sync::Mutex;

    struct RecordingBus {
        published: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Bus for RecordingBus {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Error> {
            self.published.lock().await.push((topic.to_string(), payload));
            Ok(())
        }

        async fn subscribe(&self, _topic_filter: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    fn mk_event() -> CookedEvent {
        CookedEvent {
            profile: Name::create("p1").unwrap(),
            device: Name::create("d1").unwrap(),
            command: Name::create("read_all").unwrap(),
            readings: vec![Reading::new(Name::create("d1").unwrap(), Name::create("p1").unwrap(), Name::create("temp").unwrap(), 0, Value::I32(5))],
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_publish_event_increments_metrics() {
        let bus = RecordingBus { published: Mutex::new(Vec::new()) };
        let metrics = Metrics::default();

        publish_event(&bus, &metrics, "edgex", Some("corr-1".into()), &mk_event()).await;

        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "edgex/events/device/p1/d1/read_all");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_sent, 1);
        assert_eq!(snapshot.readings_sent, 1);
    }
}
