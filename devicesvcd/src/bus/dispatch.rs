//! Topic-based request/response dispatch (spec §4.8).
//!
//! A `Dispatcher` owns the ordered handler list (guarded by a small
//! mutex, per spec's "small mutex" requirement) and the logic that
//! turns one `IncomingMessage` into a decoded envelope, a located
//! handler, a path/query parameter map, and -- if the handler wrote a
//! reply -- an outgoing response envelope published back on the
//! `response` topic.

use crate::bus::{Bus, IncomingMessage};
use async_trait::async_trait;
use base64::Engine;
use device_svc_api::event::Envelope;
use device_svc_api::topic::Template;
use device_svc_api::Error;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, warn};
use uuid::Uuid;

pub type QueryParams = HashMap<String, String>;
pub type PathParams = HashMap<String, String>;

/// The outcome of one handler invocation: a status code (the
/// envelope's `errorCode`) and, if the handler produced one, the raw
/// reply bytes and its content type.
pub struct HandlerReply {
    pub status: i32,
    pub body: Option<(Vec<u8>, &'static str)>,
}

impl HandlerReply {
    pub fn ok(body: Vec<u8>, content_type: &'static str) -> Self {
        HandlerReply { status: 0, body: Some((body, content_type)) }
    }

    pub fn status_only(status: i32) -> Self {
        HandlerReply { status, body: None }
    }
}

/// A registered handler: `async_trait` so the same trait object works
/// for both owned closures and whole structs.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: &[u8], path: &PathParams, query: &QueryParams) -> HandlerReply;
}

/// Adapts any `Fn(&[u8], &PathParams, &QueryParams) -> Future<Output
/// = HandlerReply>` closure into a `Handler`, so most registrations
/// are a one-liner.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Vec<u8>, PathParams, QueryParams) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = HandlerReply> + Send,
{
    async fn handle(&self, request: &[u8], path: &PathParams, query: &QueryParams) -> HandlerReply {
        (self.0)(request.to_vec(), path.clone(), query.clone()).await
    }
}

struct Registration {
    template: Template,
    handler: Arc<dyn Handler>,
}

/// Dispatches inbound bus messages to registered handlers by
/// path-template match (spec §4.8 "Dispatch").
///
/// Handlers are matched head-to-tail in registration order, so -- per
/// spec -- more specific templates must be registered before more
/// general ones; this type does not sort or otherwise reorder them.
pub struct Dispatcher {
    registrations: Mutex<Vec<Registration>>,
    response_prefix: String,
    service_name: String,
}

impl Dispatcher {
    pub fn new(base_topic_prefix: &str, service_name: &str) -> Self {
        Dispatcher {
            registrations: Mutex::new(Vec::new()),
            response_prefix: format!("{}/response", base_topic_prefix.trim_end_matches('/')),
            service_name: service_name.to_string(),
        }
    }

    /// Registers a handler under a path template. Idempotent under the
    /// mutex guarding the list -- concurrent registrations never race
    /// each other, they simply append in whatever order they acquire
    /// the lock.
    pub async fn register(&self, template_spec: &str, handler: Arc<dyn Handler>) {
        let template = Template::compile(template_spec);
        self.registrations.lock().await.push(Registration { template, handler });
    }

    /// The set of subscription filters every registered template
    /// needs, already transport-agnostic (MQTT `#` wildcard form);
    /// bus bindings remap to their own convention at the edge.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.registrations.lock().await.iter().map(|r| r.template.subscription()).collect()
    }

    /// Handles one inbound message: decodes the envelope, locates the
    /// first registered handler whose template matches, installs the
    /// envelope's correlation ID, invokes the handler, and -- if it
    /// produced a reply -- publishes the wrapped response.
    pub async fn dispatch(&self, bus: &dyn Bus, message: IncomingMessage) {
        let envelope: Envelope = match serde_json::from_slice(&message.payload) {
            Ok(e) => e,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "dropping malformed envelope");
                return;
            }
        };

        let correlation_id = if envelope.correlation_id.is_empty() {
            Uuid::new_v4().to_string()
        } else {
            envelope.correlation_id.clone()
        };

        let body = match envelope.decode_payload() {
            Ok(b) => b,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "dropping envelope with unreadable payload");
                return;
            }
        };

        let query = envelope.query_params.clone().unwrap_or_default();

        let found = {
            let registrations = self.registrations.lock().await;
            registrations.iter().find_map(|r| {
                if !r.template.prefix_matches(&message.topic) {
                    return None;
                }
                r.template.unify(&message.topic).map(|params| (r.handler.clone(), params))
            })
        };

        let Some((handler, path_params)) = found else {
            warn!(topic = %message.topic, "no handler registered for topic");
            return;
        };

        let reply = CORRELATION_ID
            .scope(correlation_id.clone(), handler.handle(&body, &path_params, &query))
            .await;

        if let Some((bytes, content_type)) = reply.body {
            let response_topic = match envelope.request_id.as_deref() {
                Some(request_id) => format!("{}/{}/{}", self.response_prefix, self.service_name, request_id),
                None => {
                    warn!(topic = %message.topic, "handler replied to a request with no requestID; dropping reply");
                    return;
                }
            };

            let response_envelope = Envelope {
                api_version: device_svc_api::event::API_VERSION.to_string(),
                correlation_id,
                request_id: envelope.request_id,
                content_type: content_type.to_string(),
                error_code: reply.status,
                payload: base64::engine::general_purpose::STANDARD.encode(bytes),
                query_params: None,
            };

            match serde_json::to_vec(&response_envelope) {
                Ok(wire) => {
                    if let Err(e) = bus.publish(&response_topic, wire).await {
                        error!(topic = %response_topic, error = %e, "failed to publish response");
                    }
                }
                Err(e) => error!(error = %e, "failed to serialize response envelope"),
            }
        }
    }
}

tokio::task_local! {
    /// The per-request correlation ID (spec §9 "per-thread
    /// correlation-id" redesign note: a tasks-plus-channels model
    /// threads it as a task-local for the duration of one handler
    /// invocation, rather than the source's thread-local).
    pub static CORRELATION_ID: String;
}

/// Reads the correlation ID of the handler currently executing on
/// this task, if any. Used by code deep in the call stack (e.g. the
/// event publisher) that wants to tag its own log lines without
/// threading the value through every signature.
pub fn current_correlation_id() -> Option<String> {
    CORRELATION_ID.try_with(|id| id.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        async fn handle(&self, request: &[u8], path: &PathParams, _query: &QueryParams) -> HandlerReply {
            assert_eq!(path.get("name").map(String::as_str), Some("sensor7"));
            HandlerReply::ok(request.to_vec(), "application/json")
        }
    }

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

    #[tokio::test]
    async fn test_s6_dispatch_and_response() {
        let dispatcher = Dispatcher::new("edgex", "device-svc");
        dispatcher.register("edgex/device/command/request/device-svc/{name}/{cmd}", Arc::new(EchoHandler)).await;

        let bus = RecordingBus { published: Mutex::new(Vec::new()) };

        let envelope = Envelope::success("corr-1".into(), "application/json", b"hello");
        let mut envelope = envelope;
        envelope.request_id = Some("req-1".into());

        let message = IncomingMessage {
            topic: "edgex/device/command/request/device-svc/sensor7/read_all".into(),
            payload: serde_json::to_vec(&envelope).unwrap(),
        };

        dispatcher.dispatch(&bus, message).await;

        let published = bus.published.lock().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "edgex/response/device-svc/req-1");
    }

    #[tokio::test]
    async fn test_unregistered_topic_is_dropped_silently() {
        let dispatcher = Dispatcher::new("edgex", "device-svc");
        let bus = RecordingBus { published: Mutex::new(Vec::new()) };

        let message = IncomingMessage { topic: "edgex/unknown/topic".into(), payload: b"{}".to_vec() };
        dispatcher.dispatch(&bus, message).await;

        assert!(bus.published.lock().await.is_empty());
    }
}
