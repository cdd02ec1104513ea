//! MQTT bus binding (spec §4.8 "Bus bindings").
//!
//! Owns a `rumqttc::AsyncClient` plus the `EventLoop` that drives it;
//! the event loop runs on its own background task (spec §5(iii): "a
//! background listener thread per bus binding") and forwards every
//! inbound `Publish` packet onto the shared `IncomingMessage` channel
//! the dispatcher drains. Credentials come from the `SecretStore`
//! under the configured key, never from the plain config tree.

use crate::bus::{Bus, IncomingMessage};
use crate::secretstore::SecretStore;
use async_trait::async_trait;
use device_svc_api::Error;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

fn qos_from_u8(qos: u8) -> QoS {
    match qos {
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtMostOnce,
    }
}

pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
}

impl MqttBus {
    /// Connects to the broker, retrying on failure up to `deadline`
    /// (spec §4.8 "On connect failure the binding retries up to a
    /// deadline"). Credentials are looked up from `secret_store` under
    /// `secret_name` unless that key is empty, in which case the
    /// connection is made anonymously.
    pub async fn connect(
        client_id: &str,
        host: &str,
        port: u16,
        qos: u8,
        secret_store: &dyn SecretStore,
        secret_name: &str,
        deadline: Duration,
    ) -> Result<(Self, mpsc::Receiver<IncomingMessage>), Error> {
        let mut opts = MqttOptions::new(client_id, host, port);
        opts.set_keep_alive(Duration::from_secs(30));
        opts.set_clean_session(true);

        if !secret_name.is_empty() {
            if let (Ok(username), Ok(password)) =
                (secret_store.get(secret_name, "username").await, secret_store.get(secret_name, "password").await)
            {
                opts.set_credentials(username, password);
            }
        }

        let (client, mut eventloop) = AsyncClient::new(opts, 256);
        let (tx, rx) = mpsc::channel(256);
        let deadline_at = tokio::time::Instant::now() + deadline;

        loop {
            match timeout(Duration::from_secs(5), eventloop.poll()).await {
                Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => {
                    info!(host, port, "connected to MQTT broker");
                    break;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    warn!(error = %e, "MQTT connect attempt failed");
                }
                Err(_) => {
                    warn!("MQTT connect attempt timed out");
                }
            }

            if tokio::time::Instant::now() >= deadline_at {
                return Err(Error::RemoteServerDown(format!("could not reach MQTT broker at {}:{} within {:?}", host, port, deadline)));
            }
        }

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = IncomingMessage { topic: publish.topic.clone(), payload: publish.payload.to_vec() };
                        if tx.send(message).await.is_err() {
                            debug!("incoming-message channel closed, stopping MQTT listener");
                            break;
                        }
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        error!(error = %e, "MQTT event loop error, reconnecting on next poll");
                    }
                }
            }
        });

        Ok((MqttBus { client, qos: qos_from_u8(qos) }, rx))
    }
}

#[async_trait]
impl Bus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Error> {
        // Fire-and-forget: a publish failure is logged at ERROR and
        // the event dropped, never retried here (spec §4.5).
        match self.client.publish(topic, self.qos, false, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(topic, error = %e, "failed to publish MQTT message");
                Err(Error::RemoteServerDown(e.to_string()))
            }
        }
    }

    async fn subscribe(&self, topic_filter: &str) -> Result<(), Error> {
        self.client
            .subscribe(topic_filter, self.qos)
            .await
            .map_err(|e| Error::RemoteServerDown(e.to_string()))
    }
}
