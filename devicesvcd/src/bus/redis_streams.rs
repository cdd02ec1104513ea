//! Redis Streams bus binding (spec §4.8 "Bus bindings").
//!
//! Holds two connections: one for publish, guarded by a mutex and
//! reconnected on error; one dedicated to a blocking `XREAD` loop
//! running on its own background task. Topic slashes are remapped to
//! dots on the wire (Redis key convention) via
//! `device_svc_api::topic::mqtt_topic_to_redis`/`redis_topic_to_mqtt`
//! and back on ingress.

use crate::bus::{Bus, IncomingMessage};
use async_trait::async_trait;
use device_svc_api::topic::{mqtt_topic_to_redis, redis_topic_to_mqtt};
use device_svc_api::Error;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisResult};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, warn};

const STREAM_MAXLEN: usize = 10_000;

pub struct RedisStreamsBus {
    publish_conn: Mutex<MultiplexedConnection>,
    client: Client,
}

impl RedisStreamsBus {
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let client = Client::open(url).map_err(|e| Error::RemoteServerDown(e.to_string()))?;
        let publish_conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| Error::RemoteServerDown(e.to_string()))?;

        Ok(RedisStreamsBus { publish_conn: Mutex::new(publish_conn), client })
    }

    /// Spawns the background task that runs the blocking `XREAD`
    /// subscribe loop for every stream key in `topic_filters`
    /// (already remapped from their MQTT-style wildcard form), pushing
    /// decoded messages onto the returned channel.
    pub fn spawn_subscriber(self: &Arc<Self>, subscriptions: Vec<String>) -> mpsc::Receiver<IncomingMessage> {
        let (tx, rx) = mpsc::channel(256);
        let client = self.client.clone();

        tokio::spawn(async move {
            let streams: Vec<String> = subscriptions.iter().map(|s| mqtt_topic_to_redis(s)).collect();

            loop {
                match client.get_multiplexed_async_connection().await {
                    Ok(mut conn) => {
                        if let Err(e) = read_loop(&mut conn, &streams, &tx).await {
                            error!(error = %e, "redis streams read loop ended, reconnecting");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "could not open redis subscribe connection, retrying");
                        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                    }
                }

                if tx.is_closed() {
                    debug!("incoming-message channel closed, stopping redis streams listener");
                    break;
                }
            }
        });

        rx
    }
}

async fn read_loop(conn: &mut MultiplexedConnection, streams: &[String], tx: &mpsc::Sender<IncomingMessage>) -> RedisResult<()> {
    if streams.is_empty() {
        // Nothing registered yet; idle rather than busy-loop.
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        return Ok(());
    }

    let ids: Vec<&str> = streams.iter().map(|_| "$").collect();

    let opts = redis::streams::StreamReadOptions::default().block(5_000).count(32);
    let reply: redis::streams::StreamReadReply = conn.xread_options(streams, &ids, &opts).await?;

    for stream_key in reply.keys {
        let mqtt_topic = redis_topic_to_mqtt(&stream_key.key);
        for entry in stream_key.ids {
            if let Some(redis::Value::BulkString(payload)) = entry.map.get("payload") {
                let message = IncomingMessage { topic: mqtt_topic.clone(), payload: payload.clone() };
                if tx.send(message).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

#[async_trait]
impl Bus for RedisStreamsBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), Error> {
        let stream_key = mqtt_topic_to_redis(topic);
        let mut conn = self.publish_conn.lock().await;

        let result: RedisResult<String> =
            conn.xadd_maxlen(&stream_key, redis::streams::StreamMaxlen::Approx(STREAM_MAXLEN), "*", &[("payload", payload.as_slice())]).await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                error!(topic, error = %e, "failed to XADD to redis stream");
                // Reconnect on next publish rather than retrying now --
                // the core never retries a publish itself (spec §4.5).
                if let Ok(fresh) = self.client.get_multiplexed_async_connection().await {
                    *conn = fresh;
                }
                Err(Error::RemoteServerDown(e.to_string()))
            }
        }
    }

    async fn subscribe(&self, _topic_filter: &str) -> Result<(), Error> {
        // Subscription is expressed by which streams `spawn_subscriber`
        // was given at startup; this binding re-derives its stream set
        // from the dispatcher's registered templates rather than
        // supporting dynamic subscribe-after-connect.
        Ok(())
    }
}
