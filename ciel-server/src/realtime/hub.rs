//! Fan-out hub
//!
//! One coordinator task owns the set of attached clients. Registrations,
//! unregistrations, and broadcasts all arrive over channels, so the client
//! set is never shared or locked. Delivery into each client's bounded
//! outbound buffer is non-blocking: a full buffer marks the client as a slow
//! consumer, which evicts it and closes its buffer — the write pump drains
//! what was accepted and exits. Slow clients are disconnected rather than
//! allowed to stall everyone else.
//!
//! With a shared pub/sub channel configured, publications go to the channel
//! only and the local broadcast is fed exclusively by subscription
//! deliveries; a single instance without the channel publishes straight into
//! its local broadcast, so no loopback duplication arises in either shape.

use std::collections::HashMap;
use std::fmt;
use std::ops::DerefMut;
use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool as RedisPool;
use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::cache;
use crate::config::RealtimeConfig;
use crate::error::{Error, Result};

use super::event::{self, TimelineEvent};

/// Bounded inbound event queue feeding the coordinator
pub const INBOUND_QUEUE: usize = 128;

/// Per-client outbound buffer; overflowing it evicts the client
pub const CLIENT_BUFFER: usize = 16;

/// Unique identifier for an attached client connection
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self.0)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registration message: a client and the sending half of its buffer
struct Registration {
    id: ClientId,
    sender: mpsc::Sender<Arc<str>>,
}

/// Shared pub/sub collaborator
#[derive(Clone)]
struct SharedChannel {
    pool: RedisPool,
    channel: String,
    secret: Option<Vec<u8>>,
}

/// Redis handles the hub needs when cross-instance fan-out is configured
pub struct HubRedis {
    pub pool: RedisPool,
    pub client: redis::Client,
}

/// Cloneable handle for talking to the hub
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::Sender<ClientId>,
    broadcast_tx: mpsc::Sender<TimelineEvent>,
    shared: Option<SharedChannel>,
    ready_rx: watch::Receiver<bool>,
}

impl HubHandle {
    /// Attach a client; `sender` is the hub-side half of its outbound buffer
    pub async fn register(&self, id: ClientId, sender: mpsc::Sender<Arc<str>>) -> Result<()> {
        self.register_tx
            .send(Registration { id, sender })
            .await
            .map_err(|_| Error::Internal("realtime hub stopped".to_string()))
    }

    /// Detach a client
    pub async fn unregister(&self, id: ClientId) -> Result<()> {
        self.unregister_tx
            .send(id)
            .await
            .map_err(|_| Error::Internal("realtime hub stopped".to_string()))
    }

    /// Publish an event to every attached client (and, when configured,
    /// every other instance)
    ///
    /// Validation happens before anything is enqueued. Delivery is
    /// best-effort; callers treat errors as log-and-continue.
    pub async fn publish(&self, event: TimelineEvent) -> Result<()> {
        event.validate()?;

        match &self.shared {
            Some(shared) => {
                let wire = event::seal(&event, shared.secret.as_deref())?;
                cache::with_data_timeout(async {
                    let mut conn = shared.pool.get().await?;
                    redis::cmd("PUBLISH")
                        .arg(&shared.channel)
                        .arg(&wire)
                        .query_async::<()>(conn.deref_mut())
                        .await
                        .map_err(Error::from)?;
                    Ok(())
                })
                .await
            }
            None => match self.broadcast_tx.try_send(event) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("realtime inbound queue full, dropping event");
                    Ok(())
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Err(Error::Internal("realtime hub stopped".to_string()))
                }
            },
        }
    }

    /// Wait until the hub is attached to its event source
    ///
    /// With a shared channel this resolves once the subscription handshake
    /// completes; without one it resolves immediately.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Spawn the hub coordinator (and the subscription pump when a shared
/// channel is configured), returning the handle
pub fn spawn(config: &RealtimeConfig, redis: Option<HubRedis>) -> HubHandle {
    let (register_tx, register_rx) = mpsc::channel(INBOUND_QUEUE);
    let (unregister_tx, unregister_rx) = mpsc::channel(INBOUND_QUEUE);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(INBOUND_QUEUE);
    let (ready_tx, ready_rx) = watch::channel(false);

    let secret = config
        .signing_secret
        .as_ref()
        .map(|s| s.as_bytes().to_vec());

    let shared = match redis {
        Some(redis) => {
            tokio::spawn(run_subscriber(
                redis.client,
                config.channel.clone(),
                secret.clone(),
                broadcast_tx.clone(),
                ready_tx,
            ));
            Some(SharedChannel {
                pool: redis.pool,
                channel: config.channel.clone(),
                secret,
            })
        }
        None => {
            let _ = ready_tx.send(true);
            None
        }
    };

    tokio::spawn(run_coordinator(register_rx, unregister_rx, broadcast_rx));

    HubHandle {
        register_tx,
        unregister_tx,
        broadcast_tx,
        shared,
        ready_rx,
    }
}

/// The coordinator owns the client set; all mutation arrives by message
async fn run_coordinator(
    mut register_rx: mpsc::Receiver<Registration>,
    mut unregister_rx: mpsc::Receiver<ClientId>,
    mut broadcast_rx: mpsc::Receiver<TimelineEvent>,
) {
    let mut clients: HashMap<ClientId, mpsc::Sender<Arc<str>>> = HashMap::new();

    loop {
        tokio::select! {
            registration = register_rx.recv() => match registration {
                Some(registration) => {
                    tracing::debug!(client = %registration.id, "realtime client attached");
                    clients.insert(registration.id, registration.sender);
                }
                None => break,
            },
            id = unregister_rx.recv() => match id {
                Some(id) => {
                    clients.remove(&id);
                    tracing::debug!(client = %id, "realtime client detached");
                }
                None => break,
            },
            event = broadcast_rx.recv() => match event {
                Some(event) => fan_out(&mut clients, &event),
                None => break,
            },
        }
    }

    tracing::debug!("realtime hub coordinator stopped");
}

/// Deliver one event to every client, evicting slow consumers
fn fan_out(clients: &mut HashMap<ClientId, mpsc::Sender<Arc<str>>>, event: &TimelineEvent) {
    let text: Arc<str> = match serde_json::to_string(event) {
        Ok(json) => json.into(),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize realtime event");
            return;
        }
    };

    let mut evicted: Vec<ClientId> = Vec::new();
    for (id, sender) in clients.iter() {
        match sender.try_send(text.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(client = %id, "evicting slow realtime consumer");
                evicted.push(*id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                evicted.push(*id);
            }
        }
    }

    // Dropping the sender closes the client's buffer; its write pump drains
    // what was accepted and exits with a close frame.
    for id in evicted {
        clients.remove(&id);
    }
}

/// Subscription pump: feed shared-channel deliveries into the local broadcast
async fn run_subscriber(
    client: redis::Client,
    channel: String,
    secret: Option<Vec<u8>>,
    broadcast_tx: mpsc::Sender<TimelineEvent>,
    ready_tx: watch::Sender<bool>,
) {
    loop {
        match client.get_async_pubsub().await {
            Ok(mut pubsub) => match pubsub.subscribe(&channel).await {
                Ok(()) => {
                    // Readiness is signaled once, on the first successful
                    // handshake.
                    let _ = ready_tx.send(true);
                    tracing::info!(channel = %channel, "realtime subscription attached");

                    let mut stream = pubsub.on_message();
                    while let Some(msg) = stream.next().await {
                        let Ok(payload) = msg.get_payload::<String>() else {
                            continue;
                        };
                        let Some(event) = event::open(&payload, secret.as_deref()) else {
                            continue;
                        };
                        if broadcast_tx.try_send(event).is_err() {
                            tracing::warn!("realtime inbound queue full, dropping delivery");
                        }
                    }
                    tracing::warn!("realtime subscription stream ended");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "realtime subscribe failed");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "realtime pub/sub connection failed");
            }
        }

        if broadcast_tx.is_closed() {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn hub() -> HubHandle {
        spawn(&RealtimeConfig::default(), None)
    }

    fn deletion() -> TimelineEvent {
        TimelineEvent::PostDeleted {
            post_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn ready_resolves_immediately_without_shared_channel() {
        let hub = hub();
        timeout(Duration::from_secs(1), hub.ready())
            .await
            .expect("ready should not block");
    }

    #[tokio::test]
    async fn invalid_events_are_rejected_before_enqueue() {
        let hub = hub();
        let result = hub
            .publish(TimelineEvent::PostDeleted { post_id: Uuid::nil() })
            .await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn broadcast_reaches_registered_clients_in_order() {
        let hub = hub();
        hub.ready().await;

        let (tx, mut rx) = mpsc::channel(CLIENT_BUFFER);
        hub.register(ClientId::new(), tx).await.unwrap();

        let events: Vec<TimelineEvent> = (0..3).map(|_| deletion()).collect();
        let expected: Vec<String> = events
            .iter()
            .map(|e| serde_json::to_string(e).unwrap())
            .collect();
        for event in events {
            hub.publish(event).await.unwrap();
        }

        for want in expected {
            let got = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("delivery should arrive")
                .expect("channel should stay open");
            assert_eq!(got.as_ref(), want);
        }
    }

    #[tokio::test]
    async fn unregistered_clients_receive_nothing_further() {
        let hub = hub();
        let id = ClientId::new();
        let (tx, mut rx) = mpsc::channel(CLIENT_BUFFER);
        hub.register(id, tx).await.unwrap();
        hub.unregister(id).await.unwrap();

        // Give the coordinator a moment to process the unregister, then
        // publish.
        tokio::time::sleep(Duration::from_millis(50)).await;
        hub.publish(deletion()).await.unwrap();

        // The hub dropped its sender, so the channel closes without a
        // delivery.
        let got = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_and_healthy_client_unaffected() {
        let hub = hub();
        hub.ready().await;

        let total = CLIENT_BUFFER + 1; // 17: capacity plus the eviction trigger

        // Healthy client: a reader task plus enough buffer that scheduling
        // jitter cannot stall it.
        let (healthy_tx, mut healthy_rx) = mpsc::channel(total);
        hub.register(ClientId::new(), healthy_tx).await.unwrap();

        // Slow client never reads and has the standard bounded buffer.
        let (slow_tx, mut slow_rx) = mpsc::channel(CLIENT_BUFFER);
        hub.register(ClientId::new(), slow_tx).await.unwrap();
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            while received.len() < total {
                match healthy_rx.recv().await {
                    Some(text) => received.push(text),
                    None => break,
                }
            }
            received
        });

        for _ in 0..total {
            hub.publish(deletion()).await.unwrap();
        }

        let received = timeout(Duration::from_secs(5), reader)
            .await
            .expect("healthy client should receive everything")
            .unwrap();
        assert_eq!(received.len(), total);

        // The slow client was evicted on the overflowing send: its buffer
        // holds exactly the capacity it accepted, then closes.
        let mut drained = 0;
        loop {
            match timeout(Duration::from_secs(2), slow_rx.recv()).await.unwrap() {
                Some(_) => drained += 1,
                None => break,
            }
        }
        assert_eq!(drained, CLIENT_BUFFER);
    }
}
