//! Real-time distribution of queue snapshots.
//!
//! Each service has a broadcast topic; a single admin topic carries every
//! snapshot, tagged with its service, and is filtered per connection by the
//! caller's [`AdminScope`](crate::access::AdminScope).
//!
//! Recompute-and-publish is serialized per `(service, date)`, and a
//! subscription computes its initial snapshot under the same lock after its
//! receiver exists. Every computed snapshot takes the next value of a
//! hub-wide sequence while that lock is held, so sequences order the
//! snapshots of one key. A connection delivers a snapshot only when its
//! sequence is newer than the last one it delivered (or returned from
//! `subscribe`) for that key, which also drops the second copy an admin
//! receives when it has joined a service topic as well.
//!
//! Topics are process-local. Running several nodes needs a shared bus in
//! front of [`RealtimeHub::publish`].

use crate::access::Principal;
use crate::calendar::SlotCalendar;
use crate::environment::Clock;
use crate::error::AdmissionError;
use crate::metrics;
use crate::projection::QueueStateProjector;
use crate::token::{TokenError, TokenVerifier};
use crate::types::{ServiceDefinition, ServiceId, ServiceSnapshot};
use chrono::NaiveDate;
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;

/// Receives notice that a slot's occupancy changed.
///
/// Called after the change is committed. Implementations must not fail the
/// caller; publication is fire-and-forget.
pub trait SnapshotPublisher: Send + Sync {
    /// Recompute and distribute the snapshot of `service` on `date`.
    fn refresh<'a>(&'a self, service: &'a ServiceDefinition, date: NaiveDate) -> BoxFuture<'a, ()>;
}

/// A broadcast channel name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Snapshots of one service
    Service(ServiceId),
    /// Snapshots of every service, for administrators
    Admin,
}

/// A snapshot delivered on a topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubEvent {
    /// Topic the snapshot arrived on
    pub topic: Topic,
    /// Position of the snapshot among those computed for its service and date
    pub sequence: u64,
    /// Snapshot; carries its service id and date
    pub snapshot: Arc<ServiceSnapshot>,
}

/// Connection failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Token missing or invalid; no session was created.
    #[error(transparent)]
    Unauthorized(#[from] TokenError),
}

/// Hub tuning.
#[derive(Clone, Copy, Debug)]
pub struct HubConfig {
    /// Buffered events per topic before slow subscribers start skipping
    pub channel_capacity: usize,
    /// Offset of the service-local zone from UTC, for "today"
    pub utc_offset_minutes: i32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            utc_offset_minutes: 0,
        }
    }
}

#[derive(Clone)]
struct Published {
    sequence: u64,
    snapshot: Arc<ServiceSnapshot>,
}

type SnapshotKey = (ServiceId, NaiveDate);

struct HubInner {
    verifier: TokenVerifier,
    projector: QueueStateProjector,
    clock: Arc<dyn Clock>,
    config: HubConfig,
    services: DashMap<ServiceId, broadcast::Sender<Published>>,
    admin: broadcast::Sender<Published>,
    publish_locks: DashMap<SnapshotKey, Arc<Mutex<()>>>,
    sequence: AtomicU64,
}

/// Topic registry and publisher. Cheap to clone.
#[derive(Clone)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl RealtimeHub {
    /// Create a hub.
    #[must_use]
    pub fn new(
        verifier: TokenVerifier,
        projector: QueueStateProjector,
        clock: Arc<dyn Clock>,
        config: HubConfig,
    ) -> Self {
        let capacity = config.channel_capacity.max(1);
        let (admin, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(HubInner {
                verifier,
                projector,
                clock,
                config: HubConfig {
                    channel_capacity: capacity,
                    ..config
                },
                services: DashMap::new(),
                admin,
                publish_locks: DashMap::new(),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Service-local calendar date now.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        SlotCalendar::local_date(self.inner.clock.now(), self.inner.config.utc_offset_minutes)
    }

    /// Verifier used for connection tokens
    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.inner.verifier
    }

    /// Authenticate `token` and open a connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unauthorized`] when the token is missing or fails
    /// verification; nothing is registered in that case.
    pub fn connect(&self, token: Option<&str>) -> Result<Connection, HubError> {
        let principal = self.inner.verifier.verify(token.unwrap_or_default())?;
        Ok(self.join(principal))
    }

    /// Open a connection for an already verified principal.
    ///
    /// Administrators are subscribed to the admin topic straight away.
    #[must_use]
    pub fn join(&self, principal: Principal) -> Connection {
        let (tx, rx) = mpsc::channel(self.inner.config.channel_capacity);
        let admin_forwarder = principal.admin_scope.clone().map(|scope| {
            let receiver = self.inner.admin.subscribe();
            spawn_forwarder(receiver, tx.clone(), Topic::Admin, move |snapshot| {
                scope.permits(&snapshot.service_id)
            })
        });

        tracing::debug!(
            user_id = %principal.user_id,
            role = ?principal.role,
            admin = admin_forwarder.is_some(),
            "Realtime connection opened"
        );

        Connection {
            hub: self.clone(),
            principal,
            tx,
            rx,
            services: HashMap::new(),
            delivered: HashMap::new(),
            admin_forwarder,
        }
    }

    /// Recompute the snapshot of `service` on `date` and push it to the
    /// service topic, then the admin topic.
    pub async fn publish(&self, service: &ServiceDefinition, date: NaiveDate) {
        let key = (service.id.clone(), date);
        let lock = self.publish_lock(&key);
        {
            let _serialized = lock.lock().await;
            match self.inner.projector.snapshot(service, date).await {
                Ok(snapshot) => {
                    let published = Published {
                        sequence: self.next_sequence(),
                        snapshot: Arc::new(snapshot),
                    };
                    let sequence = published.sequence;
                    let service_receivers = self
                        .inner
                        .services
                        .get(&service.id)
                        .and_then(|topic| topic.send(published.clone()).ok())
                        .unwrap_or(0);
                    let admin_receivers = self.inner.admin.send(published).unwrap_or(0);
                    metrics::record_snapshot_published();
                    tracing::debug!(
                        service_id = %service.id,
                        %date,
                        sequence,
                        service_receivers,
                        admin_receivers,
                        "Published queue snapshot"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        service_id = %service.id,
                        %date,
                        %error,
                        "Failed to recompute queue snapshot, skipping broadcast"
                    );
                }
            }
        }
        drop(lock);
        self.inner
            .publish_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn publish_lock(&self, key: &SnapshotKey) -> Arc<Mutex<()>> {
        Arc::clone(self.inner.publish_locks.entry(key.clone()).or_default().value())
    }

    // Callers hold the publish lock of the key being computed.
    fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn service_topic(&self, service_id: &ServiceId) -> broadcast::Receiver<Published> {
        self.inner
            .services
            .entry(service_id.clone())
            .or_insert_with(|| broadcast::channel(self.inner.config.channel_capacity).0)
            .subscribe()
    }

    /// Number of live subscribers on a service topic
    #[must_use]
    pub fn subscriber_count(&self, service_id: &ServiceId) -> usize {
        self.inner
            .services
            .get(service_id)
            .map_or(0, |topic| topic.receiver_count())
    }

    fn release_topic(&self, service_id: &ServiceId) {
        self.inner
            .services
            .remove_if(service_id, |_, topic| topic.receiver_count() == 0);
    }
}

impl SnapshotPublisher for RealtimeHub {
    fn refresh<'a>(&'a self, service: &'a ServiceDefinition, date: NaiveDate) -> BoxFuture<'a, ()> {
        Box::pin(self.publish(service, date))
    }
}

impl std::fmt::Debug for RealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("services", &self.inner.services.len())
            .field("admin_subscribers", &self.inner.admin.receiver_count())
            .finish_non_exhaustive()
    }
}

fn spawn_forwarder<F>(
    mut receiver: broadcast::Receiver<Published>,
    tx: mpsc::Sender<HubEvent>,
    topic: Topic,
    accept: F,
) -> JoinHandle<()>
where
    F: Fn(&ServiceSnapshot) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(published) => {
                    if !accept(&published.snapshot) {
                        continue;
                    }
                    let event = HubEvent {
                        topic: topic.clone(),
                        sequence: published.sequence,
                        snapshot: published.snapshot,
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::record_lagged(skipped);
                    tracing::warn!(?topic, skipped, "Subscriber lagged, skipping to newest snapshots");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// An authenticated session on the hub.
///
/// Dropping the connection stops every forwarding task it owns.
pub struct Connection {
    hub: RealtimeHub,
    principal: Principal,
    tx: mpsc::Sender<HubEvent>,
    rx: mpsc::Receiver<HubEvent>,
    services: HashMap<ServiceId, JoinHandle<()>>,
    delivered: HashMap<SnapshotKey, u64>,
    admin_forwarder: Option<JoinHandle<()>>,
}

impl Connection {
    /// Verified identity behind this connection
    #[must_use]
    pub const fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Whether the connection receives the admin topic
    #[must_use]
    pub const fn is_admin_subscriber(&self) -> bool {
        self.admin_forwarder.is_some()
    }

    /// Join the topic of `service_id` and return its current snapshot for
    /// `date`, defaulting to today.
    ///
    /// Joining a topic already joined only returns the snapshot. Events for
    /// the same date computed before the returned snapshot are not delivered
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns the [`AdmissionError`] for an unknown service or when the
    /// snapshot cannot be computed; the topic is not joined in that case.
    pub async fn subscribe(
        &mut self,
        service_id: &ServiceId,
        date: Option<NaiveDate>,
    ) -> Result<ServiceSnapshot, AdmissionError> {
        let date = date.unwrap_or_else(|| self.hub.today());
        let key = (service_id.clone(), date);
        let lock = self.hub.publish_lock(&key);
        let outcome = {
            let _serialized = lock.lock().await;
            let receiver = (!self.services.contains_key(service_id))
                .then(|| self.hub.service_topic(service_id));
            match self.hub.inner.projector.snapshot_for(service_id, date).await {
                Ok(snapshot) => {
                    let sequence = self.hub.next_sequence();
                    self.mark_delivered(key.clone(), sequence);
                    if let Some(receiver) = receiver {
                        let forwarder = spawn_forwarder(
                            receiver,
                            self.tx.clone(),
                            Topic::Service(service_id.clone()),
                            |_| true,
                        );
                        self.services.insert(service_id.clone(), forwarder);
                    }
                    Ok(snapshot)
                }
                Err(error) => {
                    if receiver.is_some() {
                        drop(receiver);
                        self.hub.release_topic(service_id);
                    }
                    Err(error)
                }
            }
        };
        drop(lock);
        self.hub
            .inner
            .publish_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        if outcome.is_ok() {
            tracing::debug!(
                user_id = %self.principal.user_id,
                service_id = %service_id,
                %date,
                "Joined service topic"
            );
        }
        outcome
    }

    /// Leave the topic of `service_id`. Returns whether it was joined.
    pub fn unsubscribe(&mut self, service_id: &ServiceId) -> bool {
        let Some(forwarder) = self.services.remove(service_id) else {
            return false;
        };
        forwarder.abort();
        let hub = self.hub.clone();
        let service_id = service_id.clone();
        // The receiver is released once the aborted task is reaped.
        tokio::spawn(async move {
            let _ = forwarder.await;
            hub.release_topic(&service_id);
        });
        true
    }

    /// Services whose topics are joined
    pub fn subscriptions(&self) -> impl Iterator<Item = &ServiceId> {
        self.services.keys()
    }

    /// Next event from any joined topic.
    ///
    /// Snapshots older than, or equal to, one already delivered for the same
    /// service and date are skipped. Cancel-safe; suitable for use in
    /// `tokio::select!`.
    pub async fn recv(&mut self) -> Option<HubEvent> {
        loop {
            let event = self.rx.recv().await?;
            let key = (event.snapshot.service_id.clone(), event.snapshot.date);
            if self.mark_delivered(key, event.sequence) {
                return Some(event);
            }
            tracing::trace!(
                service_id = %event.snapshot.service_id,
                sequence = event.sequence,
                topic = ?event.topic,
                "Skipped stale or duplicate snapshot"
            );
        }
    }

    /// Record `sequence` as delivered for `key`; `false` when it is not newer.
    fn mark_delivered(&mut self, key: SnapshotKey, sequence: u64) -> bool {
        let newest = self.delivered.entry(key).or_default();
        if sequence <= *newest {
            return false;
        }
        *newest = sequence;
        true
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for (_, forwarder) in self.services.drain() {
            forwarder.abort();
        }
        if let Some(forwarder) = self.admin_forwarder.take() {
            forwarder.abort();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("user_id", &self.principal.user_id)
            .field("services", &self.services.len())
            .field("admin", &self.admin_forwarder.is_some())
            .finish_non_exhaustive()
    }
}
