//! Live fan-out of newly created detections.
//!
//! Delivery is best-effort to subscribers connected at publish time. There is
//! no replay: late joiners pull the record list instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::measure::Severity;
use crate::record::DetectionRecord;

/// Payload pushed to subscribers, derived 1:1 from a just-created record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionEvent {
    pub id: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub severity: Severity,
    pub area: f64,
    pub depth_meters: f64,
    pub confidence: f32,
    pub timestamp_ms: i64,
}

impl From<&DetectionRecord> for DetectionEvent {
    fn from(record: &DetectionRecord) -> Self {
        Self {
            id: record.id,
            latitude: record.latitude,
            longitude: record.longitude,
            severity: record.severity,
            area: record.area,
            depth_meters: record.depth_meters,
            confidence: record.confidence,
            timestamp_ms: record.timestamp_ms,
        }
    }
}

pub type SubscriberId = u64;

struct Subscribers {
    next_id: AtomicU64,
    senders: RwLock<HashMap<SubscriberId, SyncSender<DetectionEvent>>>,
}

impl Subscribers {
    fn remove(&self, id: SubscriberId) -> bool {
        match self.senders.write() {
            Ok(mut senders) => senders.remove(&id).is_some(),
            Err(poisoned) => poisoned.into_inner().remove(&id).is_some(),
        }
    }
}

/// Publish/subscribe hub for [`DetectionEvent`]s.
///
/// Each subscriber owns a bounded queue. Publishing never blocks: an event is
/// dropped for a subscriber whose queue is full or whose receiver is gone.
/// Only `subscribe`, `unsubscribe` and dropping a [`Subscription`] change
/// the subscriber set.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<Subscribers>,
    buffer: usize,
}

impl EventBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Subscribers {
                next_id: AtomicU64::new(1),
                senders: RwLock::new(HashMap::new()),
            }),
            buffer: buffer.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = sync_channel(self.buffer);
        match self.inner.senders.write() {
            Ok(mut senders) => {
                senders.insert(id, tx);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id, tx);
            }
        }
        log::debug!("subscriber {} connected", id);
        Subscription {
            id,
            receiver: rx,
            hub: Arc::clone(&self.inner),
        }
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.senders.read() {
            Ok(senders) => senders.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Fire-and-forget delivery; returns how many subscribers accepted the event.
    pub fn publish(&self, event: &DetectionEvent) -> usize {
        let senders = match self.inner.senders.read() {
            Ok(senders) => senders,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut delivered = 0;
        for (id, sender) in senders.iter() {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    log::warn!("subscriber {} is lagging; dropped event {}", id, event.id);
                }
                Err(TrySendError::Disconnected(_)) => {}
            }
        }
        delivered
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

/// Receiving end of one subscriber. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    receiver: Receiver<DetectionEvent>,
    hub: Arc<Subscribers>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn try_recv(&self) -> Option<DetectionEvent> {
        self.receiver.try_recv().ok()
    }

    /// `Ok(None)` on timeout, `Err` once unsubscribed and drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<DetectionEvent>, RecvTimeoutError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.hub.remove(self.id) {
            log::debug!("subscriber {} disconnected", self.id);
        }
    }
}
