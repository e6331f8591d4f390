//! Event bus: topic-keyed fire-and-forget fan-out.
//!
//! Publishing snapshots the topic's subscriber list, then runs every
//! subscriber concurrently and awaits them all. Each subscriber is isolated:
//! an error or panic is logged and counted but never reaches the publisher
//! or sibling subscribers. No ordering between subscribers is guaranteed.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use modhost_protocols::{EventEnvelope, EventHandler, EventPublisher};

use crate::fault::contain;
use crate::inflight::InflightTracker;

/// Handle returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

struct Subscription {
    id: SubscriptionId,
    owner: String,
    handler: Arc<dyn EventHandler>,
}

/// Delivery counts for one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

type SubscriberList = Arc<Vec<Arc<Subscription>>>;

#[derive(Default)]
pub struct EventBus {
    topics: DashMap<String, SubscriberList>,
    inflight: Option<Arc<InflightTracker>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count subscriber invocations per owning module.
    pub fn with_inflight(mut self, inflight: Arc<InflightTracker>) -> Self {
        self.inflight = Some(inflight);
        self
    }

    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        owner: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> SubscriptionId {
        let topic = topic.into();
        let subscription = Arc::new(Subscription {
            id: SubscriptionId::new(),
            owner: owner.into(),
            handler,
        });
        let id = subscription.id;

        debug!(topic = %topic, owner = %subscription.owner, %id, "Subscribed");

        let mut list = self.topics.entry(topic).or_default();
        let mut next: Vec<_> = list.iter().cloned().collect();
        next.push(subscription);
        *list = Arc::new(next);
        id
    }

    /// Remove one subscription. Drops the topic when it has no subscribers left.
    pub fn unsubscribe(&self, topic: &str, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.topics.remove_if_mut(topic, |_, list| {
            let next: Vec<_> = list.iter().filter(|s| s.id != id).cloned().collect();
            removed = next.len() != list.len();
            *list = Arc::new(next);
            list.is_empty()
        });
        removed
    }

    /// Remove every subscription owned by `owner`.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut removed = 0;
        self.topics.retain(|_, list| {
            if list.iter().any(|s| s.owner == owner) {
                let next: Vec<_> = list.iter().filter(|s| s.owner != owner).cloned().collect();
                removed += list.len() - next.len();
                *list = Arc::new(next);
            }
            !list.is_empty()
        });
        removed
    }

    /// Deliver `event` to every current subscriber and wait for all of them.
    ///
    /// Subscribers added while this runs do not receive this event.
    pub async fn publish(&self, event: EventEnvelope) -> PublishReport {
        let Some(subscribers) = self.topics.get(&event.topic).map(|l| Arc::clone(l.value()))
        else {
            return PublishReport::default();
        };

        let event = Arc::new(event);
        let deliveries = subscribers.iter().map(|subscription| {
            let event = Arc::clone(&event);
            let subscription = Arc::clone(subscription);
            let inflight = self.inflight.clone();
            async move {
                let _guard = inflight.as_ref().map(|t| t.enter(&subscription.owner));
                let outcome = contain(subscription.handler.handle(&event)).await;
                if let Err(e) = &outcome {
                    warn!(
                        topic = %event.topic,
                        subscriber = %subscription.owner,
                        id = %subscription.id,
                        error = %e,
                        "Event subscriber failed"
                    );
                }
                outcome.is_ok()
            }
        });

        let results = join_all(deliveries).await;
        let delivered = results.iter().filter(|ok| **ok).count();
        PublishReport {
            delivered,
            failed: results.len() - delivered,
        }
    }

    /// Publish on a background task without waiting.
    pub fn publish_detached(self: &Arc<Self>, event: EventEnvelope) {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            bus.publish(event).await;
        });
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|l| l.len()).unwrap_or(0)
    }

    /// Topics with at least one subscriber, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        topics.sort();
        topics
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: EventEnvelope) {
        EventBus::publish(self, event).await;
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
