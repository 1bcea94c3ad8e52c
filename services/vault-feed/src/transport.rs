//! Batched-read transport contract and subscription management
//!
//! A transport executes a whole descriptor list on every change
//! notification (new block) and hands one result list per tick to a
//! [`TickSink`]. The [`SubscriptionManager`] owns the single live
//! subscription: it re-subscribes only when the plan actually changed,
//! always cancelling the previous subscription first, and answers whether a
//! tick still belongs to the live subscription.
//!
//! Flow: plan → apply → subscribe → ticks → sink → [`TickQueue`] → engine.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::Notify;
use tracing::{debug, info};
use types::errors::TransportError;
use types::ids::SubscriptionId;
use types::query::{QueryDescriptor, RawResult};

use crate::metrics::FeedMetrics;
use crate::planner::QueryPlan;

/// One tick as delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TickEnvelope {
    /// Subscription that produced the tick.
    pub subscription: SubscriptionId,
    /// Block (change notification) that triggered the batch.
    pub block: u64,
    /// Results aligned 1:1 with the subscribed descriptors, or the failure.
    pub outcome: Result<Vec<RawResult>, TransportError>,
}

struct QueueShared {
    capacity: usize,
    buffer: Mutex<VecDeque<TickEnvelope>>,
    notify: Notify,
    metrics: Arc<FeedMetrics>,
}

impl QueueShared {
    fn buffer(&self) -> MutexGuard<'_, VecDeque<TickEnvelope>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded tick queue between transport sinks and the engine.
///
/// Newest wins: a push into a full queue evicts an older envelope instead of
/// being rejected. Envelopes from other subscriptions are evicted first, so
/// leftovers of a cancelled subscription never crowd out the live one.
#[derive(Clone)]
pub struct TickQueue {
    shared: Arc<QueueShared>,
}

impl TickQueue {
    pub fn new(capacity: usize, metrics: Arc<FeedMetrics>) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(QueueShared {
                capacity,
                buffer: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                metrics,
            }),
        }
    }

    /// Sink delivering into this queue on behalf of `subscription`.
    pub fn sink(&self, subscription: SubscriptionId) -> TickSink {
        TickSink {
            subscription,
            queue: Arc::downgrade(&self.shared),
        }
    }

    pub fn try_recv(&self) -> Option<TickEnvelope> {
        self.shared.buffer().pop_front()
    }

    /// Wait for the next envelope.
    ///
    /// Cancel safe: nothing is taken off the queue until the future resolves.
    pub async fn recv(&self) -> TickEnvelope {
        loop {
            if let Some(envelope) = self.try_recv() {
                return envelope;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Drop every queued envelope not produced by `live`. Returns how many
    /// were dropped.
    pub fn discard_stale(&self, live: Option<SubscriptionId>) -> usize {
        let mut buffer = self.shared.buffer();
        let before = buffer.len();
        buffer.retain(|envelope| Some(envelope.subscription) == live);
        let discarded = before - buffer.len();
        drop(buffer);

        for _ in 0..discarded {
            self.shared.metrics.record_tick_received();
            self.shared.metrics.record_stale();
        }
        discarded
    }

    pub fn len(&self) -> usize {
        self.shared.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue")
            .field("capacity", &self.shared.capacity)
            .field("len", &self.len())
            .finish()
    }
}

/// Delivery endpoint handed to a transport on subscribe.
///
/// Delivery never blocks the transport. The sink only holds a weak
/// reference, so it reports closed once the engine is gone.
#[derive(Clone)]
pub struct TickSink {
    subscription: SubscriptionId,
    queue: Weak<QueueShared>,
}

impl TickSink {
    pub fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Deliver one tick. Returns false only if the engine is gone.
    pub fn deliver(&self, block: u64, outcome: Result<Vec<RawResult>, TransportError>) -> bool {
        let Some(queue) = self.queue.upgrade() else {
            debug!(subscription_id = %self.subscription, block, "Tick queue closed");
            return false;
        };

        let envelope = TickEnvelope {
            subscription: self.subscription,
            block,
            outcome,
        };

        let evicted = {
            let mut buffer = queue.buffer();
            let evicted = if buffer.len() >= queue.capacity {
                let index = buffer
                    .iter()
                    .position(|queued| queued.subscription != self.subscription)
                    .unwrap_or(0);
                buffer.remove(index)
            } else {
                None
            };
            buffer.push_back(envelope);
            evicted
        };

        if let Some(evicted) = evicted {
            queue.metrics.record_tick_received();
            if evicted.subscription == self.subscription {
                queue.metrics.record_coalesced(1);
                debug!(
                    subscription_id = %self.subscription,
                    evicted_block = evicted.block,
                    block,
                    "Tick queue full, oldest tick superseded"
                );
            } else {
                queue.metrics.record_stale();
                debug!(
                    subscription_id = %evicted.subscription,
                    block = evicted.block,
                    "Tick queue full, evicted tick from cancelled subscription"
                );
            }
        }

        queue.notify.notify_one();
        true
    }

    /// Whether the engine side of the queue is gone.
    pub fn is_closed(&self) -> bool {
        self.queue.strong_count() == 0
    }
}

/// Cancels a transport subscription when dropped.
pub struct CancelHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl CancelHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Handle for a transport with nothing to tear down.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Executes a descriptor list on every change notification.
///
/// `subscribe` must return promptly; reads happen out of band. Every tick
/// handed to the sink must carry exactly one result per descriptor, in
/// descriptor order.
pub trait BatchTransport: Send + Sync {
    fn subscribe(
        &self,
        descriptors: &[QueryDescriptor],
        sink: TickSink,
    ) -> Result<CancelHandle, TransportError>;
}

impl<T: BatchTransport + ?Sized> BatchTransport for Arc<T> {
    fn subscribe(
        &self,
        descriptors: &[QueryDescriptor],
        sink: TickSink,
    ) -> Result<CancelHandle, TransportError> {
        (**self).subscribe(descriptors, sink)
    }
}

/// Result of applying a plan to the subscription manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Plan equal to the live one; nothing was touched.
    Unchanged,
    Resubscribed {
        previous: Option<SubscriptionId>,
        current: SubscriptionId,
    },
}

struct ActiveSubscription {
    id: SubscriptionId,
    plan: QueryPlan,
    handle: CancelHandle,
}

/// Owns the single live transport subscription.
pub struct SubscriptionManager<T> {
    transport: T,
    queue: TickQueue,
    active: Option<ActiveSubscription>,
}

impl<T: BatchTransport> SubscriptionManager<T> {
    pub fn new(transport: T, queue: TickQueue) -> Self {
        Self {
            transport,
            queue,
            active: None,
        }
    }

    /// Subscribe to `plan` unless it equals the live plan.
    ///
    /// The previous subscription is cancelled before the new one is issued,
    /// and its queued ticks are discarded. If subscribing fails no
    /// subscription is live afterwards, so applying the same plan again
    /// retries.
    pub fn apply(&mut self, plan: &QueryPlan) -> Result<ApplyOutcome, TransportError> {
        if !plan.differs_from(self.current_plan()) {
            if let Some(active) = self.active.as_mut() {
                active.plan = plan.clone();
            }
            return Ok(ApplyOutcome::Unchanged);
        }

        let previous = self.active.take().map(|active| {
            let id = active.id;
            active.handle.cancel();
            debug!(subscription_id = %id, "Cancelled subscription");
            id
        });

        let id = SubscriptionId::new();
        let handle = match self.transport.subscribe(plan.descriptors(), self.queue.sink(id)) {
            Ok(handle) => handle,
            Err(e) => {
                self.queue.discard_stale(None);
                return Err(e);
            }
        };
        let discarded = self.queue.discard_stale(Some(id));

        info!(
            subscription_id = %id,
            previous = ?previous.map(|p| p.to_string()),
            descriptors = plan.expected_results(),
            resources = plan.resource_count(),
            home = %plan.home(),
            discarded,
            "Subscribed to query plan"
        );

        self.active = Some(ActiveSubscription {
            id,
            plan: plan.clone(),
            handle,
        });

        Ok(ApplyOutcome::Resubscribed {
            previous,
            current: id,
        })
    }

    /// Whether ticks from `id` should still be processed.
    pub fn is_current(&self, id: SubscriptionId) -> bool {
        self.active.as_ref().map_or(false, |a| a.id == id)
    }

    pub fn current_id(&self) -> Option<SubscriptionId> {
        self.active.as_ref().map(|a| a.id)
    }

    pub fn current_plan(&self) -> Option<&QueryPlan> {
        self.active.as_ref().map(|a| &a.plan)
    }

    /// Cancel the live subscription, if any.
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            info!(subscription_id = %active.id, "Cancelling subscription");
            active.handle.cancel();
        }
    }
}
