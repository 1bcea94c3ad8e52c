//! Deferred materialization gate
//!
//! Two states. In `Idle` a changed candidate replaces the published set at
//! once. In `InteractionActive` the published set is frozen and the
//! candidate goes to a single pending slot (last write wins); ending the
//! interaction publishes that slot, if filled, in the same critical section
//! as the state change.
//!
//! Change detection runs inside the gate, against the pending candidate when
//! one exists, so a newer tick that reverts to the published values still
//! replaces an older pending candidate.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};
use types::record::{AggregatedRecord, PublishedSet};

use crate::detector;
use crate::metrics::FeedMetrics;
use crate::store::{PublishedStore, StoreReader};

/// What the gate did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// Equal to the latest accepted set; nothing happened.
    Unchanged,
    /// Published set replaced.
    Published { revision: u64 },
    /// Stored in the pending slot until the interaction ends.
    Deferred,
}

/// What ending an interaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// No interaction was active.
    NotActive,
    /// Interaction ended with nothing pending; store untouched.
    NothingPending,
    /// Pending candidate published.
    Flushed { revision: u64 },
}

#[derive(Debug)]
enum GateState {
    Idle,
    InteractionActive {
        pending: Option<Arc<Vec<AggregatedRecord>>>,
    },
}

/// Routes candidates to the store or to the pending slot.
pub struct MaterializationGate {
    state: GateState,
    store: PublishedStore,
}

impl MaterializationGate {
    pub fn new(store: PublishedStore) -> Self {
        Self {
            state: GateState::Idle,
            store,
        }
    }

    pub fn reader(&self) -> StoreReader {
        self.store.reader()
    }

    pub fn is_interaction_active(&self) -> bool {
        matches!(self.state, GateState::InteractionActive { .. })
    }

    pub fn has_pending(&self) -> bool {
        matches!(
            self.state,
            GateState::InteractionActive { pending: Some(_) }
        )
    }

    /// The latest accepted set: the pending candidate if any, else the store.
    fn baseline(&self) -> PublishedSet {
        let published = self.store.current_set();
        match &self.state {
            GateState::InteractionActive {
                pending: Some(records),
            } => PublishedSet {
                records: records.clone(),
                loading: false,
                revision: published.revision,
            },
            _ => published,
        }
    }

    /// Offer a decoded candidate; skipped entirely when unchanged.
    pub fn offer(&mut self, candidate: Vec<AggregatedRecord>) -> GateOutcome {
        if !detector::changed(&self.baseline(), &candidate) {
            return GateOutcome::Unchanged;
        }
        self.publish(Arc::new(candidate))
    }

    /// Route a candidate without change detection.
    pub fn publish(&mut self, candidate: Arc<Vec<AggregatedRecord>>) -> GateOutcome {
        match &mut self.state {
            GateState::Idle => {
                let revision = self.store.replace(candidate);
                debug!(revision, "Published record set");
                GateOutcome::Published { revision }
            }
            GateState::InteractionActive { pending } => {
                let overwrote = pending.replace(candidate).is_some();
                debug!(overwrote, "Deferred record set during interaction");
                GateOutcome::Deferred
            }
        }
    }

    /// Enter the interaction state. Returns false if already active.
    pub fn begin_interaction(&mut self) -> bool {
        if self.is_interaction_active() {
            return false;
        }
        self.state = GateState::InteractionActive { pending: None };
        info!("Interaction started, publication deferred");
        true
    }

    /// Leave the interaction state, flushing the pending candidate.
    pub fn end_interaction(&mut self) -> FlushOutcome {
        match std::mem::replace(&mut self.state, GateState::Idle) {
            GateState::Idle => FlushOutcome::NotActive,
            GateState::InteractionActive { pending: None } => {
                info!("Interaction ended, nothing pending");
                FlushOutcome::NothingPending
            }
            GateState::InteractionActive {
                pending: Some(records),
            } => {
                let revision = self.store.replace(records);
                info!(revision, "Interaction ended, flushed pending record set");
                FlushOutcome::Flushed { revision }
            }
        }
    }
}

/// The gate behind a mutex, shared by the tick path and the interaction
/// path. Every operation is one critical section.
#[derive(Clone)]
pub struct SharedGate {
    inner: Arc<Mutex<MaterializationGate>>,
}

impl SharedGate {
    pub fn new(gate: MaterializationGate) -> Self {
        Self {
            inner: Arc::new(Mutex::new(gate)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MaterializationGate> {
        // Every gate operation is a single state swap; a poisoned lock holds no partial update.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn offer(&self, candidate: Vec<AggregatedRecord>) -> GateOutcome {
        self.lock().offer(candidate)
    }

    pub fn begin_interaction(&self) -> bool {
        self.lock().begin_interaction()
    }

    pub fn end_interaction(&self) -> FlushOutcome {
        self.lock().end_interaction()
    }

    pub fn is_interaction_active(&self) -> bool {
        self.lock().is_interaction_active()
    }

    pub fn has_pending(&self) -> bool {
        self.lock().has_pending()
    }

    pub fn reader(&self) -> StoreReader {
        self.lock().reader()
    }
}

/// Consumer-facing entry points for exclusive interactions.
#[derive(Clone)]
pub struct InteractionHandle {
    gate: SharedGate,
    metrics: Option<Arc<FeedMetrics>>,
}

impl InteractionHandle {
    pub fn new(gate: SharedGate) -> Self {
        Self {
            gate,
            metrics: None,
        }
    }

    /// Count flushes in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<FeedMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Freeze the published set until [`end_interaction`](Self::end_interaction).
    pub fn begin_interaction(&self) -> bool {
        self.gate.begin_interaction()
    }

    pub fn end_interaction(&self) -> FlushOutcome {
        let outcome = self.gate.end_interaction();
        if let (FlushOutcome::Flushed { .. }, Some(metrics)) = (outcome, &self.metrics) {
            metrics.record_flush();
        }
        outcome
    }

    pub fn is_active(&self) -> bool {
        self.gate.is_interaction_active()
    }
}
