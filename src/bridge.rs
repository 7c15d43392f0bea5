//! Turns raw mutation batches into debounced re-evaluation triggers.
//!
//! Host re-renders arrive as bursts of dozens of records. The bridge drops
//! batches while the engine is busy, ignores changes the control caused
//! itself, and collapses everything else into one trailing-edge trigger.

use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::attachment::{AttachmentState, CONTAINER_CLASS, CONTROL_CLASS};
use crate::tree::{HostTree, MutationRecord, NodeId};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Single-slot timer: arming replaces any pending deadline.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Consumes the deadline if it has passed.
    pub fn take_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchVerdict {
    /// Arrived while downloading or evaluating.
    Discarded,
    /// Only self-inflicted or non-element changes.
    Ignored,
    /// Relevant; the debounce was (re-)armed.
    Armed,
}

#[derive(Debug)]
pub struct ChangeBridge {
    debounce: Debounce,
}

impl ChangeBridge {
    pub fn new(delay: Duration) -> Self {
        Self {
            debounce: Debounce::new(delay),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.debounce.deadline()
    }

    pub fn take_if_due(&mut self, now: Instant) -> bool {
        self.debounce.take_if_due(now)
    }

    pub fn observe<T: HostTree + ?Sized>(
        &mut self,
        tree: &T,
        batch: &[MutationRecord],
        state: &AttachmentState,
    ) -> BatchVerdict {
        if state.is_busy() {
            trace!(records = batch.len(), "Batch discarded while busy");
            return BatchVerdict::Discarded;
        }
        if !is_relevant_batch(tree, batch) {
            return BatchVerdict::Ignored;
        }
        self.debounce.arm();
        BatchVerdict::Armed
    }
}

/// A batch matters when some record outside the control's subtree adds or
/// removes an element other than the control.
pub fn is_relevant_batch<T: HostTree + ?Sized>(tree: &T, batch: &[MutationRecord]) -> bool {
    batch
        .iter()
        .filter(|record| !is_self_inflicted(tree, record.target))
        .any(|record| {
            record
                .added
                .iter()
                .chain(record.removed.iter())
                .any(|node| tree.is_element(*node) && !tree.has_class(*node, CONTROL_CLASS))
        })
}

/// Walks from `target` up to the root looking for either marker class.
fn is_self_inflicted<T: HostTree + ?Sized>(tree: &T, target: NodeId) -> bool {
    let mut current = Some(target);
    while let Some(node) = current {
        if tree.has_class(node, CONTROL_CLASS) || tree.has_class(node, CONTAINER_CLASS) {
            return true;
        }
        current = tree.parent(node);
    }
    false
}
