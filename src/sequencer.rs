//! Ordered, append-only step accumulation with id-level idempotence.
//!
//! Order is arrival order. A step whose id is already present replaces the
//! stored one at its original position, so the exposed sequence never holds
//! two entries with the same id.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::normalize::NormalizedStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New id, pushed at the end.
    Appended,
    /// Known id with different content, replaced in place.
    Replaced,
    /// Known id, identical step.
    Unchanged,
    /// No step was produced upstream.
    Skipped,
}

/// Immutable view of the sequence at the time `snapshot` was called.
#[derive(Debug, Clone, Default)]
pub struct StepSnapshot(Arc<Vec<NormalizedStep>>);

impl StepSnapshot {
    /// Step with the given id. Positional access goes through the slice.
    pub fn find(&self, id: &str) -> Option<&NormalizedStep> {
        self.0.iter().find(|s| s.id == id)
    }

    /// Steps that are new, or replaced in place, relative to `prev`.
    pub fn changed_since<'a>(&'a self, prev: &StepSnapshot) -> Vec<&'a NormalizedStep> {
        self.iter()
            .enumerate()
            .filter(|(idx, step)| prev.get(*idx).map_or(true, |old| old != *step))
            .map(|(_, step)| step)
            .collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.id.as_str()).collect()
    }
}

impl Deref for StepSnapshot {
    type Target = [NormalizedStep];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct StepSequencer {
    steps: Arc<Vec<NormalizedStep>>,
    index: HashMap<String, usize>,
}

impl StepSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, step: Option<NormalizedStep>) -> AppendOutcome {
        let Some(step) = step else {
            return AppendOutcome::Skipped;
        };
        if let Some(&pos) = self.index.get(&step.id) {
            if self.steps[pos] == step {
                return AppendOutcome::Unchanged;
            }
            // Copy-on-write: outstanding snapshots keep the old vector.
            Arc::make_mut(&mut self.steps)[pos] = step;
            return AppendOutcome::Replaced;
        }
        self.index.insert(step.id.clone(), self.steps.len());
        Arc::make_mut(&mut self.steps).push(step);
        AppendOutcome::Appended
    }

    pub fn snapshot(&self) -> StepSnapshot {
        StepSnapshot(Arc::clone(&self.steps))
    }

    pub fn clear(&mut self) {
        self.steps = Arc::new(Vec::new());
        self.index.clear();
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }
}
