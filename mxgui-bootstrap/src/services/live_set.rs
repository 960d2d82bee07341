//! Live-set aggregation
//!
//! Probe tasks report reachable mixers to one [`LiveSetAggregator`] shared
//! behind an `Arc`. Membership is keyed by mixer name under a mutex, so a
//! name is admitted at most once however the probes interleave.
//!
//! Reads happen only after the completion barrier: the aggregator is
//! consumed into a [`LiveSnapshot`], which requires every task to have
//! dropped its handle first.

use mxgui_common::{Inventory, Mixer, ModelType};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::warn;

#[derive(Debug, Default)]
pub struct LiveSetAggregator {
    members: Mutex<HashMap<String, Mixer>>,
}

impl LiveSetAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn members(&self) -> MutexGuard<'_, HashMap<String, Mixer>> {
        // Single inserts never leave the map half-updated, so a poisoned
        // lock still guards consistent data.
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `mixer` as live
    ///
    /// Returns `true` only for the call that admitted the name; later calls
    /// for the same name are no-ops.
    pub fn record_live(&self, mixer: &Mixer) -> bool {
        let mut members = self.members();
        if members.contains_key(&mixer.name) {
            return false;
        }
        members.insert(mixer.name.clone(), mixer.clone());
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.members().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the live set in inventory order
    ///
    /// Names missing from `inventory` are dropped.
    pub fn into_snapshot(self, inventory: &Inventory) -> LiveSnapshot {
        let mut members = self
            .members
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        let mut mixers = Vec::with_capacity(members.len());
        for mixer in inventory {
            if let Some(recorded) = members.remove(&mixer.name) {
                mixers.push(recorded);
            }
        }

        for name in members.keys() {
            warn!("Ignoring live mixer {} that is not in the inventory", name);
        }

        LiveSnapshot { mixers }
    }
}

/// Final, read-only live set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveSnapshot {
    mixers: Vec<Mixer>,
}

impl LiveSnapshot {
    pub fn mixers(&self) -> &[Mixer] {
        &self.mixers
    }

    pub fn by_model(&self, model: ModelType) -> impl Iterator<Item = &Mixer> {
        self.mixers.iter().filter(move |m| m.model_type == model)
    }

    pub fn names(&self) -> Vec<String> {
        self.mixers.iter().map(|m| m.name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mixers.iter().any(|m| m.name == name)
    }

    pub fn len(&self) -> usize {
        self.mixers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mixers.is_empty()
    }
}
