//! Two-level section identity registry.
//!
//! A section label may be started by some threads of a team and not by
//! others, so a single process-wide map cannot assign the ids each thread
//! iterates over. The engine therefore keeps two maps:
//!
//! - a **local registry** per measurement thread: label → dense id,
//!   append-only, scoped to that thread's records;
//! - a **shared registry** per process: label → shared id, visible to all
//!   threads and guarded by a mutex around insert-or-lookup.
//!
//! Ids are never reassigned once handed out, and the shared id for a label
//! may legitimately differ from a thread's local id for the same label.
//! Reconciliation during the merge protocol is always done by label
//! string, never by comparing ids across registries.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Classification of where a section was first registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionClass {
    /// First seen while only the master thread was executing
    Serial,
    /// First seen inside a parallel region, or owned by another thread
    ///
    /// When the inquiring thread has no local record of a label, some other
    /// thread must have created it, so the call site is assumed reachable
    /// from a parallel context. This is a heuristic, not a proof: a section
    /// only ever called serially by a non-master thread is misclassified
    /// as parallel.
    Parallel,
}

/// Per-thread label → id map with dense, append-only ids.
#[derive(Debug, Default)]
pub struct LocalRegistry {
    ids: HashMap<String, usize>,
    labels: Vec<String>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a label; `None` if this thread has never registered it.
    pub fn resolve(&self, label: &str) -> Option<usize> {
        self.ids.get(label).copied()
    }

    /// Insert a label if absent and return its id.
    ///
    /// Idempotent: a second registration of the same label returns the
    /// original id. The insertion position determines the id (0-based).
    pub fn register(&mut self, label: &str) -> usize {
        if let Some(&id) = self.ids.get(label) {
            return id;
        }
        let id = self.labels.len();
        self.ids.insert(label.to_string(), id);
        self.labels.push(label.to_string());
        id
    }

    /// The label registered under `id`.
    pub fn label(&self, id: usize) -> Option<&str> {
        self.labels.get(id).map(String::as_str)
    }

    /// Number of registered labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Process-wide label → shared-id map.
///
/// `register` may race from every thread of a team; the mutex scope is
/// exactly the insert-or-lookup, so one lucky first insert wins per unique
/// label and every racer receives the same id.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    inner: Mutex<SharedInner>,
}

#[derive(Debug, Default)]
struct SharedInner {
    ids: HashMap<String, usize>,
    labels: Vec<String>,
}

impl SharedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a label if absent and return its shared id.
    pub fn register(&self, label: &str) -> usize {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.ids.get(label) {
            return id;
        }
        let id = inner.labels.len();
        inner.ids.insert(label.to_string(), id);
        inner.labels.push(label.to_string());
        id
    }

    /// Look up a label without inserting.
    pub fn resolve(&self, label: &str) -> Option<usize> {
        self.inner.lock().ids.get(label).copied()
    }

    /// The label registered under a shared id.
    pub fn label(&self, shared_id: usize) -> Option<String> {
        self.inner.lock().labels.get(shared_id).cloned()
    }

    /// Snapshot of all labels in shared-id order.
    pub fn labels(&self) -> Vec<String> {
        self.inner.lock().labels.clone()
    }

    /// Number of shared sections.
    pub fn len(&self) -> usize {
        self.inner.lock().labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Labels present in the shared registry but absent from a local one.
///
/// The shared registry can grow faster than a lagging thread's local map
/// (thread 0 may simply execute fewer branches). Before aggregation, each
/// missing label must be synthesized locally with default properties so
/// iteration over "all known sections" is complete.
pub fn missing_labels(shared: &SharedRegistry, local: &LocalRegistry) -> Vec<String> {
    shared
        .labels()
        .into_iter()
        .filter(|label| local.resolve(label).is_none())
        .collect()
}
