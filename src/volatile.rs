//! Volatile resource tracking.
//!
//! A volatile object owns native GPU state that dies with the context
//! and can be rebuilt from CPU-side information. The registry keeps
//! every live volatile in registration order so a context reset can
//! tear all of them down and bring them back deterministically.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A resource whose native state can be dropped and rebuilt.
pub trait Volatile: Send + Sync {
    /// Create the native state. Returns false on failure. Must be a
    /// no-op returning true when the state already exists.
    fn load_volatile(&self) -> bool;

    /// Destroy the native state. Must be safe to call when the state
    /// is already gone.
    fn unload_volatile(&self);

    /// Label for diagnostics.
    fn volatile_label(&self) -> String {
        String::new()
    }
}

/// Insertion-ordered set of live volatile objects.
#[derive(Default)]
pub struct VolatileRegistry {
    entries: Mutex<Vec<Weak<dyn Volatile>>>,
}

impl VolatileRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an object. Dropping every `Arc` to it removes it from the
    /// registry automatically.
    pub fn register(&self, object: Weak<dyn Volatile>) {
        self.entries.lock().push(object);
    }

    /// Number of live tracked objects.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Whether no live objects are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose objects have been destroyed.
    pub fn prune(&self) {
        self.entries.lock().retain(|weak| weak.strong_count() > 0);
    }

    /// Unload every live object, in registration order.
    pub fn unload_all(&self) {
        let entries = self.collect_live();
        for object in &entries {
            object.unload_volatile();
        }
    }

    /// Load every live object, in registration order. Keeps going past
    /// failures and returns false if any load failed.
    pub fn load_all(&self) -> bool {
        let entries = self.collect_live();
        let mut all_loaded = true;
        for object in &entries {
            if !object.load_volatile() {
                log::warn!(
                    "Failed to restore volatile resource {:?}",
                    object.volatile_label()
                );
                all_loaded = false;
            }
        }
        all_loaded
    }

    /// Snapshot live objects in order, pruning dead entries.
    fn collect_live(&self) -> Vec<Arc<dyn Volatile>> {
        let mut entries = self.entries.lock();
        entries.retain(|weak| weak.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }
}
