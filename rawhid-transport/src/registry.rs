//! Instance registry - bounded map from filter pair to device group

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::instance::Instance;
use crate::protocol::DEFAULT_REGISTRY_CAPACITY;
use crate::types::InstanceKey;

/// Fixed-capacity table of [`Instance`]s keyed by the literal `open` filter pair
///
/// Instances are never evicted; once `capacity` distinct keys exist, new keys
/// cannot be registered.
pub struct InstanceRegistry {
    instances: Mutex<HashMap<InstanceKey, Arc<Instance>>>,
    capacity: usize,
}

impl Default for InstanceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl InstanceRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            instances: Mutex::new(HashMap::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }

    /// Exact-match lookup
    pub fn lookup(&self, key: InstanceKey) -> Option<Arc<Instance>> {
        self.instances.lock().get(&key).cloned()
    }

    /// Create a fresh instance for `key`
    ///
    /// Returns `None` when the table is full. An existing entry for the same
    /// key is returned unchanged.
    pub fn register(&self, key: InstanceKey) -> Option<Arc<Instance>> {
        let mut instances = self.instances.lock();
        if let Some(existing) = instances.get(&key) {
            return Some(Arc::clone(existing));
        }
        if instances.len() >= self.capacity {
            warn!(
                "Instance registry full ({}), cannot register {:04X}:{:04X}",
                self.capacity, key.vendor_id, key.product_id
            );
            return None;
        }
        debug!(
            "Registering instance {:04X}:{:04X}",
            key.vendor_id, key.product_id
        );
        let instance = Arc::new(Instance::new(key));
        instances.insert(key, Arc::clone(&instance));
        Some(instance)
    }

    /// Lookup, else register
    pub fn lookup_or_register(&self, key: InstanceKey) -> Option<Arc<Instance>> {
        self.lookup(key).or_else(|| self.register(key))
    }

    /// Close every device of every instance and forget all keys
    pub fn clear(&self) {
        let drained: Vec<_> = self.instances.lock().drain().map(|(_, i)| i).collect();
        for instance in drained {
            instance.clear_devices();
        }
    }

    /// Keys currently registered (unordered)
    pub fn keys(&self) -> Vec<InstanceKey> {
        self.instances.lock().keys().copied().collect()
    }
}
