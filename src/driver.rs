//! Driver-level adapter registry.
//!
//! Tracks every live adapter by instance id. Lookup hands out counted
//! references; removal from the registry precedes halt, so a looked-up
//! adapter is never mid-teardown.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adapter::TapAdapter;
use crate::config::AdapterConfig;
use crate::error::{TapError, TapResult};
use crate::rxpath::ReceiveSink;
use tracing::info;

#[derive(Default)]
pub struct TapDriver {
    adapters: RwLock<HashMap<String, Arc<TapAdapter>>>,
}

impl TapDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an adapter. Instance ids are unique; a duplicate
    /// is a configuration error, not a replacement.
    pub fn create_adapter(
        &self,
        config: AdapterConfig,
        sink: Arc<dyn ReceiveSink>,
    ) -> TapResult<Arc<TapAdapter>> {
        let adapter = TapAdapter::create(config, sink)?;
        let id = adapter.instance_id().to_string();

        let mut adapters = self.adapters.write();
        if adapters.contains_key(&id) {
            // Unregistered and unreferenced: drops through normal teardown.
            adapter.halt();
            return Err(TapError::InvalidParameter(format!(
                "duplicate adapter instance id {id}"
            )));
        }
        adapters.insert(id, Arc::clone(&adapter));
        Ok(adapter)
    }

    /// Find a live adapter by instance id.
    pub fn lookup(&self, instance_id: &str) -> Option<Arc<TapAdapter>> {
        self.adapters.read().get(instance_id).map(TapAdapter::acquire)
    }

    /// Remove an adapter from the registry and halt it. The adapter object
    /// survives until its last external reference drops.
    pub fn halt_adapter(&self, instance_id: &str) -> TapResult<()> {
        let adapter = self
            .adapters
            .write()
            .remove(instance_id)
            .ok_or(TapError::DeviceNotOpen)?;
        adapter.halt();
        Ok(())
    }

    /// Halt everything still registered. Called once at driver teardown.
    pub fn unload(&self) {
        let adapters: Vec<_> = self.adapters.write().drain().collect();
        info!(count = adapters.len(), "driver unloading");
        for (_, adapter) in adapters {
            adapter.halt();
        }
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    pub fn instance_ids(&self) -> Vec<String> {
        self.adapters.read().keys().cloned().collect()
    }
}
