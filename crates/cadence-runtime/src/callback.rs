//! Observation callbacks

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::trace;

use cadence_core::CadenceResult;
use cadence_state::{Collection, CollectionStore};

/// Handle returned by [`CallbackHub::register`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(pub u64);

/// Invoked with the full post-commit contents of a collection.
///
/// Runs on the tick thread with the engine locked; it must not call back
/// into the instance.
pub type Callback = Box<dyn FnMut(&Collection) + Send>;

/// Registered callbacks by collection
#[derive(Default)]
pub struct CallbackHub {
    next_id: u64,
    callbacks: BTreeMap<CallbackId, (String, Callback)>,
}

impl CallbackHub {
    pub fn new() -> Self {
        CallbackHub::default()
    }

    pub fn register(
        &mut self,
        store: &CollectionStore,
        collection: &str,
        callback: Callback,
    ) -> CadenceResult<CallbackId> {
        store.get(collection)?;
        let id = CallbackId(self.next_id);
        self.next_id += 1;
        self.callbacks
            .insert(id, (collection.to_string(), callback));
        Ok(id)
    }

    /// Returns whether the id was registered.
    pub fn unregister(&mut self, id: CallbackId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Fire callbacks of every changed collection, in registration order.
    pub fn fire(&mut self, store: &CollectionStore, changed: &BTreeSet<String>) -> usize {
        let mut fired = 0;
        for (id, (name, callback)) in self.callbacks.iter_mut() {
            if !changed.contains(name) {
                continue;
            }
            if let Ok(collection) = store.get(name) {
                trace!(callback = id.0, collection = %name, "firing callback");
                callback(collection);
                fired += 1;
            }
        }
        fired
    }
}

impl fmt::Debug for CallbackHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHub")
            .field("next_id", &self.next_id)
            .field("registered", &self.callbacks.len())
            .finish()
    }
}
