//! Type-keyed index of module instances.
//!
//! Key = the concrete module type, value = the shared instance stored as
//! `Arc<M>` behind `dyn Any` (downcast on read). The index is populated while
//! the registry is built and read-only afterwards, so lookups take no lock.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::contracts::BridgeModule;

type Boxed = Box<dyn Any + Send + Sync>;

/// A module instance captured together with its concrete type, before the
/// type parameter is erased for the dispatch table.
pub(crate) struct TypedInstance {
    type_id: TypeId,
    instance: Boxed,
}

impl TypedInstance {
    pub(crate) fn new<M: BridgeModule>(module: &Arc<M>) -> Self {
        Self {
            type_id: TypeId::of::<M>(),
            instance: Box::new(Arc::clone(module)),
        }
    }
}

#[derive(Default)]
pub(crate) struct InstanceIndex {
    map: HashMap<TypeId, Boxed>,
}

impl InstanceIndex {
    /// Insert an instance under its concrete type. When two registered names
    /// share one concrete type, the later entry wins.
    pub(crate) fn insert(&mut self, typed: TypedInstance) {
        self.map.insert(typed.type_id, typed.instance);
    }

    /// Fetch the instance registered under the concrete type `M`.
    pub(crate) fn get<M: BridgeModule>(&self) -> Option<Arc<M>> {
        self.map
            .get(&TypeId::of::<M>())
            .and_then(|boxed| boxed.downcast_ref::<Arc<M>>())
            .cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.map.len()
    }
}

impl std::fmt::Debug for InstanceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceIndex")
            .field("instances_count", &self.len())
            .finish()
    }
}
