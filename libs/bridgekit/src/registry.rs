//! The module registry: integer-id dispatch table, lifecycle fan-out, and
//! the builder that produces it.
//!
//! Ids are assigned once, at [`RegistryBuilder::build`], and stay stable for
//! the registry's lifetime: module id = position of the name's first
//! registration, method id = position in the module's method table as frozen
//! at build time. The registry itself is immutable after build and holds no
//! locks; concurrent dispatch is safe because nothing it owns ever changes.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use serde_json::Value;

use crate::contracts::BridgeModule;
use crate::descriptions::ModuleDescriptions;
use crate::instance_index::{InstanceIndex, TypedInstance};
use crate::owner::OwnerToken;

/// Errors surfaced by registry construction, dispatch, and lifecycle fan-out.
///
/// Structural violations (unknown ids, wrong owner token, absent capability)
/// are programming or protocol errors and are never retried here. Hook and
/// handler failures keep their cause reachable through `source()`.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A module claimed a name that is already taken and did not opt into
    /// overriding.
    #[error(
        "module name `{name}` is already registered; \
         return true from `can_override` on the replacement if this was intended"
    )]
    ModuleConflict { name: &'static str },

    /// Dispatch carried a module id outside the table.
    #[error("call to unknown module id {module_id} (registry has {module_count} modules)")]
    UnknownModule {
        module_id: usize,
        module_count: usize,
    },

    /// Dispatch carried a method id outside the module's frozen table.
    #[error("call to unknown method id {method_id} on module `{module}` ({method_count} methods)")]
    UnknownMethod {
        module: &'static str,
        method_id: usize,
        method_count: usize,
    },

    /// A lifecycle notification was presented a token other than the one the
    /// registry was built with.
    #[error("`{operation}` invoked off the owner context")]
    NotOwnerContext { operation: &'static str },

    /// Typed lookup for a capability that never registered.
    #[error("no module of type `{type_name}` is registered")]
    AbsentModule { type_name: &'static str },

    /// A module's initialize hook failed; remaining modules were not visited.
    #[error("module `{module}` failed to initialize")]
    Initialize {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A module's destroy hook failed; remaining modules were not visited.
    #[error("module `{module}` failed to shut down")]
    Destroy {
        module: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// A method handler failed during dispatch.
    #[error("method `{method}` on module `{module}` failed")]
    MethodCall {
        module: &'static str,
        method: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// A method frozen into a module's dispatch table. Its position in the table
/// is its method id.
pub struct MethodRegistration {
    name: &'static str,
    trace_label: String,
    handler: Arc<dyn crate::contracts::MethodHandler>,
}

impl MethodRegistration {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> crate::contracts::MethodKind {
        self.handler.kind()
    }
}

impl std::fmt::Debug for MethodRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRegistration")
            .field("name", &self.name)
            .field("trace_label", &self.trace_label)
            .field("kind", &self.kind())
            .finish()
    }
}

/// One module as frozen into the registry: its id, its instance, and its
/// method table.
pub struct ModuleDefinition {
    id: usize,
    name: &'static str,
    module: Arc<dyn BridgeModule>,
    methods: Vec<MethodRegistration>,
}

impl ModuleDefinition {
    fn new(id: usize, name: &'static str, module: Arc<dyn BridgeModule>) -> Self {
        // The one and only call to `methods()`; the table is fixed from here.
        let methods = module
            .methods()
            .into_iter()
            .map(|def| MethodRegistration {
                trace_label: format!("{name}.{}", def.name),
                name: def.name,
                handler: def.handler,
            })
            .collect();
        Self {
            id,
            name,
            module,
            methods,
        }
    }

    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn methods(&self) -> &[MethodRegistration] {
        &self.methods
    }

    pub(crate) fn module(&self) -> &Arc<dyn BridgeModule> {
        &self.module
    }

    fn call(&self, method_id: usize, args: &[Value]) -> Result<(), RegistryError> {
        let Some(method) = self.methods.get(method_id) else {
            return Err(RegistryError::UnknownMethod {
                module: self.name,
                method_id,
                method_count: self.methods.len(),
            });
        };
        let _scope = tracing::trace_span!("bridge_call", method = %method.trace_label).entered();
        method
            .handler
            .invoke(args)
            .map_err(|source| RegistryError::MethodCall {
                module: self.name,
                method: method.name,
                source,
            })
    }
}

impl std::fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("method_count", &self.methods.len())
            .finish_non_exhaustive()
    }
}

/// Emits a point marker when dropped, so the marker fires on every exit path
/// of the region it closes.
struct EndMarker(&'static str);

impl Drop for EndMarker {
    fn drop(&mut self) {
        tracing::info!(marker = self.0, "lifecycle marker");
    }
}

/// The capability set exposed to one remote runtime instance.
///
/// Immutable after [`RegistryBuilder::build`]; safe to share across any
/// number of dispatching threads. Lifecycle notifications are guarded by the
/// [`OwnerToken`] captured at build time.
pub struct ModuleRegistry {
    module_table: Vec<ModuleDefinition>,
    instances: InstanceIndex,
    batch_listeners: Vec<usize>,
    owner_id: u64,
}

impl ModuleRegistry {
    /// Dispatch a call addressed by `(module_id, method_id)`.
    ///
    /// The resolved handler runs inside a trace scope that closes on every
    /// exit path. Nothing is returned synchronously; completion channels are
    /// the handler's concern.
    ///
    /// # Errors
    /// [`RegistryError::UnknownModule`] / [`RegistryError::UnknownMethod`]
    /// when an id is out of range (no handler is invoked), and
    /// [`RegistryError::MethodCall`] wrapping a handler failure.
    pub fn call(
        &self,
        module_id: usize,
        method_id: usize,
        args: &[Value],
    ) -> Result<(), RegistryError> {
        let Some(definition) = self.module_table.get(module_id) else {
            return Err(RegistryError::UnknownModule {
                module_id,
                module_count: self.module_table.len(),
            });
        };
        definition.call(method_id, args)
    }

    /// Notify every module that the bridging session is up, in id order.
    ///
    /// Synchronous and fail-fast: a hook failure aborts the fan-out and the
    /// remaining modules are not visited. Start/end timing markers are
    /// emitted around the region; the end marker fires even on failure.
    ///
    /// # Errors
    /// [`RegistryError::NotOwnerContext`] for a foreign token, or
    /// [`RegistryError::Initialize`] carrying the failing module's error.
    pub fn notify_initialized(&self, owner: &OwnerToken) -> Result<(), RegistryError> {
        self.check_owner(owner, "notify_initialized")?;
        tracing::info!(marker = "modules_initialize_start", "lifecycle marker");
        let _end = EndMarker("modules_initialize_end");
        let _scope = tracing::info_span!("notify_initialized").entered();
        for definition in &self.module_table {
            definition
                .module
                .initialize()
                .map_err(|source| RegistryError::Initialize {
                    module: definition.name,
                    source,
                })?;
        }
        Ok(())
    }

    /// Notify every module that the bridging session is ending, in id order.
    ///
    /// Synchronous and fail-fast, like [`Self::notify_initialized`].
    ///
    /// # Errors
    /// [`RegistryError::NotOwnerContext`] for a foreign token, or
    /// [`RegistryError::Destroy`] carrying the failing module's error.
    pub fn notify_destroyed(&self, owner: &OwnerToken) -> Result<(), RegistryError> {
        self.check_owner(owner, "notify_destroyed")?;
        let _scope = tracing::info_span!("notify_destroyed").entered();
        for definition in &self.module_table {
            definition
                .module
                .destroy()
                .map_err(|source| RegistryError::Destroy {
                    module: definition.name,
                    source,
                })?;
        }
        Ok(())
    }

    /// Signal the end of one flushed unit of work to the modules that asked
    /// for it, in ascending id order. The listener subset was fixed at build
    /// time.
    pub fn on_batch_complete(&self) {
        for &id in &self.batch_listeners {
            if let Some(listener) = self.module_table[id].module.as_batch_listener() {
                listener.on_batch_complete();
            }
        }
    }

    /// Typed lookup of a module instance by its concrete type.
    ///
    /// The module set is a fixed startup invariant, so absence is a
    /// programming error rather than a runtime condition; callers probing
    /// optional capabilities use [`Self::try_get`].
    ///
    /// # Panics
    /// If no module of type `M` was registered.
    #[must_use]
    pub fn get<M: BridgeModule>(&self) -> Arc<M> {
        match self.try_get::<M>() {
            Ok(module) => module,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`Self::get`].
    ///
    /// # Errors
    /// [`RegistryError::AbsentModule`] if no module of type `M` was
    /// registered.
    pub fn try_get<M: BridgeModule>(&self) -> Result<Arc<M>, RegistryError> {
        self.instances
            .get::<M>()
            .ok_or(RegistryError::AbsentModule {
                type_name: std::any::type_name::<M>(),
            })
    }

    /// Read-only view of every module instance, in id order. Intended for
    /// diagnostics and shutdown fan-out.
    pub fn all_modules(&self) -> impl Iterator<Item = &Arc<dyn BridgeModule>> {
        self.module_table.iter().map(ModuleDefinition::module)
    }

    /// The frozen module table, index = id.
    #[must_use]
    pub fn modules(&self) -> &[ModuleDefinition] {
        &self.module_table
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.module_table.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.module_table.is_empty()
    }

    /// Serializable description of every module, ordered by ascending module
    /// id, for remote stub generation.
    #[must_use]
    pub fn descriptions(&self) -> ModuleDescriptions<'_> {
        ModuleDescriptions::new(&self.module_table)
    }

    /// Stream the schema document into `writer`.
    ///
    /// # Errors
    /// Propagates serialization / IO failures from `serde_json`.
    pub fn write_module_descriptions<W: io::Write>(
        &self,
        writer: W,
    ) -> Result<(), serde_json::Error> {
        let _scope = tracing::debug_span!("export_module_descriptions").entered();
        serde_json::to_writer(writer, &self.descriptions())
    }

    fn check_owner(
        &self,
        owner: &OwnerToken,
        operation: &'static str,
    ) -> Result<(), RegistryError> {
        if owner.id() == self.owner_id {
            Ok(())
        } else {
            Err(RegistryError::NotOwnerContext { operation })
        }
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&'static str> = self.module_table.iter().map(|d| d.name).collect();
        f.debug_struct("ModuleRegistry")
            .field("modules", &names)
            .field("batch_listeners", &self.batch_listeners)
            .field("instances", &self.instances)
            .finish_non_exhaustive()
    }
}

struct PendingModule {
    name: &'static str,
    module: Arc<dyn BridgeModule>,
    instance: TypedInstance,
}

/// Accumulates modules by name and produces an immutable [`ModuleRegistry`].
///
/// Module ids follow the order names were first registered; an override
/// replaces the instance under a name but keeps the name's position, so two
/// builders fed the same names in the same order assign identical ids.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: Vec<PendingModule>,
    by_name: HashMap<&'static str, usize>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under its declared name.
    ///
    /// Generic over the concrete type so the typed instance index can be
    /// built without reflection; pass `Arc<MyModule>`, not an erased
    /// `Arc<dyn BridgeModule>`.
    ///
    /// # Errors
    /// [`RegistryError::ModuleConflict`] when the name is taken and the new
    /// module does not permit overriding; the builder is left unchanged.
    pub fn add<M: BridgeModule>(&mut self, module: Arc<M>) -> Result<(), RegistryError> {
        let name = module.name();
        let pending = PendingModule {
            name,
            instance: TypedInstance::new(&module),
            module,
        };
        if let Some(&position) = self.by_name.get(name) {
            if !pending.module.can_override() {
                return Err(RegistryError::ModuleConflict { name });
            }
            // Replace in place: the name keeps its original id position.
            self.entries[position] = pending;
        } else {
            self.by_name.insert(name, self.entries.len());
            self.entries.push(pending);
        }
        Ok(())
    }

    /// Snapshot the accumulated module set into an immutable registry owned
    /// by the context holding `owner`.
    ///
    /// Consumes the builder: ids, method tables, the typed instance index,
    /// and the batch-listener subset are all fixed here.
    #[must_use]
    pub fn build(self, owner: &OwnerToken) -> ModuleRegistry {
        let mut instances = InstanceIndex::default();
        let mut module_table = Vec::with_capacity(self.entries.len());
        for (id, pending) in self.entries.into_iter().enumerate() {
            instances.insert(pending.instance);
            module_table.push(ModuleDefinition::new(id, pending.name, pending.module));
        }
        let batch_listeners = module_table
            .iter()
            .filter(|definition| definition.module.as_batch_listener().is_some())
            .map(ModuleDefinition::id)
            .collect();
        tracing::debug!(
            modules = module_table.len(),
            "module registry built"
        );
        ModuleRegistry {
            module_table,
            instances,
            batch_listeners,
            owner_id: owner.id(),
        }
    }
}
