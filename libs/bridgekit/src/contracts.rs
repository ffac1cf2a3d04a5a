//! Contracts between the registry and the capability modules it hosts.
//!
//! A module exposes a name, an ordered set of callable methods, optional
//! constants for the exported schema, and lifecycle hooks. Everything the
//! remote runtime can observe about a module flows through these traits.

use std::sync::Arc;

use serde_json::Value;

/// How a method's completion is observed by the remote runtime.
///
/// The registry never interprets this; it is exported verbatim in the schema
/// so the remote side can generate a stub of the right shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Fire-and-forget: no result travels back through the bridge.
    Async,
    /// Completion is delivered through a promise handle carried in the
    /// argument payload.
    Promise,
    /// The transport blocks for a synchronous result.
    Sync,
}

impl MethodKind {
    /// Wire name used in the exported schema document.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Async => "async",
            Self::Promise => "promise",
            Self::Sync => "sync",
        }
    }
}

/// A callable endpoint a module exposes to the remote runtime.
///
/// Handlers are resolved to direct references when the registry is built;
/// dispatch performs no lookup beyond two bounds checks.
pub trait MethodHandler: Send + Sync + 'static {
    /// Completion shape advertised in the exported schema.
    fn kind(&self) -> MethodKind;

    /// Invoke the handler with the decoded argument sequence.
    ///
    /// Any asynchronous completion (callbacks, promises) is the handler's own
    /// responsibility via a side channel; nothing is returned synchronously.
    ///
    /// # Errors
    /// Handler failures are propagated to the dispatch caller unchanged; the
    /// registry adds module/method context but never suppresses the cause.
    fn invoke(&self, args: &[Value]) -> anyhow::Result<()>;
}

struct FnHandler<F> {
    kind: MethodKind,
    f: F,
}

impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn kind(&self) -> MethodKind {
        self.kind
    }

    fn invoke(&self, args: &[Value]) -> anyhow::Result<()> {
        (self.f)(args)
    }
}

/// A method as declared by its module: the name the remote runtime uses and
/// the handler behind it. The declaration's position in
/// [`BridgeModule::methods`] becomes the method id.
#[derive(Clone)]
pub struct MethodDef {
    pub name: &'static str,
    pub handler: Arc<dyn MethodHandler>,
}

impl MethodDef {
    #[must_use]
    pub fn new(name: &'static str, handler: Arc<dyn MethodHandler>) -> Self {
        Self { name, handler }
    }

    /// Declare a method backed by a plain closure.
    #[must_use]
    pub fn from_fn<F>(name: &'static str, kind: MethodKind, f: F) -> Self
    where
        F: Fn(&[Value]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(name, Arc::new(FnHandler { kind, f }))
    }
}

impl std::fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("kind", &self.handler.kind())
            .finish()
    }
}

/// A host-side capability provider reachable from the remote runtime.
///
/// Instances are supplied to the [`RegistryBuilder`](crate::RegistryBuilder)
/// as shared handles; the registry never owns them exclusively and their
/// internal state stays their own responsibility.
pub trait BridgeModule: Send + Sync + 'static {
    /// Name the remote runtime addresses this module by. Unique across the
    /// registry, enforced at registration time.
    fn name(&self) -> &'static str;

    /// Declared methods, in the order that fixes their ids for the lifetime
    /// of the registry. Called exactly once, while the registry is built;
    /// later changes to the module's own bookkeeping have no effect.
    fn methods(&self) -> Vec<MethodDef>;

    /// Constants exported alongside the method schema.
    fn constants(&self) -> serde_json::Map<String, Value> {
        serde_json::Map::new()
    }

    /// Whether this module may replace an already-registered module carrying
    /// the same name.
    fn can_override(&self) -> bool {
        false
    }

    /// Hook: the bridging session is up. Runs on the owner context before any
    /// dispatch is expected.
    ///
    /// # Errors
    /// A failure aborts the remainder of the initialization fan-out.
    fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Hook: the bridging session is ending.
    ///
    /// # Errors
    /// A failure aborts the remainder of the teardown fan-out.
    fn destroy(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Capability query for batch-boundary notifications. Modules that care
    /// return `Some(self)`.
    fn as_batch_listener(&self) -> Option<&dyn BatchListener> {
        None
    }
}

/// Modules that want a signal once per unit of work flushed across the
/// bridge.
pub trait BatchListener: Send + Sync {
    fn on_batch_complete(&self);
}
