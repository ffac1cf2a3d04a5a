//! Capability module registry for a managed-runtime bridge.
//!
//! The remote runtime addresses host capabilities by `(module id, method id)`
//! pairs. This crate owns the table that gives those integers meaning: a
//! [`RegistryBuilder`] accumulates [`BridgeModule`]s by name, and
//! [`RegistryBuilder::build`] freezes them into an immutable
//! [`ModuleRegistry`] that dispatches calls, exports the schema the remote
//! side generates stubs from, and fans lifecycle and batch-boundary signals
//! out to every module.
//!
//! The transport that carries call tuples, the argument-decoding format, and
//! the tracing backend are external collaborators; arguments arrive here as
//! already-decoded [`serde_json::Value`] sequences.
//!
//! ```
//! use std::sync::Arc;
//! use bridgekit::{BridgeModule, MethodDef, MethodKind, OwnerToken, RegistryBuilder};
//!
//! struct Ping;
//!
//! impl BridgeModule for Ping {
//!     fn name(&self) -> &'static str {
//!         "Ping"
//!     }
//!     fn methods(&self) -> Vec<MethodDef> {
//!         vec![MethodDef::from_fn("ping", MethodKind::Async, |_args| Ok(()))]
//!     }
//! }
//!
//! let owner = OwnerToken::new();
//! let mut builder = RegistryBuilder::new();
//! builder.add(Arc::new(Ping))?;
//! let registry = builder.build(&owner);
//!
//! registry.notify_initialized(&owner)?;
//! registry.call(0, 0, &[])?; // Ping.ping
//! registry.on_batch_complete();
//! registry.notify_destroyed(&owner)?;
//! # Ok::<(), bridgekit::RegistryError>(())
//! ```
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod contracts;
pub mod descriptions;
mod instance_index;
pub mod owner;
pub mod registry;

pub use contracts::{BatchListener, BridgeModule, MethodDef, MethodHandler, MethodKind};
pub use descriptions::ModuleDescriptions;
pub use owner::OwnerToken;
pub use registry::{
    MethodRegistration, ModuleDefinition, ModuleRegistry, RegistryBuilder, RegistryError,
};
