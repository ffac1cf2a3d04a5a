//! Schema export: the document the remote runtime consumes to generate
//! local call stubs without further round trips.
//!
//! The outer object must follow ascending module id, so the document is a
//! hand-rolled `Serialize` over the frozen table rather than a
//! `serde_json::Map` (which would sort keys by name). Method entries follow
//! frozen-table order; `methodID` is each method's table position.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::contracts::MethodKind;
use crate::registry::{MethodRegistration, ModuleDefinition};

/// Serializable view over a registry's frozen module table.
///
/// Stable for the registry's lifetime: repeated serializations of the same
/// registry produce the same document.
pub struct ModuleDescriptions<'a> {
    table: &'a [ModuleDefinition],
}

impl<'a> ModuleDescriptions<'a> {
    pub(crate) fn new(table: &'a [ModuleDefinition]) -> Self {
        Self { table }
    }
}

impl Serialize for ModuleDescriptions<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut document = serializer.serialize_map(Some(self.table.len()))?;
        for definition in self.table {
            document.serialize_entry(definition.name(), &ModuleDescription { definition })?;
        }
        document.end()
    }
}

struct ModuleDescription<'a> {
    definition: &'a ModuleDefinition,
}

impl Serialize for ModuleDescription<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entry = serializer.serialize_map(Some(3))?;
        entry.serialize_entry("moduleID", &self.definition.id())?;
        entry.serialize_entry("methods", &MethodTable(self.definition.methods()))?;
        // Constants are the module's to shape; queried at export time.
        entry.serialize_entry("constants", &self.definition.module().constants())?;
        entry.end()
    }
}

struct MethodTable<'a>(&'a [MethodRegistration]);

impl Serialize for MethodTable<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut methods = serializer.serialize_map(Some(self.0.len()))?;
        for (method_id, method) in self.0.iter().enumerate() {
            methods.serialize_entry(
                method.name(),
                &MethodDescription {
                    method_id,
                    kind: method.kind(),
                },
            )?;
        }
        methods.end()
    }
}

struct MethodDescription {
    method_id: usize,
    kind: MethodKind,
}

impl Serialize for MethodDescription {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut method = serializer.serialize_map(Some(2))?;
        method.serialize_entry("methodID", &self.method_id)?;
        method.serialize_entry("type", self.kind.as_str())?;
        method.end()
    }
}
