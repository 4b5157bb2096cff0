//! The execution blueprint: everything the engine knows about the overall schema and how it maps
//! onto each service's underlying schema.
//!
//! Built once from the per-service schemas and their directives, read-only afterwards.

mod builder;
mod hydration;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;
use indexmap::IndexMap;

pub use self::hydration::HydrationArgument;
pub use self::hydration::HydrationCondition;
pub use self::hydration::HydrationInstruction;
pub use self::hydration::HydrationStrategy;
pub use self::hydration::Predicate;
pub use self::hydration::ValueSource;
use crate::error::BlueprintError;
use crate::normalized::OperationKind;

/// `(type name, field name)`.
pub type FieldCoordinates = (String, String);

/// The schemas of one service.
#[derive(Clone, Debug)]
pub struct ServiceSchema {
    pub name: String,
    /// The service's part of the overall schema, with directives.
    pub overall_sdl: String,
    /// The schema the service itself serves.
    pub underlying_sdl: String,
}

impl ServiceSchema {
    pub fn new(
        name: impl Into<String>,
        overall_sdl: impl Into<String>,
        underlying_sdl: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            overall_sdl: overall_sdl.into(),
            underlying_sdl: underlying_sdl.into(),
        }
    }
}

/// A directive-derived instruction attached to an overall field.
#[derive(Clone, Debug)]
pub enum FieldInstruction {
    /// `@renamed(from: "name")`
    Rename { underlying_name: String },
    /// `@renamed(from: "a.b.c")`: the value lives at a nested underlying path.
    DeepRename { path: Vec<String> },
    /// `@hydrated`, `@idHydrated`
    Hydration(Arc<HydrationInstruction>),
    /// `@hidden`: only reachable from hydration backing queries.
    Hidden,
}

/// A backend service as seen by the engine.
#[derive(Debug)]
pub struct ServiceDefinition {
    name: String,
    underlying: Valid<Schema>,
    overall_to_underlying: HashMap<String, String>,
    underlying_to_overall: HashMap<String, String>,
}

impl ServiceDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn underlying_schema(&self) -> &Valid<Schema> {
        &self.underlying
    }

    /// The underlying name of an overall type.
    pub fn underlying_type_name<'a>(&'a self, overall: &'a str) -> &'a str {
        self.overall_to_underlying
            .get(overall)
            .map(String::as_str)
            .unwrap_or(overall)
    }

    /// The overall name of an underlying type.
    pub fn overall_type_name<'a>(&'a self, underlying: &'a str) -> &'a str {
        self.underlying_to_overall
            .get(underlying)
            .map(String::as_str)
            .unwrap_or(underlying)
    }

    pub fn has_underlying_type(&self, underlying: &str) -> bool {
        self.underlying.types.contains_key(underlying)
    }

    pub fn type_renames(&self) -> &HashMap<String, String> {
        &self.overall_to_underlying
    }
}

/// The compiled mapping from the overall schema to the services.
#[derive(Debug)]
pub struct ExecutionBlueprint {
    schema: Valid<Schema>,
    services: IndexMap<String, ServiceDefinition>,
    root_owners: HashMap<FieldCoordinates, String>,
    field_instructions: HashMap<FieldCoordinates, Vec<FieldInstruction>>,
    hidden_fields: HashSet<FieldCoordinates>,
}

#[buildstructor::buildstructor]
impl ExecutionBlueprint {
    /// Compiles the blueprint.
    ///
    /// `shared_types` holds overall type definitions used by several services.
    #[builder(visibility = "pub")]
    fn new(
        services: Vec<ServiceSchema>,
        shared_types: Option<String>,
    ) -> Result<Self, BlueprintError> {
        builder::build(services, shared_types)
    }

    /// The overall schema.
    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.get(name)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceDefinition> {
        self.services.values()
    }

    /// The name of the overall root type for `kind`.
    pub fn root_type_name(&self, kind: OperationKind) -> String {
        self.schema
            .root_operation(kind.to_operation_type())
            .map(|name| name.to_string())
            .unwrap_or_else(|| builder::default_root_type_name(kind).to_string())
    }

    /// The service declaring the root field `type_name.field_name`.
    pub fn root_field_owner(&self, type_name: &str, field_name: &str) -> Option<&str> {
        self.root_owners
            .get(&(type_name.to_string(), field_name.to_string()))
            .map(String::as_str)
    }

    pub fn field_instructions(&self, type_name: &str, field_name: &str) -> &[FieldInstruction] {
        self.field_instructions
            .get(&(type_name.to_string(), field_name.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The `@renamed` instruction of a field, if any.
    pub fn rename(&self, type_name: &str, field_name: &str) -> Option<&FieldInstruction> {
        self.field_instructions(type_name, field_name)
            .iter()
            .find(|instruction| {
                matches!(
                    instruction,
                    FieldInstruction::Rename { .. } | FieldInstruction::DeepRename { .. }
                )
            })
    }

    pub fn hydrations(&self, type_name: &str, field_name: &str) -> Vec<Arc<HydrationInstruction>> {
        self.field_instructions(type_name, field_name)
            .iter()
            .filter_map(|instruction| match instruction {
                FieldInstruction::Hydration(hydration) => Some(hydration.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn hidden_fields(&self) -> &HashSet<FieldCoordinates> {
        &self.hidden_fields
    }
}
