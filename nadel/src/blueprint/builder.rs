use std::collections::HashMap;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use apollo_compiler::ast;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use serde_json_bytes::ByteString;

use super::hydration::HydrationArgument;
use super::hydration::HydrationCondition;
use super::hydration::HydrationInstruction;
use super::hydration::HydrationStrategy;
use super::hydration::Predicate;
use super::hydration::ValueSource;
use super::ExecutionBlueprint;
use super::FieldCoordinates;
use super::FieldInstruction;
use super::ServiceDefinition;
use super::ServiceSchema;
use crate::error::BlueprintError;
use crate::json_ext::Object;
use crate::json_ext::Value;
use crate::normalized::is_abstract;
use crate::normalized::possible_types;
use crate::normalized::OperationKind;

/// Definitions of the directives understood by the engine, prepended to the overall schema.
const DIRECTIVE_DEFINITIONS: &str = r#"
directive @renamed(from: String!) on FIELD_DEFINITION | OBJECT | INTERFACE | UNION | ENUM | INPUT_OBJECT | SCALAR
directive @hidden on FIELD_DEFINITION
directive @hydrated(
    service: String
    field: String!
    arguments: [NadelHydrationArgument!]! = []
    identifiedBy: String
    indexed: Boolean = false
    batchSize: Int
    when: NadelHydrationCondition
) repeatable on FIELD_DEFINITION
directive @idHydrated(idField: String!, identifiedBy: String) on FIELD_DEFINITION
directive @defaultHydration(field: String!, idArgument: String!, identifiedBy: String = "id", batchSize: Int) on OBJECT | INTERFACE
scalar NadelJSON
input NadelHydrationArgument { name: String!, value: NadelJSON! }
input NadelHydrationCondition { result: NadelHydrationResultCondition! }
input NadelHydrationResultCondition { sourceField: String!, predicate: NadelHydrationPredicate! }
input NadelHydrationPredicate { equals: NadelJSON, startsWith: String, matches: String }
"#;

const ROOT_TYPES: [&str; 3] = ["Query", "Mutation", "Subscription"];

pub(super) fn default_root_type_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Query => ROOT_TYPES[0],
        OperationKind::Mutation => ROOT_TYPES[1],
        OperationKind::Subscription => ROOT_TYPES[2],
    }
}

struct ParsedService {
    schema: ServiceSchema,
    overall: ast::Document,
    underlying: Valid<Schema>,
}

pub(super) fn build(
    services: Vec<ServiceSchema>,
    shared_types: Option<String>,
) -> Result<ExecutionBlueprint, BlueprintError> {
    let mut parsed = Vec::with_capacity(services.len());
    for service in services {
        let overall = ast::Document::parse(&service.overall_sdl, format!("{}.graphqls", service.name))
            .map_err(|invalid| BlueprintError::OverallSchemaParse {
                service: service.name.clone(),
                reason: invalid.errors.to_string(),
            })?;
        let underlying = Schema::parse_and_validate(
            &service.underlying_sdl,
            format!("{}.underlying.graphqls", service.name),
        )
        .map_err(|invalid| BlueprintError::UnderlyingSchemaParse {
            service: service.name.clone(),
            reason: invalid.errors.to_string(),
        })?;
        parsed.push(ParsedService {
            schema: service,
            overall,
            underlying,
        });
    }
    let shared = shared_types
        .map(|sdl| {
            ast::Document::parse(sdl, "shared.graphqls").map_err(|invalid| {
                BlueprintError::OverallSchemaParse {
                    service: "shared".to_string(),
                    reason: invalid.errors.to_string(),
                }
            })
        })
        .transpose()?;

    let schema = compose(shared.as_ref(), &parsed)?;

    let mut root_owners: HashMap<FieldCoordinates, String> = HashMap::new();
    let mut services = IndexMap::new();
    for service in parsed {
        let mut declared_types = Vec::new();
        let mut overall_to_underlying = HashMap::new();
        for definition in &service.overall.definitions {
            let Some((name, directives)) = type_definition(definition) else {
                continue;
            };
            declared_types.push(name.to_string());
            if let Some(from) = directives.get("renamed").and_then(|d| argument_str(d, "from")) {
                if !service.underlying.types.contains_key(from) {
                    return Err(BlueprintError::MissingUnderlyingType {
                        service: service.schema.name.clone(),
                        type_name: name.to_string(),
                        underlying_name: from.to_string(),
                    });
                }
                overall_to_underlying.insert(name.to_string(), from.to_string());
            }
            if ROOT_TYPES.contains(&name.as_str()) {
                for field in root_fields(definition) {
                    let coordinates = (name.to_string(), field.name.to_string());
                    if let Some(first) = root_owners.get(&coordinates) {
                        return Err(BlueprintError::DuplicateRootField {
                            type_name: coordinates.0,
                            field: coordinates.1,
                            first: first.clone(),
                            second: service.schema.name.clone(),
                        });
                    }
                    root_owners.insert(coordinates, service.schema.name.clone());
                }
            }
        }

        let underlying_to_overall = overall_to_underlying
            .iter()
            .map(|(overall, underlying)| (underlying.clone(), overall.clone()))
            .collect();
        let definition = ServiceDefinition {
            name: service.schema.name.clone(),
            underlying: service.underlying,
            overall_to_underlying,
            underlying_to_overall,
        };
        validate_underlying_fields(&schema, &definition, &declared_types)?;
        services.insert(service.schema.name, definition);
    }

    let compiler = InstructionCompiler {
        schema: &schema,
        services: &services,
        root_owners: &root_owners,
    };
    let (field_instructions, hidden_fields) = compiler.compile()?;

    // root fields must exist underlying, unless they are resolved by hydration
    for ((type_name, field_name), owner) in &root_owners {
        let Some(service) = services.get(owner) else {
            continue;
        };
        let instructions = field_instructions
            .get(&(type_name.clone(), field_name.clone()))
            .map(Vec::as_slice)
            .unwrap_or_default();
        if instructions
            .iter()
            .any(|instruction| matches!(instruction, FieldInstruction::Hydration(_)))
        {
            continue;
        }
        let underlying_field = instructions
            .iter()
            .find_map(|instruction| match instruction {
                FieldInstruction::Rename { underlying_name } => Some(underlying_name.as_str()),
                FieldInstruction::DeepRename { path } => path.first().map(String::as_str),
                _ => None,
            })
            .unwrap_or(field_name.as_str());
        let underlying_type = service.underlying_type_name(type_name);
        if service
            .underlying_schema()
            .type_field(underlying_type, underlying_field)
            .is_err()
        {
            return Err(BlueprintError::MissingUnderlyingField {
                service: owner.clone(),
                type_name: type_name.clone(),
                field: field_name.clone(),
                underlying_field: underlying_field.to_string(),
            });
        }
    }

    tracing::debug!(
        services = services.len(),
        root_fields = root_owners.len(),
        instructions = field_instructions.len(),
        "execution blueprint compiled"
    );

    Ok(ExecutionBlueprint {
        schema,
        services,
        root_owners,
        field_instructions,
        hidden_fields,
    })
}

/// Merges the directive prelude, the shared types and every service's overall definitions into one
/// schema. Root types declared by several services become extensions of the first declaration;
/// other repeated type definitions are expected to be identical and are kept once.
fn compose(shared: Option<&ast::Document>, services: &[ParsedService]) -> Result<Valid<Schema>, BlueprintError> {
    let prelude = ast::Document::parse(DIRECTIVE_DEFINITIONS, "nadel.graphqls")
        .map_err(|invalid| BlueprintError::OverallSchemaInvalid(invalid.errors.to_string()))?;

    let mut document = ast::Document::new();
    let mut seen: HashSet<String> = HashSet::new();
    let documents = std::iter::once(&prelude)
        .chain(shared)
        .chain(services.iter().map(|service| &service.overall));
    for source in documents {
        for definition in &source.definitions {
            let name = definition_name(definition);
            match (name, definition) {
                (Some(name), ast::Definition::ObjectTypeDefinition(object))
                    if seen.contains(name) && ROOT_TYPES.contains(&name) =>
                {
                    document
                        .definitions
                        .push(ast::Definition::ObjectTypeExtension(Node::new(
                            ast::ObjectTypeExtension {
                                name: object.name.clone(),
                                implements_interfaces: object.implements_interfaces.clone(),
                                directives: object.directives.clone(),
                                fields: object.fields.clone(),
                            },
                        )));
                }
                (Some(name), _) if seen.contains(name) => {
                    tracing::trace!(name, "skipping repeated type definition");
                }
                (Some(name), _) => {
                    seen.insert(name.to_string());
                    document.definitions.push(definition.clone());
                }
                (None, _) => document.definitions.push(definition.clone()),
            }
        }
    }

    document
        .to_schema_validate()
        .map_err(|invalid| BlueprintError::OverallSchemaInvalid(invalid.errors.to_string()))
}

fn definition_name(definition: &ast::Definition) -> Option<&str> {
    match definition {
        ast::Definition::DirectiveDefinition(d) => Some(d.name.as_str()),
        _ => type_definition(definition).map(|(name, _)| name.as_str()),
    }
}

fn type_definition(definition: &ast::Definition) -> Option<(&ast::Name, &ast::DirectiveList)> {
    match definition {
        ast::Definition::ObjectTypeDefinition(d) => Some((&d.name, &d.directives)),
        ast::Definition::InterfaceTypeDefinition(d) => Some((&d.name, &d.directives)),
        ast::Definition::UnionTypeDefinition(d) => Some((&d.name, &d.directives)),
        ast::Definition::EnumTypeDefinition(d) => Some((&d.name, &d.directives)),
        ast::Definition::InputObjectTypeDefinition(d) => Some((&d.name, &d.directives)),
        ast::Definition::ScalarTypeDefinition(d) => Some((&d.name, &d.directives)),
        _ => None,
    }
}

fn root_fields(definition: &ast::Definition) -> impl Iterator<Item = &Node<ast::FieldDefinition>> {
    let fields = match definition {
        ast::Definition::ObjectTypeDefinition(d) => d.fields.as_slice(),
        _ => &[],
    };
    fields.iter()
}

/// Every `@renamed` field of a type the service declares must exist in its underlying type.
fn validate_underlying_fields(
    schema: &Schema,
    service: &ServiceDefinition,
    declared_types: &[String],
) -> Result<(), BlueprintError> {
    for type_name in declared_types {
        let Some(ExtendedType::Object(object)) = schema.types.get(type_name.as_str()) else {
            continue;
        };
        let underlying_type = service.underlying_type_name(type_name);
        if !service.has_underlying_type(underlying_type) {
            continue;
        }
        for (field_name, field) in &object.fields {
            let Some(from) = field
                .directives
                .get("renamed")
                .and_then(|d| argument_str(d, "from"))
            else {
                continue;
            };
            let first = from.split('.').next().unwrap_or(from);
            if service
                .underlying_schema()
                .type_field(underlying_type, first)
                .is_err()
            {
                return Err(BlueprintError::MissingUnderlyingField {
                    service: service.name().to_string(),
                    type_name: type_name.clone(),
                    field: field_name.to_string(),
                    underlying_field: first.to_string(),
                });
            }
        }
    }
    Ok(())
}

struct InstructionCompiler<'a> {
    schema: &'a Valid<Schema>,
    services: &'a IndexMap<String, ServiceDefinition>,
    root_owners: &'a HashMap<FieldCoordinates, String>,
}

type CompiledInstructions = (
    HashMap<FieldCoordinates, Vec<FieldInstruction>>,
    HashSet<FieldCoordinates>,
);

impl InstructionCompiler<'_> {
    fn compile(&self) -> Result<CompiledInstructions, BlueprintError> {
        let mut instructions: HashMap<FieldCoordinates, Vec<FieldInstruction>> = HashMap::new();
        let mut hidden = HashSet::new();
        for (type_name, ty) in &self.schema.types {
            let ExtendedType::Object(object) = ty else {
                continue;
            };
            for (field_name, field) in &object.fields {
                let coordinates = (type_name.to_string(), field_name.to_string());
                let mut field_instructions = Vec::new();

                if let Some(from) = field
                    .directives
                    .get("renamed")
                    .and_then(|d| argument_str(d, "from"))
                {
                    if from.contains('.') {
                        field_instructions.push(FieldInstruction::DeepRename {
                            path: from.split('.').map(str::to_string).collect(),
                        });
                    } else {
                        field_instructions.push(FieldInstruction::Rename {
                            underlying_name: from.to_string(),
                        });
                    }
                }
                if field.directives.get("hidden").is_some() {
                    field_instructions.push(FieldInstruction::Hidden);
                    hidden.insert(coordinates.clone());
                }
                for directive in field.directives.get_all("hydrated") {
                    let hydration = self.hydrated(type_name, field, directive)?;
                    field_instructions.push(FieldInstruction::Hydration(Arc::new(hydration)));
                }
                if let Some(directive) = field.directives.get("idHydrated") {
                    for hydration in self.id_hydrated(type_name, field, directive)? {
                        field_instructions.push(FieldInstruction::Hydration(Arc::new(hydration)));
                    }
                }

                if !field_instructions.is_empty() {
                    instructions.insert(coordinates, field_instructions);
                }
            }
        }
        Ok((instructions, hidden))
    }

    fn invalid(
        &self,
        directive: &str,
        type_name: &str,
        field: &ast::FieldDefinition,
        reason: impl Into<String>,
    ) -> BlueprintError {
        BlueprintError::InvalidDirective {
            directive: directive.to_string(),
            type_name: type_name.to_string(),
            field: field.name.to_string(),
            reason: reason.into(),
        }
    }

    fn query_type(&self) -> String {
        self.schema
            .root_operation(ast::OperationType::Query)
            .map(|name| name.to_string())
            .unwrap_or_else(|| ROOT_TYPES[0].to_string())
    }

    /// Resolves the service of a backing field: explicit, or the owner of the root field.
    fn backing_service(
        &self,
        directive_name: &str,
        type_name: &str,
        field: &ast::FieldDefinition,
        explicit: Option<&str>,
        backing_field: &str,
    ) -> Result<String, BlueprintError> {
        let service = match explicit {
            Some(service) => service.to_string(),
            None => self
                .root_owners
                .get(&(self.query_type(), backing_field.to_string()))
                .cloned()
                .ok_or_else(|| {
                    self.invalid(
                        directive_name,
                        type_name,
                        field,
                        format!("no service declares the backing field '{backing_field}'"),
                    )
                })?,
        };
        if !self.services.contains_key(&service) {
            return Err(BlueprintError::UnknownHydrationService {
                type_name: type_name.to_string(),
                field: field.name.to_string(),
                service,
            });
        }
        Ok(service)
    }

    fn hydrated(
        &self,
        type_name: &str,
        field: &ast::FieldDefinition,
        directive: &ast::Directive,
    ) -> Result<HydrationInstruction, BlueprintError> {
        let backing_field = argument_str(directive, "field")
            .ok_or_else(|| self.invalid("hydrated", type_name, field, "missing `field`"))?;
        let service = self.backing_service(
            "hydrated",
            type_name,
            field,
            argument_str(directive, "service"),
            backing_field,
        )?;

        let mut arguments = Vec::new();
        if let Some(ast::Value::List(items)) = directive
            .specified_argument_by_name("arguments")
            .map(|value| &**value)
        {
            for item in items {
                let ast::Value::Object(entries) = &**item else {
                    continue;
                };
                let name = entries
                    .iter()
                    .find(|(key, _)| key.as_str() == "name")
                    .and_then(|(_, value)| value.as_str());
                let value = entries
                    .iter()
                    .find(|(key, _)| key.as_str() == "value")
                    .map(|(_, value)| ast_to_json(value));
                let (Some(name), Some(value)) = (name, value) else {
                    return Err(self.invalid(
                        "hydrated",
                        type_name,
                        field,
                        "arguments need a `name` and a `value`",
                    ));
                };
                let source = ValueSource::parse(value);
                if let ValueSource::Argument(argument) = &source {
                    if !field
                        .arguments
                        .iter()
                        .any(|a| a.name.as_str() == argument.as_str())
                    {
                        return Err(self.invalid(
                            "hydrated",
                            type_name,
                            field,
                            format!("`$argument.{argument}` does not name an argument of the field"),
                        ));
                    }
                }
                arguments.push(HydrationArgument {
                    name: name.to_string(),
                    source,
                });
            }
        }

        let backing = self.schema.type_field(&self.query_type(), backing_field).ok();
        let returns_list = backing.map_or(false, |definition| definition.ty.is_list());
        let indexed = argument_bool(directive, "indexed").unwrap_or(false);
        let batch_size = argument_int(directive, "batchSize")
            .and_then(|size| usize::try_from(size).ok())
            .and_then(NonZeroUsize::new);
        let strategy = if !returns_list {
            HydrationStrategy::Single
        } else if indexed {
            HydrationStrategy::IndexBased { batch_size }
        } else {
            let identified_by = argument_str(directive, "identifiedBy").ok_or_else(|| {
                self.invalid(
                    "hydrated",
                    type_name,
                    field,
                    "`identifiedBy` is required when the backing field returns a list",
                )
            })?;
            HydrationStrategy::Batched {
                batch_size,
                identified_by: identified_by.to_string(),
            }
        };
        let sources = || {
            arguments
                .iter()
                .filter(|argument| matches!(argument.source, ValueSource::Source(_)))
        };
        // a batch sends its ids through the list argument of the backing field
        let source_argument = if strategy.is_batched() {
            let takes_list = |argument: &&HydrationArgument| {
                backing
                    .and_then(|definition| definition.argument_by_name(&argument.name))
                    .map_or(false, |definition| definition.ty.is_list())
            };
            let argument = sources()
                .find(takes_list)
                .or_else(|| sources().next())
                .ok_or_else(|| {
                    self.invalid(
                        "hydrated",
                        type_name,
                        field,
                        "a batched hydration needs a `$source` argument",
                    )
                })?;
            Some(argument.name.clone())
        } else {
            sources().next().map(|argument| argument.name.clone())
        };

        let condition = match directive.specified_argument_by_name("when") {
            Some(when) => Some(self.condition(type_name, field, when)?),
            None => None,
        };

        let result_type = backing
            .map(|definition| definition.ty.inner_named_type().to_string())
            .filter(|ty| matches!(self.schema.types.get(ty.as_str()), Some(ExtendedType::Object(_))));

        Ok(HydrationInstruction {
            virtual_type: type_name.to_string(),
            virtual_field: field.name.to_string(),
            service,
            backing_field: backing_field.to_string(),
            arguments,
            strategy,
            source_argument,
            condition,
            result_type,
        })
    }

    fn condition(
        &self,
        type_name: &str,
        field: &ast::FieldDefinition,
        when: &ast::Value,
    ) -> Result<HydrationCondition, BlueprintError> {
        let invalid = |reason: &str| self.invalid("hydrated", type_name, field, reason);
        let result = object_field(when, "result").ok_or_else(|| invalid("`when` needs a `result`"))?;
        let source_field = object_field(result, "sourceField")
            .and_then(|value| value.as_str())
            .ok_or_else(|| invalid("`when.result` needs a `sourceField`"))?;
        let predicate = object_field(result, "predicate")
            .ok_or_else(|| invalid("`when.result` needs a `predicate`"))?;

        let predicate = if let Some(expected) = object_field(predicate, "equals") {
            Predicate::Equals(ast_to_json(expected))
        } else if let Some(prefix) = object_field(predicate, "startsWith").and_then(|v| v.as_str()) {
            Predicate::StartsWith(prefix.to_string())
        } else if let Some(pattern) = object_field(predicate, "matches").and_then(|v| v.as_str()) {
            Predicate::matches(pattern).map_err(|err| invalid(&err.to_string()))?
        } else {
            return Err(invalid("the predicate needs one of `equals`, `startsWith` or `matches`"));
        };

        Ok(HydrationCondition {
            source_field: source_field.split('.').map(str::to_string).collect(),
            predicate,
        })
    }

    /// `@idHydrated` resolves through the `@defaultHydration` of the field's type, or of each member
    /// of an abstract type.
    fn id_hydrated(
        &self,
        type_name: &str,
        field: &ast::FieldDefinition,
        directive: &ast::Directive,
    ) -> Result<Vec<HydrationInstruction>, BlueprintError> {
        let id_field = argument_str(directive, "idField")
            .ok_or_else(|| self.invalid("idHydrated", type_name, field, "missing `idField`"))?;
        let target = field.ty.inner_named_type().as_str();
        let targets: Vec<String> = if is_abstract(self.schema, target) {
            possible_types(self.schema, target).into_iter().collect()
        } else {
            vec![target.to_string()]
        };

        let mut instructions = Vec::new();
        for target in targets {
            let Some(default) = self
                .schema
                .types
                .get(target.as_str())
                .and_then(|ty| ty.directives().get("defaultHydration"))
            else {
                continue;
            };
            let backing_field = argument_str(default, "field").ok_or_else(|| {
                self.invalid("idHydrated", type_name, field, "`@defaultHydration` is missing `field`")
            })?;
            let id_argument = argument_str(default, "idArgument").ok_or_else(|| {
                self.invalid(
                    "idHydrated",
                    type_name,
                    field,
                    "`@defaultHydration` is missing `idArgument`",
                )
            })?;
            let service = self.backing_service("idHydrated", type_name, field, None, backing_field)?;
            let identified_by = argument_str(directive, "identifiedBy")
                .or_else(|| argument_str(default, "identifiedBy"))
                .unwrap_or("id");
            let batch_size = argument_int(default, "batchSize")
                .and_then(|size| usize::try_from(size).ok())
                .and_then(NonZeroUsize::new);
            let returns_list = self
                .schema
                .type_field(&self.query_type(), backing_field)
                .map_or(false, |definition| definition.ty.is_list());
            let strategy = if returns_list {
                HydrationStrategy::Batched {
                    batch_size,
                    identified_by: identified_by.to_string(),
                }
            } else {
                HydrationStrategy::Single
            };

            instructions.push(HydrationInstruction {
                virtual_type: type_name.to_string(),
                virtual_field: field.name.to_string(),
                service,
                backing_field: backing_field.to_string(),
                arguments: vec![HydrationArgument {
                    name: id_argument.to_string(),
                    source: ValueSource::Source(id_field.split('.').map(str::to_string).collect()),
                }],
                strategy,
                source_argument: Some(id_argument.to_string()),
                condition: None,
                result_type: Some(target),
            });
        }

        if instructions.is_empty() {
            return Err(self.invalid(
                "idHydrated",
                type_name,
                field,
                format!("type '{target}' has no `@defaultHydration`"),
            ));
        }
        Ok(instructions)
    }
}

fn argument_str<'a>(directive: &'a ast::Directive, name: &str) -> Option<&'a str> {
    directive.specified_argument_by_name(name)?.as_str()
}

fn argument_bool(directive: &ast::Directive, name: &str) -> Option<bool> {
    match &**directive.specified_argument_by_name(name)? {
        ast::Value::Boolean(b) => Some(*b),
        _ => None,
    }
}

fn argument_int(directive: &ast::Directive, name: &str) -> Option<i64> {
    match &**directive.specified_argument_by_name(name)? {
        ast::Value::Int(i) => i.as_str().parse().ok(),
        _ => None,
    }
}

fn object_field<'a>(value: &'a ast::Value, name: &str) -> Option<&'a ast::Value> {
    match value {
        ast::Value::Object(fields) => fields
            .iter()
            .find(|(key, _)| key.as_str() == name)
            .map(|(_, value)| &**value),
        _ => None,
    }
}

fn ast_to_json(value: &ast::Value) -> Value {
    match value {
        ast::Value::Null | ast::Value::Variable(_) => Value::Null,
        ast::Value::Enum(name) => Value::String(ByteString::from(name.as_str())),
        ast::Value::String(s) => Value::String(ByteString::from(s.as_str())),
        ast::Value::Float(f) => f
            .try_to_f64()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ast::Value::Int(i) => match i.as_str().parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => Value::Null,
        },
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::List(items) => Value::Array(items.iter().map(|item| ast_to_json(item)).collect()),
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (ByteString::from(name.as_str()), ast_to_json(value)))
                .collect::<Object>(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;
    use crate::blueprint::ExecutionBlueprint;

    const ISSUES: &str = r#"
        type Query {
            issueById(id: ID!): Issue
            issues: [Issue]
        }
        type Issue {
            id: ID!
            key: String @renamed(from: "issueKey")
            assigneeId: ID @hidden
            assignee: User @hydrated(
                field: "userById"
                arguments: [{name: "id", value: "$source.assigneeId"}]
            )
            watchers: [User] @hydrated(
                field: "usersByIds"
                identifiedBy: "id"
                batchSize: 2
                arguments: [{name: "ids", value: "$source.watcherIds"}]
            )
            watcherIds: [ID] @hidden
        }
    "#;

    const ISSUES_UNDERLYING: &str = r#"
        type Query { issueById(id: ID!): Issue issues: [Issue] }
        type Issue { id: ID! issueKey: String assigneeId: ID watcherIds: [ID] }
    "#;

    const IDENTITY: &str = r#"
        type Query {
            userById(id: ID!): User @hidden
            usersByIds(ids: [ID!]!): [User] @hidden
        }
        type User @renamed(from: "Account") {
            id: ID!
            name: String
        }
    "#;

    const IDENTITY_UNDERLYING: &str = r#"
        type Query { userById(id: ID!): Account usersByIds(ids: [ID!]!): [Account] }
        type Account { id: ID! name: String }
    "#;

    fn blueprint() -> Result<ExecutionBlueprint, BlueprintError> {
        ExecutionBlueprint::builder()
            .service(ServiceSchema::new("issues", ISSUES, ISSUES_UNDERLYING))
            .service(ServiceSchema::new("identity", IDENTITY, IDENTITY_UNDERLYING))
            .build()
    }

    #[test]
    fn test_root_owners_and_renames() {
        let blueprint = blueprint().unwrap();
        assert_eq!(blueprint.root_field_owner("Query", "issueById"), Some("issues"));
        assert_eq!(blueprint.root_field_owner("Query", "userById"), Some("identity"));
        assert!(matches!(
            blueprint.rename("Issue", "key"),
            Some(FieldInstruction::Rename { underlying_name }) if underlying_name == "issueKey"
        ));
        let identity = blueprint.service("identity").unwrap();
        assert_eq!(identity.underlying_type_name("User"), "Account");
        assert_eq!(identity.overall_type_name("Account"), "User");
        assert!(blueprint
            .hidden_fields()
            .contains(&("Query".to_string(), "userById".to_string())));
    }

    #[test]
    fn test_hydration_strategies() {
        let blueprint = blueprint().unwrap();
        let assignee = blueprint.hydrations("Issue", "assignee");
        assert_eq!(assignee.len(), 1);
        assert_eq!(assignee[0].service, "identity");
        assert_eq!(assignee[0].strategy, HydrationStrategy::Single);
        assert_eq!(
            assignee[0].arguments[0].source,
            ValueSource::Source(vec!["assigneeId".into()])
        );

        let watchers = blueprint.hydrations("Issue", "watchers");
        assert_eq!(
            watchers[0].strategy,
            HydrationStrategy::Batched {
                batch_size: NonZeroUsize::new(2),
                identified_by: "id".into()
            }
        );
        assert_eq!(watchers[0].result_type.as_deref(), Some("User"));
    }

    #[test]
    fn test_batch_ids_come_from_the_list_argument() {
        let blueprint = ExecutionBlueprint::builder()
            .service(ServiceSchema::new(
                "issues",
                r#"
                type Query { issues: [Issue] usersBySite(siteId: ID!, ids: [ID!]!): [User] }
                type User { id: ID! }
                type Issue {
                    siteId: ID
                    watcherIds: [ID]
                    watchers: [User] @hydrated(
                        field: "usersBySite"
                        identifiedBy: "id"
                        arguments: [
                            {name: "siteId", value: "$source.siteId"}
                            {name: "ids", value: "$source.watcherIds"}
                        ]
                    )
                }"#,
                r#"
                type Query { issues: [Issue] usersBySite(siteId: ID!, ids: [ID!]!): [User] }
                type User { id: ID! }
                type Issue { siteId: ID watcherIds: [ID] }"#,
            ))
            .build()
            .unwrap();
        let watchers = &blueprint.hydrations("Issue", "watchers")[0];
        assert_eq!(watchers.source_argument.as_deref(), Some("ids"));
        assert_eq!(
            watchers.batch_argument().map(|argument| &argument.source),
            Some(&ValueSource::Source(vec!["watcherIds".into()]))
        );

        let assignee = &blueprint().unwrap().hydrations("Issue", "assignee")[0];
        assert_eq!(assignee.source_argument.as_deref(), Some("id"));
    }

    #[test]
    fn test_duplicate_root_field() {
        let error = ExecutionBlueprint::builder()
            .service(ServiceSchema::new("a", "type Query { x: String }", "type Query { x: String }"))
            .service(ServiceSchema::new("b", "type Query { x: String }", "type Query { x: String }"))
            .build()
            .unwrap_err();
        assert_eq!(
            error.to_string(),
            "the root field 'Query.x' is declared by both 'a' and 'b'"
        );
    }

    #[test]
    fn test_missing_underlying_field() {
        let error = ExecutionBlueprint::builder()
            .service(ServiceSchema::new(
                "a",
                r#"type Query { x: Thing } type Thing { name: String @renamed(from: "title") }"#,
                "type Query { x: Thing } type Thing { name: String }",
            ))
            .build()
            .unwrap_err();
        assert!(matches!(error, BlueprintError::MissingUnderlyingField { .. }));
    }

    #[test]
    fn test_argument_must_exist() {
        let error = ExecutionBlueprint::builder()
            .service(ServiceSchema::new(
                "a",
                r#"
                type Query { x: Thing other(id: ID): Thing }
                type Thing {
                    id: ID
                    link: Thing @hydrated(field: "other", arguments: [{name: "id", value: "$argument.nope"}])
                }"#,
                "type Query { x: Thing other(id: ID): Thing } type Thing { id: ID }",
            ))
            .build()
            .unwrap_err();
        assert!(matches!(
            error,
            BlueprintError::InvalidDirective { directive, .. } if directive == "hydrated"
        ));
    }

    #[test]
    fn test_id_hydrated_on_union() {
        let blueprint = ExecutionBlueprint::builder()
            .service(ServiceSchema::new(
                "activity",
                r#"
                type Query { activity: [Activity] }
                type Activity { id: ID, objectId: ID, object: Object @idHydrated(idField: "objectId") }
                union Object = Issue | Comment
                type Issue @defaultHydration(field: "issuesByIds", idArgument: "ids") { id: ID }
                type Comment @defaultHydration(field: "commentById", idArgument: "id") { id: ID }
                "#,
                "type Query { activity: [Activity] } type Activity { id: ID, objectId: ID }",
            ))
            .service(ServiceSchema::new(
                "content",
                "type Query { issuesByIds(ids: [ID]): [Issue] commentById(id: ID): Comment }",
                r#"
                type Query { issuesByIds(ids: [ID]): [Issue] commentById(id: ID): Comment }
                type Issue { id: ID } type Comment { id: ID }
                "#,
            ))
            .build()
            .unwrap();

        let hydrations = blueprint.hydrations("Activity", "object");
        assert_eq!(hydrations.len(), 2);
        assert_eq!(hydrations[0].result_type.as_deref(), Some("Issue"));
        assert!(hydrations[0].strategy.is_batched());
        assert_eq!(hydrations[1].result_type.as_deref(), Some("Comment"));
        assert_eq!(hydrations[1].strategy, HydrationStrategy::Single);
    }

    #[test]
    fn test_when_condition() {
        let blueprint = ExecutionBlueprint::builder()
            .service(ServiceSchema::new(
                "a",
                r#"
                type Query { rows: [Row] user(id: ID): String }
                type Row {
                    kind: String
                    userId: ID
                    user: String @hydrated(
                        field: "user"
                        arguments: [{name: "id", value: "$source.userId"}]
                        when: {result: {sourceField: "kind", predicate: {equals: "APP_USER"}}}
                    )
                }"#,
                "type Query { rows: [Row] user(id: ID): String } type Row { kind: String userId: ID }",
            ))
            .build()
            .unwrap();
        let hydration = &blueprint.hydrations("Row", "user")[0];
        let condition = hydration.condition.as_ref().unwrap();
        assert_eq!(condition.source_field, vec!["kind".to_string()]);
        assert!(condition.predicate.evaluate(&json!("APP_USER")));
        assert_eq!(hydration.source_paths().len(), 2);
    }
}
