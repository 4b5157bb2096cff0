use std::collections::HashSet;

use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::executable::DirectiveList;
use apollo_compiler::executable::Selection;
use apollo_compiler::executable::SelectionSet;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::validation::Valid;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use indexmap::IndexSet;
use serde::Serialize;

use super::FieldId;
use super::FieldTree;
use super::NormalizedField;
use super::NormalizedValue;
use super::TYPENAME;
use crate::error::NormalizationError;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// The kind of a GraphQL operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl OperationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        }
    }

    pub(crate) fn to_operation_type(self) -> OperationType {
        match self {
            OperationKind::Query => OperationType::Query,
            OperationKind::Mutation => OperationType::Mutation,
            OperationKind::Subscription => OperationType::Subscription,
        }
    }
}

impl From<OperationType> for OperationKind {
    fn from(operation_type: OperationType) -> Self {
        match operation_type {
            OperationType::Query => OperationKind::Query,
            OperationType::Mutation => OperationKind::Mutation,
            OperationType::Subscription => OperationKind::Subscription,
        }
    }
}

/// A client operation turned into a [`FieldTree`].
#[derive(Clone, Debug)]
pub struct NormalizedOperation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub tree: FieldTree,
}

/// Builds [`FieldTree`]s from client operations written against the overall schema.
pub(crate) struct Normalizer<'a> {
    schema: &'a Valid<Schema>,
    hidden_fields: &'a HashSet<(String, String)>,
}

struct Collected<'doc> {
    field_name: String,
    alias: Option<String>,
    arguments: IndexMap<String, NormalizedValue>,
    object_types: IndexSet<String>,
    selection_sets: Vec<&'doc SelectionSet>,
}

impl Collected<'_> {
    fn result_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.field_name)
    }
}

impl<'a> Normalizer<'a> {
    pub(crate) fn new(
        schema: &'a Valid<Schema>,
        hidden_fields: &'a HashSet<(String, String)>,
    ) -> Self {
        Self {
            schema,
            hidden_fields,
        }
    }

    /// Parses, validates and normalizes one operation of `query`.
    pub(crate) fn normalize(
        &self,
        query: &str,
        operation_name: Option<&str>,
        variables: &Object,
    ) -> Result<NormalizedOperation, NormalizationError> {
        let document = self.parse(query)?;
        self.normalize_document(&document, operation_name, variables)
    }

    pub(crate) fn parse(&self, query: &str) -> Result<Valid<ExecutableDocument>, NormalizationError> {
        if query.trim().is_empty() {
            return Err(NormalizationError::MissingQuery);
        }
        let mut parser = apollo_compiler::parser::Parser::new();
        let document = parser
            .parse_ast(query, "query.graphql")
            .map_err(|invalid| NormalizationError::ParsingError(invalid.errors.to_string()))?;
        let recursion_limit = parser.recursion_reached();
        tracing::trace!(?recursion_limit, "recursion limit data");

        document
            .to_executable_validate(self.schema)
            .map_err(|invalid| NormalizationError::ValidationError(invalid.errors.to_string()))
    }

    pub(crate) fn normalize_document(
        &self,
        document: &Valid<ExecutableDocument>,
        operation_name: Option<&str>,
        variables: &Object,
    ) -> Result<NormalizedOperation, NormalizationError> {
        let operation = document.operations.get(operation_name).map_err(|_| {
            NormalizationError::UnknownOperation(operation_name.unwrap_or_default().to_string())
        })?;
        let kind = OperationKind::from(operation.operation_type);
        if kind == OperationKind::Subscription {
            return Err(NormalizationError::SubscriptionNotSupported);
        }

        let variables = self.coerce_variables(&operation.variables, variables)?;
        let context = DocumentContext {
            document,
            variables: &variables,
        };

        let root_type = operation.selection_set.ty.to_string();
        let mut collected = Vec::new();
        self.collect(
            &context,
            &operation.selection_set,
            &IndexSet::from([root_type]),
            &mut collected,
        )?;

        let mut tree = FieldTree::new();
        self.build(&context, &mut tree, None, collected)?;

        Ok(NormalizedOperation {
            kind,
            name: operation.name.as_ref().map(|name| name.to_string()),
            tree,
        })
    }

    fn coerce_variables(
        &self,
        definitions: &[Node<ast::VariableDefinition>],
        provided: &Object,
    ) -> Result<IndexMap<String, NormalizedValue>, NormalizationError> {
        let mut variables = IndexMap::new();
        for definition in definitions {
            let name = definition.name.as_str();
            match provided.get(name) {
                Some(value) => {
                    if value.is_null() && definition.ty.is_non_null() {
                        return Err(NormalizationError::InvalidVariable {
                            name: name.to_string(),
                            reason: "null value for a non-null variable".to_string(),
                        });
                    }
                    variables.insert(name.to_string(), self.coerce_json(value, &definition.ty));
                }
                None => match &definition.default_value {
                    Some(default) => {
                        let value = resolve_literal(default, &IndexMap::new());
                        variables.insert(name.to_string(), self.coerce_value(value, &definition.ty));
                    }
                    None if definition.ty.is_non_null() => {
                        return Err(NormalizationError::InvalidVariable {
                            name: name.to_string(),
                            reason: "missing value for a non-null variable".to_string(),
                        });
                    }
                    None => {}
                },
            }
        }
        Ok(variables)
    }

    fn coerce_json(&self, value: &Value, ty: &ast::Type) -> NormalizedValue {
        self.coerce_value(NormalizedValue::from_json(value), ty)
    }

    /// Applies input type information that JSON cannot carry (enums).
    fn coerce_value(&self, value: NormalizedValue, ty: &ast::Type) -> NormalizedValue {
        match (value, ty) {
            (NormalizedValue::List(items), ast::Type::List(item) | ast::Type::NonNullList(item)) => {
                NormalizedValue::List(
                    items
                        .into_iter()
                        .map(|value| self.coerce_value(value, item))
                        .collect(),
                )
            }
            (value, _) => match self.schema.types.get(ty.inner_named_type()) {
                Some(ExtendedType::Enum(_)) => value.into_enum(),
                Some(ExtendedType::InputObject(input)) => match value {
                    NormalizedValue::Object(fields) => NormalizedValue::Object(
                        fields
                            .into_iter()
                            .map(|(name, value)| {
                                let value = match input.fields.get(name.as_str()) {
                                    Some(field) => self.coerce_value(value, &field.ty),
                                    None => value,
                                };
                                (name, value)
                            })
                            .collect(),
                    ),
                    other => other,
                },
                _ => value,
            },
        }
    }

    fn collect<'doc>(
        &self,
        context: &DocumentContext<'doc>,
        selection_set: &'doc SelectionSet,
        object_types: &IndexSet<String>,
        collected: &mut Vec<Collected<'doc>>,
    ) -> Result<(), NormalizationError> {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    if !context.is_included(&field.directives) {
                        continue;
                    }
                    let field_name = field.name.to_string();
                    let types: IndexSet<String> = if field_name == TYPENAME {
                        object_types.clone()
                    } else {
                        object_types
                            .iter()
                            .filter(|ty| self.schema.type_field(ty.as_str(), &field_name).is_ok())
                            .cloned()
                            .collect()
                    };
                    if types.is_empty() {
                        continue;
                    }
                    if let Some(ty) = types
                        .iter()
                        .find(|ty| self.hidden_fields.contains(&((*ty).clone(), field_name.clone())))
                    {
                        return Err(NormalizationError::HiddenField {
                            type_name: ty.clone(),
                            field: field_name,
                        });
                    }

                    let arguments: IndexMap<String, NormalizedValue> = field
                        .arguments
                        .iter()
                        .map(|argument| {
                            let value = resolve_literal(&argument.value, context.variables);
                            let value = match field.definition.argument_by_name(&argument.name) {
                                Some(definition) => self.coerce_value(value, &definition.ty),
                                None => value,
                            };
                            (argument.name.to_string(), value)
                        })
                        .collect();
                    let alias = field.alias.as_ref().map(|alias| alias.to_string());

                    let existing = collected.iter_mut().find(|existing| {
                        existing.result_key() == alias.as_deref().unwrap_or(&field_name)
                            && existing.field_name == field_name
                            && existing.arguments == arguments
                    });
                    match existing {
                        Some(existing) => {
                            existing.object_types.extend(types);
                            existing.selection_sets.push(&field.selection_set);
                        }
                        None => collected.push(Collected {
                            field_name,
                            alias,
                            arguments,
                            object_types: types,
                            selection_sets: vec![&field.selection_set],
                        }),
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if !context.is_included(&fragment.directives) {
                        continue;
                    }
                    let types = match &fragment.type_condition {
                        Some(condition) => self.narrow(object_types, condition.as_str()),
                        None => object_types.clone(),
                    };
                    self.collect(context, &fragment.selection_set, &types, collected)?;
                }
                Selection::FragmentSpread(spread) => {
                    if !context.is_included(&spread.directives) {
                        continue;
                    }
                    let Some(fragment) = context.document.fragments.get(&spread.fragment_name) else {
                        continue;
                    };
                    let types = self.narrow(object_types, fragment.type_condition().as_str());
                    self.collect(context, &fragment.selection_set, &types, collected)?;
                }
            }
        }
        Ok(())
    }

    fn narrow(&self, object_types: &IndexSet<String>, condition: &str) -> IndexSet<String> {
        let possible = possible_types(self.schema, condition);
        object_types
            .iter()
            .filter(|ty| possible.contains(*ty))
            .cloned()
            .collect()
    }

    fn build(
        &self,
        context: &DocumentContext<'_>,
        tree: &mut FieldTree,
        parent: Option<FieldId>,
        collected: Vec<Collected<'_>>,
    ) -> Result<(), NormalizationError> {
        for field in collected {
            let has_selections = field.selection_sets.iter().any(|set| !set.selections.is_empty());
            let child_types: IndexSet<String> = if has_selections {
                field
                    .object_types
                    .iter()
                    .filter_map(|ty| self.schema.type_field(ty.as_str(), &field.field_name).ok())
                    .flat_map(|definition| {
                        possible_types(self.schema, definition.ty.inner_named_type().as_str())
                    })
                    .collect()
            } else {
                IndexSet::new()
            };

            let id = tree.push(
                parent,
                NormalizedField {
                    object_type_names: field.object_types.into_iter().collect(),
                    field_name: field.field_name,
                    alias: field.alias,
                    arguments: field.arguments,
                    children: Vec::new(),
                    parent,
                },
            );

            if has_selections {
                let mut children = Vec::new();
                for selection_set in field.selection_sets {
                    self.collect(context, selection_set, &child_types, &mut children)?;
                }
                self.build(context, tree, Some(id), children)?;
            }
        }
        Ok(())
    }
}

struct DocumentContext<'doc> {
    document: &'doc Valid<ExecutableDocument>,
    variables: &'doc IndexMap<String, NormalizedValue>,
}

impl DocumentContext<'_> {
    /// Evaluates `@skip` and `@include`.
    fn is_included(&self, directives: &DirectiveList) -> bool {
        let condition = |name: &str| {
            directives
                .get(name)
                .and_then(|directive| directive.specified_argument_by_name("if"))
                .map(|value| resolve_literal(value, self.variables) == NormalizedValue::Boolean(true))
        };
        if condition("skip") == Some(true) {
            return false;
        }
        condition("include") != Some(false)
    }
}

/// Resolves a literal, substituting variables. Unknown variables resolve to null.
fn resolve_literal(value: &ast::Value, variables: &IndexMap<String, NormalizedValue>) -> NormalizedValue {
    match value {
        ast::Value::Null => NormalizedValue::Null,
        ast::Value::Enum(name) => NormalizedValue::Enum(name.to_string()),
        ast::Value::Variable(name) => variables
            .get(name.as_str())
            .cloned()
            .unwrap_or(NormalizedValue::Null),
        ast::Value::String(s) => NormalizedValue::String(s.to_string()),
        ast::Value::Float(f) => NormalizedValue::Float(f.try_to_f64().unwrap_or_default()),
        ast::Value::Int(i) => match i.as_str().parse::<i64>() {
            Ok(i) => NormalizedValue::Int(i),
            Err(_) => NormalizedValue::Float(i.try_to_f64().unwrap_or_default()),
        },
        ast::Value::Boolean(b) => NormalizedValue::Boolean(*b),
        ast::Value::List(items) => NormalizedValue::List(
            items
                .iter()
                .map(|item| resolve_literal(item, variables))
                .collect(),
        ),
        ast::Value::Object(fields) => NormalizedValue::Object(
            fields
                .iter()
                .map(|(name, value)| (name.to_string(), resolve_literal(value, variables)))
                .collect(),
        ),
    }
}

/// The object types a value of `type_name` can have at runtime.
pub(crate) fn possible_types(schema: &Schema, type_name: &str) -> IndexSet<String> {
    match schema.types.get(type_name) {
        Some(ExtendedType::Object(_)) => IndexSet::from([type_name.to_string()]),
        Some(ExtendedType::Union(union_)) => union_
            .members
            .iter()
            .map(|member| member.name.to_string())
            .collect(),
        Some(ExtendedType::Interface(_)) => schema
            .types
            .iter()
            .filter_map(|(name, ty)| match ty {
                ExtendedType::Object(object)
                    if object
                        .implements_interfaces
                        .iter()
                        .any(|interface| interface.name.as_str() == type_name) =>
                {
                    Some(name.to_string())
                }
                _ => None,
            })
            .collect(),
        _ => IndexSet::new(),
    }
}

/// Whether `type_name` is an interface or a union.
pub(crate) fn is_abstract(schema: &Schema, type_name: &str) -> bool {
    matches!(
        schema.types.get(type_name),
        Some(ExtendedType::Interface(_) | ExtendedType::Union(_))
    )
}

/// The named output type of `type_name.field_name`.
pub(crate) fn output_type_name(schema: &Schema, type_name: &str, field_name: &str) -> Option<String> {
    if field_name == TYPENAME {
        return Some("String".to_string());
    }
    schema
        .type_field(type_name, field_name)
        .ok()
        .map(|definition| definition.ty.inner_named_type().to_string())
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    const SCHEMA: &str = r#"
        type Query {
            issue(id: ID!, state: State): Issue
            node(id: ID!): Node
            secret: String
        }
        enum State { OPEN CLOSED }
        interface Node { id: ID! }
        type Issue implements Node { id: ID! key: String assignee: User }
        type User implements Node { id: ID! name: String }
    "#;

    fn schema() -> Valid<Schema> {
        Schema::parse_and_validate(SCHEMA, "schema.graphql").unwrap()
    }

    fn paths(tree: &FieldTree) -> Vec<String> {
        tree.walk()
            .into_iter()
            .map(|id| {
                let field = tree.get(id);
                format!("{} {:?}", tree.query_path(id), field.object_type_names)
            })
            .collect()
    }

    #[test]
    fn test_fragments_are_flattened_into_object_types() {
        let schema = schema();
        let hidden = HashSet::new();
        let operation = Normalizer::new(&schema, &hidden)
            .normalize(
                r#"query { node(id: "1") { id ... on Issue { key } ...U } }
                fragment U on User { name id }"#,
                None,
                &Object::new(),
            )
            .unwrap();

        assert_eq!(
            paths(&operation.tree),
            vec![
                r#"node ["Query"]"#,
                r#"node.id ["Issue", "User"]"#,
                r#"node.key ["Issue"]"#,
                r#"node.name ["User"]"#,
            ]
        );
    }

    #[test]
    fn test_variables_and_skip() {
        let schema = schema();
        let hidden = HashSet::new();
        let operation = Normalizer::new(&schema, &hidden)
            .normalize(
                r#"query Q($id: ID!, $state: State, $skip: Boolean!) {
                    issue(id: $id, state: $state) { key @skip(if: $skip) id }
                }"#,
                Some("Q"),
                json!({"id": "ISSUE-1", "state": "OPEN", "skip": true})
                    .as_object()
                    .unwrap(),
            )
            .unwrap();

        let tree = &operation.tree;
        let issue = tree.get(tree.roots()[0]);
        assert_eq!(
            issue.arguments.get("id"),
            Some(&NormalizedValue::String("ISSUE-1".into()))
        );
        assert_eq!(
            issue.arguments.get("state"),
            Some(&NormalizedValue::Enum("OPEN".into()))
        );
        assert_eq!(issue.children.len(), 1);
        assert_eq!(operation.name.as_deref(), Some("Q"));
    }

    #[test]
    fn test_hidden_fields_are_rejected() {
        let schema = schema();
        let hidden = HashSet::from([("Query".to_string(), "secret".to_string())]);
        let error = Normalizer::new(&schema, &hidden)
            .normalize("{ secret }", None, &Object::new())
            .unwrap_err();
        assert_eq!(
            error,
            NormalizationError::HiddenField {
                type_name: "Query".into(),
                field: "secret".into()
            }
        );
    }

    #[test]
    fn test_missing_variable() {
        let schema = schema();
        let hidden = HashSet::new();
        let error = Normalizer::new(&schema, &hidden)
            .normalize("query($id: ID!) { issue(id: $id) { id } }", None, &Object::new())
            .unwrap_err();
        assert!(matches!(error, NormalizationError::InvalidVariable { .. }));
    }

    #[test]
    fn test_validation_errors() {
        let schema = schema();
        let hidden = HashSet::new();
        let normalizer = Normalizer::new(&schema, &hidden);
        assert!(matches!(
            normalizer.normalize("{ nope }", None, &Object::new()),
            Err(NormalizationError::ValidationError(_))
        ));
        assert!(matches!(
            normalizer.normalize("{ issue(", None, &Object::new()),
            Err(NormalizationError::ParsingError(_))
        ));
        assert_eq!(
            normalizer.normalize("  ", None, &Object::new()).unwrap_err(),
            NormalizationError::MissingQuery
        );
    }

    #[test]
    fn test_possible_types() {
        let schema = schema();
        assert_eq!(
            possible_types(&schema, "Node"),
            IndexSet::from(["Issue".to_string(), "User".to_string()])
        );
        assert!(is_abstract(&schema, "Node"));
        assert!(!is_abstract(&schema, "Issue"));
    }
}
