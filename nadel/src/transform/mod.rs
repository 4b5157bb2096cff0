//! Rewriting of overall fields into the vocabulary of one service.
//!
//! Every field of a service call goes through the registered [`FieldTransform`]s in order. A
//! transform claims a field through [`FieldTransform::is_applicable`], rewrites it, and once the
//! service has answered, contributes [`ResultInstructions`] mapping the underlying result back
//! onto the overall shape.

mod alias;
mod deep_rename;
mod forbidden;
mod hydration;
mod rename;
mod typename;

use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tower::BoxError;

pub use self::alias::AliasHelper;
use self::deep_rename::DeepRenameTransform;
use self::forbidden::ForbiddenFieldTransform;
pub(crate) use self::hydration::HydrationState;
use self::hydration::HydrationTransform;
use self::rename::RenameTransform;
pub(crate) use self::typename::typename_instructions;
use crate::blueprint::ExecutionBlueprint;
use crate::blueprint::ServiceDefinition;
use crate::error::TransformError;
use crate::execution::ExecutionContext;
use crate::graphql;
use crate::hooks::ExecutionHooks;
use crate::json_ext::Value;
use crate::normalized::is_abstract;
use crate::normalized::output_type_name;
use crate::normalized::possible_types;
use crate::normalized::DraftChild;
use crate::normalized::FieldDraft;
use crate::normalized::FieldId;
use crate::normalized::FieldTree;
use crate::normalized::NormalizedField;
use crate::normalized::OperationKind;
use crate::normalized::QueryPath;
use crate::normalized::TYPENAME;
use crate::result::JsonNode;
use crate::result::JsonNodes;
use crate::result::ResultInstructions;

/// The outcome of [`FieldTransform::transform_field`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransformFieldResult {
    /// The field handed to the next transform. `None` removes the field from the underlying query
    /// and stops the chain.
    pub new_field: Option<FieldDraft>,
    /// Extra fields selected next to the field, in the same parent.
    pub artificial_fields: Vec<FieldDraft>,
}

impl TransformFieldResult {
    pub fn unchanged(field: FieldDraft) -> Self {
        Self {
            new_field: Some(field),
            artificial_fields: Vec::new(),
        }
    }

    pub fn removed() -> Self {
        Self::default()
    }

    pub fn with_artificial_field(mut self, field: FieldDraft) -> Self {
        self.artificial_fields.push(field);
        self
    }
}

/// A rewrite of overall fields.
///
/// The engine only calls [`FieldTransform::transform_field`] and
/// [`FieldTransform::get_result_instructions`] for fields the transform claimed, with the state it
/// returned when claiming them.
#[async_trait]
pub trait FieldTransform: Send + Sync + 'static {
    type State: Send + Sync + 'static;

    fn name(&self) -> &'static str;

    /// Claims `field` by returning a state.
    async fn is_applicable(
        &self,
        context: &TransformContext<'_>,
        field: FieldId,
    ) -> Result<Option<Self::State>, BoxError>;

    async fn transform_field(
        &self,
        context: &TransformContext<'_>,
        field: FieldDraft,
        state: &Self::State,
    ) -> Result<TransformFieldResult, BoxError>;

    /// Maps the underlying result of the claimed field back onto the overall shape.
    async fn get_result_instructions(
        &self,
        context: &ResultContext<'_>,
        state: &Self::State,
    ) -> Result<ResultInstructions, BoxError>;
}

pub(crate) type TransformState = Box<dyn Any + Send + Sync>;

/// [`FieldTransform`] with its state type erased.
#[async_trait]
pub(crate) trait DynFieldTransform: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn is_applicable(
        &self,
        context: &TransformContext<'_>,
        field: FieldId,
    ) -> Result<Option<TransformState>, BoxError>;

    async fn transform_field(
        &self,
        context: &TransformContext<'_>,
        field: FieldDraft,
        state: &TransformState,
    ) -> Result<TransformFieldResult, BoxError>;

    async fn get_result_instructions(
        &self,
        context: &ResultContext<'_>,
        state: &TransformState,
    ) -> Result<ResultInstructions, BoxError>;
}

fn downcast<'s, T: FieldTransform>(
    transform: &T,
    state: &'s TransformState,
) -> Result<&'s T::State, BoxError> {
    state
        .downcast_ref::<T::State>()
        .ok_or_else(|| format!("unexpected state for transform '{}'", transform.name()).into())
}

#[async_trait]
impl<T> DynFieldTransform for T
where
    T: FieldTransform,
{
    fn name(&self) -> &'static str {
        FieldTransform::name(self)
    }

    async fn is_applicable(
        &self,
        context: &TransformContext<'_>,
        field: FieldId,
    ) -> Result<Option<TransformState>, BoxError> {
        Ok(FieldTransform::is_applicable(self, context, field)
            .await?
            .map(|state| Box::new(state) as TransformState))
    }

    async fn transform_field(
        &self,
        context: &TransformContext<'_>,
        field: FieldDraft,
        state: &TransformState,
    ) -> Result<TransformFieldResult, BoxError> {
        let state = downcast(self, state)?;
        FieldTransform::transform_field(self, context, field, state).await
    }

    async fn get_result_instructions(
        &self,
        context: &ResultContext<'_>,
        state: &TransformState,
    ) -> Result<ResultInstructions, BoxError> {
        let state = downcast(self, state)?;
        FieldTransform::get_result_instructions(self, context, state).await
    }
}

/// A custom [`FieldTransform`], ready to be registered on the engine.
#[derive(Clone)]
pub struct BoxedFieldTransform(pub(crate) Arc<dyn DynFieldTransform>);

impl BoxedFieldTransform {
    pub fn new<T: FieldTransform>(transform: T) -> Self {
        Self(Arc::new(transform))
    }
}

/// The transforms of an engine: access control first, renames, custom transforms in registration
/// order, hydration last.
pub(crate) fn transform_chain(custom: Vec<BoxedFieldTransform>) -> Vec<Arc<dyn DynFieldTransform>> {
    let mut transforms: Vec<Arc<dyn DynFieldTransform>> = vec![
        Arc::new(ForbiddenFieldTransform),
        Arc::new(DeepRenameTransform),
        Arc::new(RenameTransform),
    ];
    transforms.extend(custom.into_iter().map(|transform| transform.0));
    transforms.push(Arc::new(HydrationTransform));
    transforms
}

/// What transforms know while rewriting the fields of one service call.
pub struct TransformContext<'a> {
    pub(crate) execution: &'a ExecutionContext,
    pub(crate) service: &'a ServiceDefinition,
    pub(crate) tree: &'a FieldTree,
    pub(crate) kind: OperationKind,
    pub(crate) hydration_depth: usize,
}

impl<'a> TransformContext<'a> {
    pub fn blueprint(&self) -> &'a ExecutionBlueprint {
        &self.execution.blueprint
    }

    /// The service called.
    pub fn service(&self) -> &'a ServiceDefinition {
        self.service
    }

    /// The overall fields of the call.
    pub fn tree(&self) -> &'a FieldTree {
        self.tree
    }

    pub fn operation_kind(&self) -> OperationKind {
        self.kind
    }

    pub fn aliases(&self) -> &'a AliasHelper {
        &self.execution.aliases
    }

    pub fn hooks(&self) -> &'a dyn ExecutionHooks {
        self.execution.hooks.as_ref()
    }

    /// The client request.
    pub fn request(&self) -> &'a graphql::Request {
        self.execution.request()
    }

    /// 0 for top-level calls, 1 for hydration backing calls, and so on.
    pub fn hydration_depth(&self) -> usize {
        self.hydration_depth
    }

    /// The overall object types returned by `field_name` on `parent_types`, in the service's
    /// underlying schema.
    pub(crate) fn output_object_types(&self, parent_types: &[String], field_name: &str) -> Vec<String> {
        let schema = self.service.underlying_schema();
        let mut types: Vec<String> = Vec::new();
        for parent in parent_types {
            let underlying_parent = self.service.underlying_type_name(parent);
            let Some(output) = output_type_name(schema, underlying_parent, field_name) else {
                continue;
            };
            for ty in possible_types(schema, &output) {
                let overall = self.service.overall_type_name(&ty).to_string();
                if !types.contains(&overall) {
                    types.push(overall);
                }
            }
        }
        types
    }
}

/// What transforms know while mapping the result of one claimed field.
pub struct ResultContext<'a> {
    pub(crate) transform: TransformContext<'a>,
    pub(crate) underlying: &'a FieldTree,
    pub(crate) nodes: &'a JsonNodes,
    pub(crate) field: FieldId,
    pub(crate) parent_query_path: &'a QueryPath,
}

impl<'a> Deref for ResultContext<'a> {
    type Target = TransformContext<'a>;

    fn deref(&self) -> &Self::Target {
        &self.transform
    }
}

impl<'a> ResultContext<'a> {
    /// The claimed field.
    pub fn field(&self) -> FieldId {
        self.field
    }

    /// The underlying query sent to the service.
    pub fn underlying_tree(&self) -> &'a FieldTree {
        self.underlying
    }

    pub fn nodes(&self) -> &'a JsonNodes {
        self.nodes
    }

    /// Result keys of the underlying parent of the claimed field.
    pub fn parent_query_path(&self) -> &'a QueryPath {
        self.parent_query_path
    }

    /// The objects holding the claimed field in the service result.
    pub fn parent_nodes(&self) -> Arc<Vec<JsonNode>> {
        self.nodes.get_nodes(self.parent_query_path)
    }

    /// The overall type of a parent object, when its result carries a `__typename`.
    pub fn parent_type_name(&self, parent: &JsonNode) -> Option<String> {
        let alias = self.aliases().typename();
        let object = parent.value.as_object()?;
        let underlying = [alias.as_str(), TYPENAME]
            .iter()
            .find_map(|key| object.get(*key).and_then(Value::as_str))?;
        Some(self.service.overall_type_name(underlying).to_string())
    }

    /// Whether the claimed field is selected on `parent`.
    pub fn applies_to_parent(&self, parent: &JsonNode) -> bool {
        if !parent.value.is_object() {
            return false;
        }
        let field = self.tree.get(self.field);
        if field.object_type_names.len() == 1 {
            return true;
        }
        match self.parent_type_name(parent) {
            Some(type_name) => field.applies_to(&type_name),
            None => true,
        }
    }
}

/// A claim made by a transform while rewriting a query.
pub(crate) struct TransformRecord {
    pub(crate) transform: usize,
    pub(crate) field: FieldId,
    pub(crate) state: TransformState,
    pub(crate) parent_query_path: QueryPath,
}

/// The underlying query of one service call, and the claims to resolve once it has answered.
pub(crate) struct TransformedQuery {
    pub(crate) tree: FieldTree,
    /// Descendants come before their ancestors.
    pub(crate) records: Vec<TransformRecord>,
}

/// Rewrites the overall fields `roots` of `context.tree` into an underlying query.
pub(crate) async fn transform_query(
    context: &TransformContext<'_>,
    roots: &[FieldId],
) -> Result<TransformedQuery, TransformError> {
    let mut transformer = QueryTransformer {
        context,
        tree: FieldTree::new(),
        records: Vec::new(),
    };
    for root in roots {
        transformer.transform(*root, None, QueryPath::root()).await?;
    }
    Ok(TransformedQuery {
        tree: transformer.tree,
        records: transformer.records,
    })
}

struct QueryTransformer<'a, 'b> {
    context: &'a TransformContext<'b>,
    tree: FieldTree,
    records: Vec<TransformRecord>,
}

impl<'a, 'b> QueryTransformer<'a, 'b> {
    /// Runs the transform chain on the overall field `id` and emits what is left of it.
    fn transform(
        &mut self,
        id: FieldId,
        parent: Option<FieldId>,
        parent_path: QueryPath,
    ) -> BoxFuture<'_, Result<(), TransformError>> {
        Box::pin(async move {
            let context = self.context;
            let mut draft = Some(FieldDraft::from_tree(context.tree, id));
            let mut artificial_fields = Vec::new();
            let mut claims = Vec::new();

            for (index, transform) in context.execution.transforms.iter().enumerate() {
                let Some(current) = draft.take() else {
                    break;
                };
                let state = transform
                    .is_applicable(context, id)
                    .await
                    .map_err(|error| TransformError::transform(transform.name(), error))?;
                let Some(state) = state else {
                    draft = Some(current);
                    continue;
                };
                let result = transform
                    .transform_field(context, current, &state)
                    .await
                    .map_err(|error| TransformError::transform(transform.name(), error))?;
                draft = result.new_field;
                artificial_fields.extend(result.artificial_fields);
                claims.push((index, state));
            }

            if let Some(draft) = draft {
                self.emit(draft, parent, parent_path.clone()).await?;
            }
            for field in artificial_fields {
                self.emit(field, parent, parent_path.clone()).await?;
            }
            for (transform, state) in claims {
                self.records.push(TransformRecord {
                    transform,
                    field: id,
                    state,
                    parent_query_path: parent_path.clone(),
                });
            }
            Ok(())
        })
    }

    /// Places `draft` in the underlying tree.
    ///
    /// Object types unknown to the service are dropped, along with the field when none remain.
    /// Abstract and empty selections get an artificial `__typename`.
    fn emit(
        &mut self,
        draft: FieldDraft,
        parent: Option<FieldId>,
        parent_path: QueryPath,
    ) -> BoxFuture<'_, Result<(), TransformError>> {
        Box::pin(async move {
            let context = self.context;
            let service = context.service;
            let schema = service.underlying_schema();

            let mut object_types: Vec<String> = Vec::new();
            for overall in &draft.object_type_names {
                let underlying = service.underlying_type_name(overall);
                if service.has_underlying_type(underlying)
                    && !object_types.iter().any(|ty| ty == underlying)
                {
                    object_types.push(underlying.to_string());
                }
            }
            let Some(first_type) = object_types.first().cloned() else {
                tracing::trace!(
                    field = %draft.field_name,
                    service = service.name(),
                    "dropping field without object types in the service"
                );
                return Ok(());
            };

            let mut field: NormalizedField = draft.to_field();
            field.object_type_names = object_types;
            let output_type = output_type_name(schema, &first_type, &field.field_name);
            let path = parent_path.child(field.result_key());
            let id = self.tree.push(parent, field);

            for child in draft.children {
                match child {
                    DraftChild::Pending(child) => self.transform(child, Some(id), path.clone()).await?,
                    DraftChild::Ready(child) => self.emit(child, Some(id), path.clone()).await?,
                }
            }

            let Some(output_type) = output_type else {
                return Ok(());
            };
            let possible = possible_types(schema, &output_type);
            if possible.is_empty() {
                return Ok(());
            }
            let needs_typename = is_abstract(schema, &output_type) || self.tree.get(id).children.is_empty();
            let alias = context.aliases().typename();
            let selected = self
                .tree
                .children(id)
                .any(|(_, child)| child.alias.as_deref() == Some(alias.as_str()));
            if needs_typename && !selected {
                let mut typename = NormalizedField::new(possible.into_iter().collect(), TYPENAME);
                typename.alias = Some(alias);
                self.tree.push(Some(id), typename);
            }
            Ok(())
        })
    }
}
