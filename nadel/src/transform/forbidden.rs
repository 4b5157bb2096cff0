use async_trait::async_trait;
use tower::BoxError;

use super::FieldTransform;
use super::ResultContext;
use super::TransformContext;
use super::TransformFieldResult;
use crate::error::TransformError;
use crate::graphql;
use crate::json_ext::Value;
use crate::normalized::FieldDraft;
use crate::normalized::FieldId;
use crate::result::ResultInstructions;

/// Removes the fields denied by [`ExecutionHooks::is_field_forbidden`](crate::ExecutionHooks::is_field_forbidden).
pub(crate) struct ForbiddenFieldTransform;

#[async_trait]
impl FieldTransform for ForbiddenFieldTransform {
    type State = graphql::Error;

    fn name(&self) -> &'static str {
        "forbidden_field"
    }

    async fn is_applicable(
        &self,
        context: &TransformContext<'_>,
        field: FieldId,
    ) -> Result<Option<graphql::Error>, BoxError> {
        if context.tree().get(field).is_typename() {
            return Ok(None);
        }
        context
            .hooks()
            .is_field_forbidden(context.tree(), field, context.service().name())
            .await
            .map_err(|error| TransformError::hook("is_field_forbidden", error).into())
    }

    async fn transform_field(
        &self,
        _context: &TransformContext<'_>,
        _field: FieldDraft,
        _state: &graphql::Error,
    ) -> Result<TransformFieldResult, BoxError> {
        Ok(TransformFieldResult::removed())
    }

    async fn get_result_instructions(
        &self,
        context: &ResultContext<'_>,
        error: &graphql::Error,
    ) -> Result<ResultInstructions, BoxError> {
        let key = context.tree().get(context.field()).result_key();
        let mut instructions = ResultInstructions::new();
        for parent in context.parent_nodes().iter() {
            if !context.applies_to_parent(parent) {
                continue;
            }
            let path = parent.path.child(key);
            instructions.set(path.clone(), Value::Null);
            instructions.error(error.with_path(Some(path)));
        }
        Ok(instructions)
    }
}
