//! Pluggable decisions taken while executing an operation.
use std::sync::Arc;

use async_trait::async_trait;
use tower::BoxError;

use crate::blueprint::HydrationInstruction;
use crate::graphql;
use crate::json_ext::Value;
use crate::normalized::FieldId;
use crate::normalized::FieldTree;

/// Execution hooks.
///
/// Every method has a default implementation, so implementors only override what they need.
#[async_trait]
pub trait ExecutionHooks: Send + Sync + 'static {
    /// Creates the context passed along every call made to `service` for one operation.
    async fn create_service_context(
        &self,
        _service: &str,
        _request: &graphql::Request,
    ) -> Result<Value, BoxError> {
        Ok(Value::Null)
    }

    /// Routes a top-level field to a service dynamically. `None` falls back to the service
    /// declaring the field.
    async fn resolve_service_for_field(
        &self,
        _tree: &FieldTree,
        _field: FieldId,
    ) -> Result<Option<String>, BoxError> {
        Ok(None)
    }

    /// Picks the hydration instruction for one parent object when several apply. For batched
    /// hydrations, `source_id` is the id being hydrated.
    async fn get_hydration_instruction(
        &self,
        instructions: &[Arc<HydrationInstruction>],
        _parent: &Value,
        _source_id: Option<&Value>,
    ) -> Result<Option<Arc<HydrationInstruction>>, BoxError> {
        Ok(instructions.first().cloned())
    }

    /// Maps one hydration id to the ids actually sent to the backing field.
    async fn map_hydration_id(
        &self,
        _instruction: &HydrationInstruction,
        id: Value,
    ) -> Result<Vec<Value>, BoxError> {
        Ok(vec![id])
    }

    /// Splits one batch of ids into the argument lists of separate backing calls.
    async fn partition_argument_list(
        &self,
        _instruction: &HydrationInstruction,
        ids: Vec<Value>,
    ) -> Result<Vec<Vec<Value>>, BoxError> {
        Ok(vec![ids])
    }

    /// Returns an error when the client may not see `field`. The field is then removed from the
    /// underlying query, and its value is null with that error.
    async fn is_field_forbidden(
        &self,
        _tree: &FieldTree,
        _field: FieldId,
        _service: &str,
    ) -> Result<Option<graphql::Error>, BoxError> {
        Ok(None)
    }
}

/// Hooks keeping every default.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultExecutionHooks;

impl ExecutionHooks for DefaultExecutionHooks {}
