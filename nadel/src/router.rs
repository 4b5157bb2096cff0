//! Picks the service executing each top-level field.

use crate::error::FetchError;
use crate::execution::ExecutionContext;
use crate::normalized::FieldId;
use crate::normalized::FieldTree;

/// The service of the top-level field `root`: the one chosen by
/// [`ExecutionHooks::resolve_service_for_field`](crate::ExecutionHooks::resolve_service_for_field),
/// or else the service declaring the field.
pub(crate) async fn resolve_service(
    execution: &ExecutionContext,
    tree: &FieldTree,
    root: FieldId,
    root_type: &str,
) -> Result<String, FetchError> {
    let field = tree.get(root);
    let coordinates = || format!("{root_type}.{}", field.field_name);

    let routed = execution
        .hooks
        .resolve_service_for_field(tree, root)
        .await
        .map_err(|error| FetchError::ServiceResolution {
            field: coordinates(),
            reason: error.to_string(),
        })?;
    if let Some(service) = routed {
        tracing::trace!(field = %coordinates(), service = service.as_str(), "service routed by hook");
        return Ok(service);
    }

    execution
        .blueprint
        .root_field_owner(root_type, &field.field_name)
        .map(str::to_string)
        .ok_or_else(|| FetchError::ServiceResolution {
            field: coordinates(),
            reason: "no service declares the field".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tower::BoxError;

    use super::*;
    use crate::execution::tests::harness;
    use crate::hooks::ExecutionHooks;
    use crate::json_ext::Object;
    use crate::normalized::Normalizer;

    struct Failing;

    #[async_trait]
    impl ExecutionHooks for Failing {
        async fn resolve_service_for_field(
            &self,
            _tree: &FieldTree,
            _field: FieldId,
        ) -> Result<Option<String>, BoxError> {
            Err("no route".into())
        }
    }

    #[tokio::test]
    async fn test_static_owner_and_failing_hook() {
        let harness = harness();
        let execution = harness.context("{ me { id } }");
        let operation = Normalizer::new(execution.blueprint.schema(), execution.blueprint.hidden_fields())
            .normalize("{ me { id } }", None, &Object::new())
            .unwrap();
        let root = operation.tree.roots()[0];
        assert_eq!(
            resolve_service(&execution, &operation.tree, root, "Query").await,
            Ok("identity".to_string())
        );

        let execution = harness.with_hooks(Arc::new(Failing)).context("{ me { id } }");
        assert_eq!(
            resolve_service(&execution, &operation.tree, root, "Query").await,
            Err(FetchError::ServiceResolution {
                field: "Query.me".to_string(),
                reason: "no route".to_string(),
            })
        );
    }
}
