//! The service execution contract: one GraphQL call to one underlying service.

mod mock;

use serde::Serialize;
use tower::util::BoxService;
use tower::BoxError;
use tower::Service;
use tower::ServiceExt;

pub use self::mock::MockService;
use crate::error::FetchError;
use crate::graphql;
use crate::json_ext::Value;
use crate::normalized::OperationKind;

/// Metrics attached to hydration backing calls.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HydrationDetails {
    /// The service whose result holds the hydrated field.
    pub hydration_source_service: String,
    /// `Type.field` of the backing field.
    pub hydration_backing_field: String,
    /// `Type.field` of the hydrated field.
    pub hydration_virtual_field: String,
    /// Result keys of the hydrated field, dot separated.
    pub field_path: String,
    /// The configured maximum size of one batch, for batched hydrations.
    pub batch_size: Option<usize>,
    /// Objects hydrated by this call.
    pub count_of_objects_to_be_hydrated: usize,
    /// Objects hydrated by every call made for this field in the operation.
    pub total_objects_to_be_hydrated: usize,
}

/// A call to an underlying service.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ServiceRequest {
    pub service_name: String,
    /// The underlying operation.
    pub request: graphql::Request,
    pub operation_kind: OperationKind,
    /// The per-service context created by [`ExecutionHooks::create_service_context`](crate::ExecutionHooks::create_service_context).
    pub context: Value,
    /// Present on hydration backing calls only.
    pub hydration_details: Option<HydrationDetails>,
}

#[buildstructor::buildstructor]
impl ServiceRequest {
    #[builder(visibility = "pub")]
    fn new(
        service_name: String,
        request: graphql::Request,
        operation_kind: Option<OperationKind>,
        context: Option<Value>,
        hydration_details: Option<HydrationDetails>,
    ) -> Self {
        Self {
            service_name,
            request,
            operation_kind: operation_kind.unwrap_or(OperationKind::Query),
            context: context.unwrap_or_default(),
            hydration_details,
        }
    }

    /// The underlying query text.
    pub fn query(&self) -> &str {
        self.request.query.as_deref().unwrap_or_default()
    }
}

/// The raw `{data, errors}` of one service call.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct ServiceResponse {
    pub response: graphql::Response,
}

#[buildstructor::buildstructor]
impl ServiceResponse {
    #[builder(visibility = "pub")]
    fn new(data: Option<Value>, errors: Vec<graphql::Error>) -> Self {
        Self {
            response: graphql::Response::builder()
                .and_data(data)
                .errors(errors)
                .build(),
        }
    }

    /// Parses the JSON body returned by `service`.
    pub fn from_json(service: &str, body: Value) -> Result<Self, FetchError> {
        Ok(Self {
            response: graphql::Response::from_value(service, body)?,
        })
    }
}

/// Creates the tower service used for one call to a service.
pub trait MakeServiceExecution: Send + Sync + 'static {
    fn make(&self) -> BoxService<ServiceRequest, ServiceResponse, BoxError>;
}

impl<S> MakeServiceExecution for S
where
    S: Service<ServiceRequest, Response = ServiceResponse, Error = BoxError>
        + Clone
        + Send
        + Sync
        + 'static,
    <S as Service<ServiceRequest>>::Future: Send,
{
    fn make(&self) -> BoxService<ServiceRequest, ServiceResponse, BoxError> {
        self.clone().boxed()
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_hydration_details_serialization() {
        let details = HydrationDetails {
            hydration_source_service: "issues".into(),
            hydration_backing_field: "Query.usersByIds".into(),
            hydration_virtual_field: "Issue.watchers".into(),
            field_path: "issues.watchers".into(),
            batch_size: Some(90),
            count_of_objects_to_be_hydrated: 3,
            total_objects_to_be_hydrated: 93,
        };
        assert_eq!(
            serde_json_bytes::to_value(&details).unwrap(),
            json!({
                "hydrationSourceService": "issues",
                "hydrationBackingField": "Query.usersByIds",
                "hydrationVirtualField": "Issue.watchers",
                "fieldPath": "issues.watchers",
                "batchSize": 90,
                "countOfObjectsToBeHydrated": 3,
                "totalObjectsToBeHydrated": 93
            })
        );
    }

    #[test]
    fn test_response_from_json() {
        let response =
            ServiceResponse::from_json("identity", json!({"data": {"me": {"id": "1"}}})).unwrap();
        assert_eq!(response.response.data, Some(json!({"me": {"id": "1"}})));
        assert!(ServiceResponse::from_json("identity", json!([])).is_err());
    }
}
