//! Mock service implementation

use std::sync::Arc;
use std::task::Poll;

use futures::future;
use parking_lot::Mutex;
use tower::BoxError;
use tower::Service;

use super::ServiceRequest;
use super::ServiceResponse;
use crate::json_ext::Value;

type Handler = dyn Fn(&ServiceRequest) -> Result<Value, BoxError> + Send + Sync;

/// A service answering from a handler, recording every request it receives.
#[derive(Clone)]
pub struct MockService {
    name: String,
    // using an arc to improve efficiency when service is cloned
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<ServiceRequest>>>,
}

impl MockService {
    /// A service answering every request with the JSON body returned by `handler`.
    pub fn new(
        name: impl Into<String>,
        handler: impl Fn(&ServiceRequest) -> Result<Value, BoxError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            calls: Default::default(),
        }
    }

    /// A service answering with canned bodies, keyed by the underlying query text. Whitespace is
    /// ignored when matching.
    pub fn canned(name: impl Into<String>, responses: Vec<(&str, Value)>) -> Self {
        let responses: Vec<(String, Value)> = responses
            .into_iter()
            .map(|(query, body)| (squash(query), body))
            .collect();
        Self::new(name, move |request| {
            let query = squash(request.query());
            responses
                .iter()
                .find(|(candidate, _)| *candidate == query)
                .map(|(_, body)| body.clone())
                .ok_or_else(|| format!("couldn't find mock for query {}", request.query()).into())
        })
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<ServiceRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

fn squash(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Service<ServiceRequest> for MockService {
    type Response = ServiceResponse;

    type Error = BoxError;

    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ServiceRequest) -> Self::Future {
        self.calls.lock().push(request.clone());
        let response = (self.handler)(&request).and_then(|body| {
            ServiceResponse::from_json(&self.name, body).map_err(BoxError::from)
        });
        future::ready(response)
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;
    use tower::ServiceExt;

    use super::*;
    use crate::graphql;

    #[tokio::test]
    async fn test_canned_responses_match_ignoring_whitespace() {
        let service = MockService::canned(
            "identity",
            vec![("query { me { id } }", json!({"data": {"me": {"id": "1"}}}))],
        );
        let request = ServiceRequest::builder()
            .service_name("identity")
            .request(graphql::Request::builder().query("query {\n  me {\n    id\n  }\n}\n").build())
            .build();

        let response = service.clone().oneshot(request.clone()).await.unwrap();
        assert_eq!(response.response.data, Some(json!({"me": {"id": "1"}})));

        let unknown = ServiceRequest::builder()
            .service_name("identity")
            .request(graphql::Request::builder().query("query { you { id } }").build())
            .build();
        let error = service.clone().oneshot(unknown).await.unwrap_err();
        assert!(error.to_string().starts_with("couldn't find mock for query"));
        assert_eq!(service.call_count(), 2);
    }
}
