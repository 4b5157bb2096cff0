mod common;

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use nadel::blueprint::ServiceSchema;
use nadel::graphql;
use nadel::instrumentation::AbortExecution;
use nadel::instrumentation::InstrumentationParameters;
use nadel::instrumentation::Step;
use nadel::instrumentation::TimedStep;
use nadel::json_ext::Object;
use nadel::json_ext::Path;
use nadel::json_ext::Value;
use nadel::normalized::FieldDraft;
use nadel::normalized::FieldId;
use nadel::normalized::FieldTree;
use nadel::result::ResultInstructions;
use nadel::services::MockService;
use nadel::transform::ResultContext;
use nadel::transform::TransformContext;
use nadel::transform::TransformFieldResult;
use nadel::Configuration;
use nadel::ExecutionBlueprint;
use nadel::ExecutionHooks;
use nadel::FieldTransform;
use nadel::Instrumentation;
use nadel::Nadel;
use nadel::ServiceRequest;
use nadel::ServiceResponse;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json_bytes::json;
use test_log::test;
use tower::BoxError;
use tower::Service;

use self::common::issues_blueprint;
use self::common::request;

fn identity() -> MockService {
    MockService::new("identity", |request| {
        if request.query().contains("me {") {
            Ok(json!({"data": {"me": {"name": "Ann"}}}))
        } else {
            Err(format!("unexpected query {}", request.query()).into())
        }
    })
}

#[test(tokio::test)]
async fn a_failed_service_does_not_fail_its_siblings() {
    let issues = MockService::new("issues", |_| Err("connection refused".into()));
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues)
        .service("identity", identity())
        .build()
        .unwrap();

    let response = nadel
        .execute(request(r#"{ issueById(id: "1") { id } me { name } }"#))
        .await;

    assert_eq!(
        response.data,
        Some(json!({"issueById": null, "me": {"name": "Ann"}}))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(
        response.errors[0].extension_code().as_deref(),
        Some("SUBREQUEST_TRANSPORT_ERROR")
    );
    assert_eq!(response.errors[0].path, Some(Path::from("issueById")));
}

#[test(tokio::test)]
async fn service_error_paths_use_overall_names() {
    let issues = MockService::new("issues", |_| {
        Ok(json!({
            "data": {"issueById": {"id": "1", "rename__key__Issue__issueKey": null}},
            "errors": [{
                "message": "key unavailable",
                "path": ["issueById", "rename__key__Issue__issueKey"]
            }]
        }))
    });
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues)
        .service("identity", identity())
        .build()
        .unwrap();

    let response = nadel
        .execute(request(r#"{ issueById(id: "1") { id key } }"#))
        .await;

    assert_eq!(
        response.data,
        Some(json!({"issueById": {"id": "1", "key": null}}))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].path, Some(Path::from("issueById/key")));
}

#[test(tokio::test)]
async fn nulls_in_non_null_positions_bubble_up() {
    let issues = MockService::new("issues", |_| {
        Ok(json!({"data": {"issueById": {"id": null, "rename__key__Issue__issueKey": "ISS-1"}}}))
    });
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues)
        .service("identity", identity())
        .build()
        .unwrap();

    let response = nadel
        .execute(request(r#"{ issueById(id: "1") { id key } me { name } }"#))
        .await;

    assert_eq!(
        response.data,
        Some(json!({"issueById": null, "me": {"name": "Ann"}}))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].path, Some(Path::from("issueById/id")));
}

#[test(tokio::test)]
async fn validation_errors_have_no_data() {
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", MockService::canned("issues", vec![]))
        .service("identity", identity())
        .build()
        .unwrap();

    // hidden fields do not exist for clients
    let response = nadel
        .execute(request(r#"{ userById(id: "1") { name } }"#))
        .await;

    assert_eq!(response.data, None);
    assert_eq!(response.errors.len(), 1);
}

struct Tenant;

#[async_trait]
impl ExecutionHooks for Tenant {
    async fn create_service_context(
        &self,
        service: &str,
        _request: &graphql::Request,
    ) -> Result<Value, BoxError> {
        Ok(json!({"tenant": "t1", "service": service}))
    }
}

#[test(tokio::test)]
async fn service_calls_carry_their_context() {
    let identity = identity();
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", MockService::canned("issues", vec![]))
        .service("identity", identity.clone())
        .hooks(Tenant)
        .build()
        .unwrap();

    let response = nadel.execute(request("{ me { name } }")).await;

    assert_eq!(response.data, Some(json!({"me": {"name": "Ann"}})));
    assert_eq!(
        identity.calls()[0].context,
        json!({"tenant": "t1", "service": "identity"})
    );
}

#[derive(Clone, Default)]
struct Recorder {
    steps: Arc<Mutex<Vec<Step>>>,
    results: Arc<AtomicUsize>,
    abort: bool,
}

#[async_trait]
impl Instrumentation for Recorder {
    async fn begin_execute(&self, _: &InstrumentationParameters) -> Result<(), AbortExecution> {
        if self.abort {
            return Err(AbortExecution::new("rate limited"));
        }
        Ok(())
    }

    fn on_step_timed(&self, _: &InstrumentationParameters, step: &TimedStep) {
        self.steps.lock().push(step.step.clone());
    }

    async fn instrument_execution_result(
        &self,
        _: &InstrumentationParameters,
        response: graphql::Response,
    ) -> graphql::Response {
        self.results.fetch_add(1, Ordering::SeqCst);
        response
    }
}

#[test(tokio::test)]
async fn instrumentation_sees_every_step() {
    let recorder = Recorder::default();
    let issues = MockService::new("issues", |_| {
        Ok(json!({"data": {"issueById": {"id": "1", "hydration__assignee__assigneeId": "U1"}}}))
    });
    let identity = MockService::new("identity", |_| {
        Ok(json!({"data": {"userById": {"name": "Ann"}}}))
    });
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues)
        .service("identity", identity)
        .instrumentation(recorder.clone())
        .build()
        .unwrap();

    let response = nadel
        .execute(request(r#"{ issueById(id: "1") { id assignee { name } } }"#))
        .await;
    assert_eq!(response.errors, vec![]);

    let steps = recorder.steps.lock().clone();
    for expected in [
        Step::Parse,
        Step::Validate,
        Step::Execute,
        Step::ServiceCall {
            service: "issues".to_string(),
        },
        Step::ServiceCall {
            service: "identity".to_string(),
        },
        Step::Hydration {
            field: "Issue.assignee".to_string(),
        },
    ] {
        assert!(steps.contains(&expected), "{expected:?} missing from {steps:?}");
    }
    assert_eq!(recorder.results.load(Ordering::SeqCst), 1);
}

#[test(tokio::test)]
async fn an_aborted_operation_calls_no_service() {
    let recorder = Recorder {
        abort: true,
        ..Default::default()
    };
    let issues = MockService::canned("issues", vec![]);
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues.clone())
        .service("identity", identity())
        .instrumentation(recorder.clone())
        .build()
        .unwrap();

    let response = nadel
        .execute(request(r#"{ issueById(id: "1") { id } }"#))
        .await;

    assert_eq!(response.data, None);
    assert_eq!(
        response.errors[0].extension_code().as_deref(),
        Some("EXECUTION_ABORTED")
    );
    assert_eq!(issues.call_count(), 0);
    assert_eq!(recorder.results.load(Ordering::SeqCst), 1);
}

/// Denies one field of `Issue`.
struct Deny(&'static str);

#[async_trait]
impl ExecutionHooks for Deny {
    async fn is_field_forbidden(
        &self,
        tree: &FieldTree,
        field: FieldId,
        _service: &str,
    ) -> Result<Option<graphql::Error>, BoxError> {
        let field = tree.get(field);
        if field.field_name == self.0 && field.applies_to("Issue") {
            return Ok(Some(
                graphql::Error::builder()
                    .message(format!("{} is restricted", self.0))
                    .extension_code("FORBIDDEN")
                    .build(),
            ));
        }
        Ok(None)
    }
}

#[test(tokio::test)]
async fn forbidden_fields_are_not_queried_and_resolve_to_null() {
    let issues = MockService::canned(
        "issues",
        vec![(
            r#"query { issueById(id: "1") { id } }"#,
            json!({"data": {"issueById": {"id": "1"}}}),
        )],
    );
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues.clone())
        .service("identity", identity())
        .hooks(Deny("key"))
        .build()
        .unwrap();

    let response = nadel
        .execute(request(r#"{ issueById(id: "1") { id key } }"#))
        .await;

    assert_eq!(
        response.data,
        Some(json!({"issueById": {"id": "1", "key": null}}))
    );
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].message, "key is restricted");
    assert_eq!(
        response.errors[0].extension_code().as_deref(),
        Some("FORBIDDEN")
    );
    assert_eq!(response.errors[0].path, Some(Path::from("issueById/key")));
    assert_eq!(issues.call_count(), 1);
}

#[test(tokio::test)]
async fn a_null_set_on_a_non_null_field_matches_a_service_error_there() {
    // the forbidden non-null id nulls its issue
    let issues = MockService::new("issues", |_| {
        Ok(json!({"data": {"issueById": {"typename__nadel": "Issue"}}}))
    });
    let forbidden = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues)
        .service("identity", identity())
        .hooks(Deny("id"))
        .build()
        .unwrap()
        .execute(request(r#"{ issueById(id: "1") { id } }"#))
        .await;

    // the service reporting the same error at the same place
    let issues = MockService::new("issues", |_| {
        Ok(json!({
            "data": {"issueById": {"id": null}},
            "errors": [{"message": "id is restricted", "path": ["issueById", "id"]}]
        }))
    });
    let reported = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues)
        .service("identity", identity())
        .build()
        .unwrap()
        .execute(request(r#"{ issueById(id: "1") { id } }"#))
        .await;

    assert_eq!(forbidden.data, Some(json!({"issueById": null})));
    assert_eq!(forbidden.data, reported.data);
    let located = |response: &graphql::Response| -> Vec<(String, Option<Path>)> {
        response
            .errors
            .iter()
            .map(|error| (error.message.clone(), error.path.clone()))
            .collect()
    };
    assert_eq!(
        located(&forbidden),
        vec![("id is restricted".to_string(), Some(Path::from("issueById/id")))]
    );
    assert_eq!(located(&forbidden), located(&reported));
}

/// Upper-cases the ids of issues.
struct Shout;

#[async_trait]
impl FieldTransform for Shout {
    type State = ();

    fn name(&self) -> &'static str {
        "shout"
    }

    async fn is_applicable(
        &self,
        context: &TransformContext<'_>,
        field: FieldId,
    ) -> Result<Option<()>, BoxError> {
        let field = context.tree().get(field);
        Ok((field.field_name == "id" && field.applies_to("Issue")).then_some(()))
    }

    async fn transform_field(
        &self,
        _context: &TransformContext<'_>,
        field: FieldDraft,
        _state: &(),
    ) -> Result<TransformFieldResult, BoxError> {
        Ok(TransformFieldResult::unchanged(field))
    }

    async fn get_result_instructions(
        &self,
        context: &ResultContext<'_>,
        _state: &(),
    ) -> Result<ResultInstructions, BoxError> {
        let key = context.tree().get(context.field()).result_key().to_string();
        let mut instructions = ResultInstructions::new();
        for parent in context.parent_nodes().iter() {
            let Some(id) = parent
                .value
                .as_object()
                .and_then(|object| object.get(key.as_str()))
                .and_then(Value::as_str)
            else {
                continue;
            };
            instructions.set(parent.path.child(key.as_str()), json!(id.to_uppercase()));
        }
        Ok(instructions)
    }
}

#[test(tokio::test)]
async fn custom_transforms_rewrite_results() {
    let issues = MockService::new("issues", |_| {
        Ok(json!({"data": {"issueById": {"id": "iss-1", "rename__key__Issue__issueKey": "ISS-1"}}}))
    });
    let nadel = Nadel::builder()
        .blueprint(issues_blueprint())
        .service("issues", issues)
        .service("identity", identity())
        .transform(Shout)
        .build()
        .unwrap();

    let response = nadel
        .execute(request(r#"{ issueById(id: "1") { id key } }"#))
        .await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({"issueById": {"id": "ISS-1", "key": "ISS-1"}}))
    );
}

const DESK: &str = r#"
    type Query { issue(key: String): Issue }
    type Mutation { createIssue(key: String): Issue }
    type Issue { key: String }
"#;

/// A slow service answering `a`, `b` and `c` aliased fields, tracking how many calls overlap.
#[derive(Clone, Default)]
struct Desk {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    order: Arc<Mutex<Vec<String>>>,
}

impl Service<ServiceRequest> for Desk {
    type Response = ServiceResponse;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<ServiceResponse, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: ServiceRequest) -> Self::Future {
        let desk = self.clone();
        Box::pin(async move {
            let now = desk.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            desk.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            desk.in_flight.fetch_sub(1, Ordering::SeqCst);

            let mut data = Object::new();
            for key in ["A", "B", "C"] {
                if request.query().contains(&format!("key: \"{key}\"")) {
                    desk.order.lock().push(key.to_string());
                    data.insert(key.to_lowercase(), json!({"key": key}));
                }
            }
            ServiceResponse::from_json("desk", json!({"data": data})).map_err(BoxError::from)
        })
    }
}

fn desk_nadel(desk: &Desk, configuration: Configuration) -> Nadel {
    let blueprint = ExecutionBlueprint::builder()
        .service(ServiceSchema::new("desk", DESK, DESK))
        .build()
        .unwrap();
    Nadel::builder()
        .blueprint(blueprint)
        .service("desk", desk.clone())
        .configuration(configuration)
        .build()
        .unwrap()
}

const CREATE_THREE: &str = r#"mutation {
    a: createIssue(key: "A") { key }
    b: createIssue(key: "B") { key }
    c: createIssue(key: "C") { key }
}"#;

#[test(tokio::test)]
async fn mutation_fields_run_one_after_the_other() {
    let desk = Desk::default();
    let response = desk_nadel(&desk, Configuration::default())
        .execute(request(CREATE_THREE))
        .await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({"a": {"key": "A"}, "b": {"key": "B"}, "c": {"key": "C"}}))
    );
    assert_eq!(desk.peak.load(Ordering::SeqCst), 1);
    assert_eq!(*desk.order.lock(), vec!["A", "B", "C"]);

    let desk = Desk::default();
    let response = desk_nadel(
        &desk,
        Configuration::builder().sequential_mutations(false).build(),
    )
    .execute(request(CREATE_THREE))
    .await;
    assert_eq!(response.errors, vec![]);
    assert_eq!(desk.peak.load(Ordering::SeqCst), 3);
}

#[test(tokio::test)]
async fn in_flight_service_calls_are_limited() {
    let desk = Desk::default();
    let limit = std::num::NonZeroUsize::new(2).unwrap();
    let response = desk_nadel(
        &desk,
        Configuration::builder()
            .max_concurrent_service_calls(limit)
            .build(),
    )
    .execute(request(
        r#"{ a: issue(key: "A") { key } b: issue(key: "B") { key } c: issue(key: "C") { key } }"#,
    ))
    .await;

    assert_eq!(response.errors, vec![]);
    assert_eq!(
        response.data,
        Some(json!({"a": {"key": "A"}, "b": {"key": "B"}, "c": {"key": "C"}}))
    );
    assert_eq!(desk.peak.load(Ordering::SeqCst), 2);
}
