//! Execution of a normalized operation against the services.
//!
//! Every top-level field is one service call, and the calls run concurrently (serially for
//! mutations). A service call transforms its fields into the underlying vocabulary, sends the
//! underlying query, then resolves the result instructions of every transformed field. Hydrated
//! fields resolve theirs by making backing calls, which are service calls themselves, so
//! hydration nests one level per backing call.

mod hydration;

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tokio::sync::Semaphore;
use tower::ServiceExt;
use tracing::Instrument;

pub(crate) use self::hydration::hydrate;
use crate::blueprint::ExecutionBlueprint;
use crate::blueprint::ServiceDefinition;
use crate::configuration::Configuration;
use crate::error::FetchError;
use crate::error::TransformError;
use crate::graphql;
use crate::hooks::ExecutionHooks;
use crate::instrumentation::ChainedInstrumentation;
use crate::instrumentation::Instrumentation;
use crate::instrumentation::InstrumentationParameters;
use crate::instrumentation::Step;
use crate::instrumentation::TimedStep;
use crate::json_ext::Object;
use crate::json_ext::Path;
use crate::json_ext::Value;
use crate::json_ext::ValueExt;
use crate::normalized::print_operation;
use crate::normalized::FieldId;
use crate::normalized::FieldTree;
use crate::normalized::NormalizedOperation;
use crate::normalized::OperationKind;
use crate::result::apply;
use crate::result::complete;
use crate::result::Completion;
use crate::result::JsonNodes;
use crate::result::ResultInstructions;
use crate::router;
use crate::services::HydrationDetails;
use crate::services::MakeServiceExecution;
use crate::services::ServiceRequest;
use crate::transform::transform_query;
use crate::transform::typename_instructions;
use crate::transform::AliasHelper;
use crate::transform::DynFieldTransform;
use crate::transform::ResultContext;
use crate::transform::TransformContext;
use crate::transform::TransformedQuery;

/// What an engine shares between the operations it executes.
#[derive(Clone)]
pub(crate) struct Executor {
    pub(crate) blueprint: Arc<ExecutionBlueprint>,
    pub(crate) services: Arc<IndexMap<String, Arc<dyn MakeServiceExecution>>>,
    pub(crate) hooks: Arc<dyn ExecutionHooks>,
    pub(crate) transforms: Arc<Vec<Arc<dyn DynFieldTransform>>>,
    pub(crate) configuration: Arc<Configuration>,
    pub(crate) instrumentation: Arc<ChainedInstrumentation>,
}

/// The state of one operation.
pub(crate) struct ExecutionContext {
    executor: Executor,
    pub(crate) parameters: InstrumentationParameters,
    pub(crate) aliases: AliasHelper,
    limiter: Option<Semaphore>,
    service_contexts: Mutex<HashMap<String, Value>>,
}

impl Deref for ExecutionContext {
    type Target = Executor;

    fn deref(&self) -> &Executor {
        &self.executor
    }
}

impl ExecutionContext {
    pub(crate) fn new(executor: Executor, parameters: InstrumentationParameters) -> Self {
        let configuration = &executor.configuration;
        Self {
            aliases: AliasHelper::new(configuration.alias_strategy),
            limiter: configuration
                .max_concurrent_service_calls
                .map(|limit| Semaphore::new(limit.get())),
            service_contexts: Default::default(),
            parameters,
            executor,
        }
    }

    pub(crate) fn request(&self) -> &graphql::Request {
        &self.parameters.request
    }

    /// The context of `service`, created once per operation.
    async fn service_context(&self, service: &str) -> Result<Value, TransformError> {
        let mut contexts = self.service_contexts.lock().await;
        if let Some(context) = contexts.get(service) {
            return Ok(context.clone());
        }
        let context = self
            .hooks
            .create_service_context(service, self.request())
            .await
            .map_err(|error| TransformError::hook("create_service_context", error))?;
        contexts.insert(service.to_string(), context.clone());
        Ok(context)
    }
}

/// One call to one service: a top-level field of the operation, or a hydration backing field.
pub(crate) struct ServiceCall {
    pub(crate) service: String,
    pub(crate) kind: OperationKind,
    /// Overall fields; only `root` and its descendants are sent.
    pub(crate) tree: Arc<FieldTree>,
    pub(crate) root: FieldId,
    pub(crate) hydration_details: Option<HydrationDetails>,
    /// Number of backing calls leading to this call.
    pub(crate) depth: usize,
}

impl ServiceCall {
    fn key(&self) -> &str {
        self.tree.get(self.root).result_key()
    }
}

/// The data of a service call, shaped after its overall fields once its instructions are applied.
#[derive(Debug, Default)]
pub(crate) struct ServiceCallResult {
    pub(crate) data: Value,
    pub(crate) errors: Vec<graphql::Error>,
}

impl ServiceCallResult {
    /// The root field is null.
    fn failed(key: &str, error: graphql::Error) -> Self {
        let mut data = Object::new();
        data.insert(key, Value::Null);
        Self {
            data: Value::Object(data),
            errors: vec![error],
        }
    }
}

/// The underlying query of a service call.
pub(crate) struct PreparedCall {
    pub(crate) transformed: TransformedQuery,
    pub(crate) query: String,
}

fn transform_context<'a>(
    execution: &'a ExecutionContext,
    service: &'a ServiceDefinition,
    call: &'a ServiceCall,
) -> TransformContext<'a> {
    TransformContext {
        execution,
        service,
        tree: &call.tree,
        kind: call.kind,
        hydration_depth: call.depth,
    }
}

/// Transforms the fields of `call` and prints the underlying query.
pub(crate) async fn prepare(
    execution: &ExecutionContext,
    service: &ServiceDefinition,
    call: &ServiceCall,
) -> Result<PreparedCall, TransformError> {
    let context = transform_context(execution, service, call);
    let transformed = transform_query(&context, &[call.root]).await?;
    let query = print_operation(call.kind, None, &transformed.tree, service.underlying_schema());
    Ok(PreparedCall { transformed, query })
}

/// The instructions mapping the underlying result in `nodes` back onto the overall fields of
/// `call`. Type names come first, then the instructions of every transformed field, descendants
/// before their ancestors.
pub(crate) async fn resolve(
    execution: &ExecutionContext,
    service: &ServiceDefinition,
    call: &ServiceCall,
    transformed: &TransformedQuery,
    nodes: &JsonNodes,
) -> ResultInstructions {
    let mut instructions = typename_instructions(service, &transformed.tree, nodes);
    let resolved = join_all(transformed.records.iter().map(|record| async move {
        let transform = &execution.transforms[record.transform];
        let context = ResultContext {
            transform: transform_context(execution, service, call),
            underlying: &transformed.tree,
            nodes,
            field: record.field,
            parent_query_path: &record.parent_query_path,
        };
        match transform.get_result_instructions(&context, &record.state).await {
            Ok(instructions) => instructions,
            Err(error) => {
                let error = TransformError::transform(transform.name(), error);
                let key = call.tree.get(record.field).result_key();
                let mut failed = ResultInstructions::new();
                for parent in context.parent_nodes().iter() {
                    let path = parent.path.child(key);
                    failed.set(path.clone(), Value::Null);
                    failed.error(error.to_graphql_error(Some(path)));
                }
                failed
            }
        }
    }))
    .await;
    for resolved in resolved {
        instructions.extend(resolved);
    }
    instructions
}

/// Executes one service call. Failures are reported as errors of the root field of the call,
/// which is then null.
pub(crate) fn execute_service_call(
    execution: &ExecutionContext,
    call: ServiceCall,
) -> BoxFuture<'_, ServiceCallResult> {
    let span = tracing::info_span!(
        "nadel.service_call",
        "nadel.service.name" = call.service.as_str(),
        "graphql.path" = call.key(),
        "otel.kind" = "INTERNAL"
    );
    Box::pin(
        async move {
            let started = Instant::now();
            let key = call.key().to_string();
            let result = match run_service_call(execution, &call).await {
                Ok(result) => result,
                Err(error) => ServiceCallResult::failed(&key, error),
            };
            execution.instrumentation.on_step_timed(
                &execution.parameters,
                &TimedStep {
                    step: Step::ServiceCall {
                        service: call.service.clone(),
                    },
                    duration: started.elapsed(),
                },
            );
            result
        }
        .instrument(span),
    )
}

async fn run_service_call(
    execution: &ExecutionContext,
    call: &ServiceCall,
) -> Result<ServiceCallResult, graphql::Error> {
    let path = Path::empty().child(call.key());
    let service = execution.blueprint.service(&call.service).ok_or_else(|| {
        FetchError::UnknownService {
            service: call.service.clone(),
        }
        .to_graphql_error(Some(path.clone()))
    })?;
    let prepared = prepare(execution, service, call)
        .await
        .map_err(|error| error.to_graphql_error(Some(path.clone())))?;

    let mut errors = Vec::new();
    let data = if prepared.transformed.tree.is_empty() {
        tracing::debug!(service = service.name(), "nothing left to query");
        Value::Object(Object::new())
    } else {
        let response = fetch(execution, call, prepared.query).await?;
        errors.extend(response.errors);
        match response.data {
            Some(data @ Value::Object(_)) => data,
            _ => {
                let mut data = Object::new();
                data.insert(call.key(), Value::Null);
                Value::Object(data)
            }
        }
    };

    let nodes = JsonNodes::new(data);
    let instructions = resolve(execution, service, call, &prepared.transformed, &nodes).await;
    let mut data = nodes.into_data();
    tracing::trace!(
        instructions = instructions.instructions.len(),
        "applying result instructions"
    );
    apply(&mut data, instructions.instructions);
    errors.extend(instructions.errors);
    Ok(ServiceCallResult { data, errors })
}

/// Sends the underlying query.
async fn fetch(
    execution: &ExecutionContext,
    call: &ServiceCall,
    query: String,
) -> Result<graphql::Response, graphql::Error> {
    let path = Path::empty().child(call.key());
    let context = execution
        .service_context(&call.service)
        .await
        .map_err(|error| error.to_graphql_error(Some(path.clone())))?;
    let service = execution.services.get(&call.service).ok_or_else(|| {
        FetchError::UnknownService {
            service: call.service.clone(),
        }
        .to_graphql_error(Some(path.clone()))
    })?;

    tracing::debug!(service = call.service.as_str(), %query, "calling service");
    let request = ServiceRequest::builder()
        .service_name(call.service.clone())
        .request(graphql::Request::builder().query(query).build())
        .operation_kind(call.kind)
        .context(context)
        .and_hydration_details(call.hydration_details.clone())
        .build();

    let _permit = match &execution.limiter {
        Some(limiter) => limiter.acquire().await.ok(),
        None => None,
    };
    match service.make().oneshot(request).await {
        Ok(response) => Ok(response.response),
        Err(error) => {
            failfast_error!(
                service = call.service.as_str(),
                error = %error,
                "service call failed"
            );
            Err(FetchError::SubrequestTransportError {
                service: call.service.clone(),
                reason: error.to_string(),
            }
            .to_graphql_error(Some(path)))
        }
    }
}

/// Executes an operation and shapes the merged result after it.
pub(crate) async fn execute_operation(
    execution: &ExecutionContext,
    operation: NormalizedOperation,
) -> graphql::Response {
    let kind = operation.kind;
    let tree = Arc::new(operation.tree);
    let root_type = execution.blueprint.root_type_name(kind);

    let mut data = Object::new();
    let mut errors = Vec::new();
    let mut calls = Vec::new();
    for root in tree.roots() {
        let field = tree.get(*root);
        // resolved while completing
        if field.is_typename() {
            continue;
        }
        match router::resolve_service(execution, &tree, *root, &root_type).await {
            Ok(service) => calls.push(ServiceCall {
                service,
                kind,
                tree: tree.clone(),
                root: *root,
                hydration_details: None,
                depth: 0,
            }),
            Err(error) => {
                let key = field.result_key();
                data.insert(key, Value::Null);
                errors.push(error.to_graphql_error(Some(Path::empty().child(key))));
            }
        }
    }

    let results = if kind == OperationKind::Mutation && execution.configuration.sequential_mutations {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(execute_service_call(execution, call).await);
        }
        results
    } else {
        join_all(
            calls
                .into_iter()
                .map(|call| execute_service_call(execution, call)),
        )
        .await
    };

    let mut data = Value::Object(data);
    for result in results {
        data.deep_merge(result.data);
        errors.extend(result.errors);
    }
    for error in errors.iter_mut() {
        if let Some(path) = &error.path {
            error.path = Some(execution.aliases.remap(path));
        }
    }

    let typename_key = execution.aliases.typename();
    let completion = Completion {
        schema: execution.blueprint.schema(),
        tree: &tree,
        typename_key: &typename_key,
    };
    let data = complete(&completion, &root_type, &data, &mut errors);
    graphql::Response::builder()
        .and_data(data)
        .errors(errors)
        .build()
}
