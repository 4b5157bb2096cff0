//! The engine: parse, validate and execute client operations.

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use tower::BoxError;
use tracing::Instrument;

use crate::blueprint::ExecutionBlueprint;
use crate::configuration::Configuration;
use crate::error::BlueprintError;
use crate::error::NormalizationError;
use crate::execution::execute_operation;
use crate::execution::ExecutionContext;
use crate::execution::Executor;
use crate::graphql;
use crate::hooks::DefaultExecutionHooks;
use crate::hooks::ExecutionHooks;
use crate::instrumentation::AbortExecution;
use crate::instrumentation::ChainedInstrumentation;
use crate::instrumentation::Instrumentation;
use crate::instrumentation::InstrumentationParameters;
use crate::instrumentation::Step;
use crate::instrumentation::TimedStep;
use crate::normalized::Normalizer;
use crate::services::MakeServiceExecution;
use crate::transform::transform_chain;
use crate::transform::BoxedFieldTransform;
use crate::transform::FieldTransform;

/// A federation engine over the services of one [`ExecutionBlueprint`].
///
/// Cheap to clone; clones share the blueprint and the services.
#[derive(Clone)]
pub struct Nadel {
    executor: Executor,
}

/// Builder for [`Nadel`].
#[derive(Default)]
pub struct NadelBuilder {
    blueprint: Option<ExecutionBlueprint>,
    services: IndexMap<String, Arc<dyn MakeServiceExecution>>,
    hooks: Option<Arc<dyn ExecutionHooks>>,
    transforms: Vec<BoxedFieldTransform>,
    instrumentation: ChainedInstrumentation,
    configuration: Option<Configuration>,
}

impl NadelBuilder {
    pub fn blueprint(mut self, blueprint: ExecutionBlueprint) -> Self {
        self.blueprint = Some(blueprint);
        self
    }

    /// Registers how calls to the service `name` of the blueprint are executed.
    pub fn service(mut self, name: impl Into<String>, service: impl MakeServiceExecution) -> Self {
        self.services.insert(name.into(), Arc::new(service));
        self
    }

    pub fn hooks(mut self, hooks: impl ExecutionHooks) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    /// Adds a custom transform. Custom transforms run after the renames and before hydration, in
    /// registration order.
    pub fn transform<T: FieldTransform>(mut self, transform: T) -> Self {
        self.transforms.push(BoxedFieldTransform::new(transform));
        self
    }

    /// Adds an instrumentation. Instrumentations run in registration order.
    pub fn instrumentation(mut self, instrumentation: impl Instrumentation) -> Self {
        self.instrumentation.push(Arc::new(instrumentation));
        self
    }

    pub fn configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    /// Fails when the blueprint is missing, when a service of the blueprint has no registered
    /// execution, or when the configuration is invalid.
    pub fn build(self) -> Result<Nadel, BlueprintError> {
        let blueprint = self
            .blueprint
            .ok_or_else(|| BlueprintError::Configuration("no blueprint was provided".to_string()))?;
        if let Some(missing) = blueprint
            .services()
            .find(|service| !self.services.contains_key(service.name()))
        {
            return Err(BlueprintError::Configuration(format!(
                "no execution registered for service '{}'",
                missing.name()
            )));
        }
        let configuration = self.configuration.unwrap_or_default();
        configuration
            .validate()
            .map_err(|error| BlueprintError::Configuration(error.to_string()))?;

        Ok(Nadel {
            executor: Executor {
                blueprint: Arc::new(blueprint),
                services: Arc::new(self.services),
                hooks: self
                    .hooks
                    .unwrap_or_else(|| Arc::new(DefaultExecutionHooks)),
                transforms: Arc::new(transform_chain(self.transforms)),
                configuration: Arc::new(configuration),
                instrumentation: Arc::new(self.instrumentation),
            },
        })
    }
}

impl Nadel {
    pub fn builder() -> NadelBuilder {
        NadelBuilder::default()
    }

    pub fn blueprint(&self) -> &ExecutionBlueprint {
        &self.executor.blueprint
    }

    /// Executes one client operation.
    ///
    /// Never fails: every error is reported in the response, whose `data` is absent when the
    /// operation could not start.
    pub async fn execute(&self, request: graphql::Request) -> graphql::Response {
        let mut parameters = InstrumentationParameters::new(request);
        let response = self.run(&mut parameters).await;
        self.executor
            .instrumentation
            .instrument_execution_result(&parameters, response)
            .await
    }

    async fn run(&self, parameters: &mut InstrumentationParameters) -> graphql::Response {
        let instrumentation = &self.executor.instrumentation;
        let blueprint = &self.executor.blueprint;
        let normalizer = Normalizer::new(blueprint.schema(), blueprint.hidden_fields());

        if let Err(abort) = instrumentation.begin_parse(parameters).await {
            return aborted(abort);
        }
        let started = Instant::now();
        let query = parameters.request.query.clone().unwrap_or_default();
        let document = normalizer.parse(&query);
        self.timed(parameters, Step::Parse, started);
        let document = match document {
            Ok(document) => document,
            Err(error) => return self.rejected(parameters, error),
        };

        if let Err(abort) = instrumentation.begin_validation(parameters).await {
            return aborted(abort);
        }
        let started = Instant::now();
        let operation = normalizer.normalize_document(
            &document,
            parameters.request.operation_name.as_deref(),
            &parameters.request.variables,
        );
        self.timed(parameters, Step::Validate, started);
        let operation = match operation {
            Ok(operation) => operation,
            Err(error) => return self.rejected(parameters, error),
        };
        parameters.operation_kind = Some(operation.kind);

        if let Err(abort) = instrumentation.begin_execute(parameters).await {
            return aborted(abort);
        }
        let span = tracing::info_span!(
            "nadel.execute",
            "graphql.operation.kind" = operation.kind.as_str(),
            "graphql.operation.name" = operation.name.as_deref().unwrap_or_default(),
        );
        let started = Instant::now();
        let execution = ExecutionContext::new(self.executor.clone(), parameters.clone());
        let response = execute_operation(&execution, operation).instrument(span).await;
        self.timed(parameters, Step::Execute, started);
        response
    }

    fn timed(&self, parameters: &InstrumentationParameters, step: Step, started: Instant) {
        self.executor.instrumentation.on_step_timed(
            parameters,
            &TimedStep {
                step,
                duration: started.elapsed(),
            },
        );
    }

    fn rejected(
        &self,
        parameters: &InstrumentationParameters,
        error: NormalizationError,
    ) -> graphql::Response {
        tracing::debug!(%error, "operation rejected");
        let graphql_error = error.to_graphql_error();
        let error: BoxError = Box::new(error);
        self.executor.instrumentation.on_exception(parameters, &error);
        graphql::Response::builder().error(graphql_error).build()
    }
}

fn aborted(abort: AbortExecution) -> graphql::Response {
    tracing::debug!(%abort, "operation aborted");
    graphql::Response::builder()
        .errors(abort.into_graphql_errors())
        .build()
}
