//! Lifecycle callbacks around the execution of one operation.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use displaydoc::Display;
use thiserror::Error;
use tower::BoxError;

use crate::graphql;
use crate::graphql::ErrorClassification;
use crate::normalized::OperationKind;

/// Aborts an operation before any service call. Raised from a `begin_*` callback.
#[derive(Clone, Debug, Error, Display, PartialEq, Eq)]
/// execution aborted: {message}
pub struct AbortExecution {
    pub message: String,
    /// Errors reported to the client. When empty, one error carrying `message` is reported.
    pub errors: Vec<graphql::Error>,
}

impl AbortExecution {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<graphql::Error>) -> Self {
        self.errors = errors;
        self
    }

    pub(crate) fn into_graphql_errors(self) -> Vec<graphql::Error> {
        if !self.errors.is_empty() {
            return self.errors;
        }
        vec![graphql::Error::builder()
            .message(self.message)
            .classification(ErrorClassification::ExecutionAborted)
            .extension_code("EXECUTION_ABORTED")
            .build()]
    }
}

/// What instrumentations know about the operation being executed.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct InstrumentationParameters {
    pub request: graphql::Request,
    /// Known once the operation has been normalized.
    pub operation_kind: Option<OperationKind>,
}

impl InstrumentationParameters {
    pub(crate) fn new(request: graphql::Request) -> Self {
        Self {
            request,
            operation_kind: None,
        }
    }
}

/// A timed step of the execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    Parse,
    Validate,
    Execute,
    ServiceCall { service: String },
    Hydration { field: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimedStep {
    pub step: Step,
    pub duration: Duration,
}

/// Instrumentation callbacks. Every method has a default implementation.
#[async_trait]
pub trait Instrumentation: Send + Sync + 'static {
    async fn begin_parse(&self, _parameters: &InstrumentationParameters) -> Result<(), AbortExecution> {
        Ok(())
    }

    async fn begin_validation(
        &self,
        _parameters: &InstrumentationParameters,
    ) -> Result<(), AbortExecution> {
        Ok(())
    }

    async fn begin_execute(&self, _parameters: &InstrumentationParameters) -> Result<(), AbortExecution> {
        Ok(())
    }

    fn on_step_timed(&self, _parameters: &InstrumentationParameters, _step: &TimedStep) {}

    /// Called once per operation with the final response, aborted or not.
    async fn instrument_execution_result(
        &self,
        _parameters: &InstrumentationParameters,
        response: graphql::Response,
    ) -> graphql::Response {
        response
    }

    fn on_exception(&self, _parameters: &InstrumentationParameters, _error: &BoxError) {}
}

/// Instrumentations run in registration order.
///
/// `begin_*` stops at the first abort; `instrument_execution_result` always reaches every
/// instrumentation.
#[derive(Clone, Default)]
pub struct ChainedInstrumentation {
    instrumentations: Vec<Arc<dyn Instrumentation>>,
}

impl ChainedInstrumentation {
    pub fn new(instrumentations: Vec<Arc<dyn Instrumentation>>) -> Self {
        Self { instrumentations }
    }

    pub fn push(&mut self, instrumentation: Arc<dyn Instrumentation>) {
        self.instrumentations.push(instrumentation);
    }

    pub fn is_empty(&self) -> bool {
        self.instrumentations.is_empty()
    }
}

#[async_trait]
impl Instrumentation for ChainedInstrumentation {
    async fn begin_parse(&self, parameters: &InstrumentationParameters) -> Result<(), AbortExecution> {
        for instrumentation in &self.instrumentations {
            instrumentation.begin_parse(parameters).await?;
        }
        Ok(())
    }

    async fn begin_validation(
        &self,
        parameters: &InstrumentationParameters,
    ) -> Result<(), AbortExecution> {
        for instrumentation in &self.instrumentations {
            instrumentation.begin_validation(parameters).await?;
        }
        Ok(())
    }

    async fn begin_execute(&self, parameters: &InstrumentationParameters) -> Result<(), AbortExecution> {
        for instrumentation in &self.instrumentations {
            instrumentation.begin_execute(parameters).await?;
        }
        Ok(())
    }

    fn on_step_timed(&self, parameters: &InstrumentationParameters, step: &TimedStep) {
        for instrumentation in &self.instrumentations {
            instrumentation.on_step_timed(parameters, step);
        }
    }

    async fn instrument_execution_result(
        &self,
        parameters: &InstrumentationParameters,
        mut response: graphql::Response,
    ) -> graphql::Response {
        for instrumentation in &self.instrumentations {
            response = instrumentation
                .instrument_execution_result(parameters, response)
                .await;
        }
        response
    }

    fn on_exception(&self, parameters: &InstrumentationParameters, error: &BoxError) {
        for instrumentation in &self.instrumentations {
            instrumentation.on_exception(parameters, error);
        }
    }
}
