//! Engine errors.
use displaydoc::Display;
use serde::Serialize;
use thiserror::Error;

pub(crate) use crate::graphql::Error;
use crate::graphql::ErrorClassification;
use crate::graphql::ErrorExtension;
use crate::json_ext::Path;
use crate::json_ext::Value;

/// Errors raised while compiling the [`ExecutionBlueprint`](crate::blueprint::ExecutionBlueprint).
///
/// These are configuration errors: they are fatal and surface before any request runs.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BlueprintError {
    /// could not parse the overall schema of service '{service}': {reason}
    OverallSchemaParse { service: String, reason: String },

    /// could not parse the underlying schema of service '{service}': {reason}
    UnderlyingSchemaParse { service: String, reason: String },

    /// the composed overall schema is invalid: {0}
    OverallSchemaInvalid(String),

    /// the root field '{type_name}.{field}' is declared by both '{first}' and '{second}'
    DuplicateRootField {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    /// type '{type_name}' (underlying name '{underlying_name}') of service '{service}' does not exist in its underlying schema
    MissingUnderlyingType {
        service: String,
        type_name: String,
        underlying_name: String,
    },

    /// field '{type_name}.{field}' of service '{service}' maps to '{underlying_field}', which does not exist in its underlying schema
    MissingUnderlyingField {
        service: String,
        type_name: String,
        field: String,
        underlying_field: String,
    },

    /// invalid @{directive} on '{type_name}.{field}': {reason}
    InvalidDirective {
        directive: String,
        type_name: String,
        field: String,
        reason: String,
    },

    /// hydration on '{type_name}.{field}' references unknown service '{service}'
    UnknownHydrationService {
        type_name: String,
        field: String,
        service: String,
    },

    /// invalid configuration: {0}
    Configuration(String),
}

/// Errors raised while turning a client operation into a normalized field tree.
#[derive(Error, Display, Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub enum NormalizationError {
    /// missing query string
    MissingQuery,
    /// parsing error: {0}
    ParsingError(String),
    /// validation error: {0}
    ValidationError(String),
    /// Unknown operation named "{0}"
    UnknownOperation(String),
    /// field '{type_name}.{field}' is hidden
    HiddenField { type_name: String, field: String },
    /// invalid value for variable '{name}': {reason}
    InvalidVariable { name: String, reason: String },
    /// subscription operations are not supported
    SubscriptionNotSupported,
}

impl ErrorExtension for NormalizationError {
    fn extension_code(&self) -> String {
        match self {
            NormalizationError::MissingQuery => "MISSING_QUERY",
            NormalizationError::ParsingError(_) => "PARSING_ERROR",
            NormalizationError::ValidationError(_) => "GRAPHQL_VALIDATION_FAILED",
            NormalizationError::UnknownOperation(_) => "GRAPHQL_VALIDATION_FAILED",
            NormalizationError::HiddenField { .. } => "GRAPHQL_VALIDATION_FAILED",
            NormalizationError::InvalidVariable { .. } => "VALIDATION_INVALID_TYPE_VARIABLE",
            NormalizationError::SubscriptionNotSupported => "SUBSCRIPTION_NOT_SUPPORTED",
        }
        .to_string()
    }

    fn classification(&self) -> ErrorClassification {
        ErrorClassification::ValidationError
    }
}

impl NormalizationError {
    pub(crate) fn to_graphql_error(&self) -> Error {
        Error::builder()
            .message(self.to_string())
            .classification(self.classification())
            .extension_code(self.extension_code())
            .build()
    }
}

/// Error types for execution.
///
/// Note that these are not actually returned to the client, but are instead converted to a
/// path scoped [`struct@Error`].
#[derive(Error, Display, Debug, Clone, Serialize, Eq, PartialEq)]
#[serde(untagged)]
#[non_exhaustive]
pub enum FetchError {
    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the serialization failed.
        reason: String,
    },

    /// call to service '{service}' failed: {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestTransportError {
        /// The service that failed.
        service: String,

        /// The reason the call failed.
        reason: String,
    },

    /// no service is registered under the name '{service}'
    UnknownService { service: String },

    /// could not resolve the service owning field '{field}': {reason}
    ServiceResolution { field: String, reason: String },

    /// hydration backing field '{field}' does not exist in service '{service}'
    MissingBackingField { field: String, service: String },

    /// hydration of '{field}' exceeded the maximum depth of {max_depth}
    HydrationDepthExceeded { field: String, max_depth: usize },
}

impl FetchError {
    /// Convert the fetch error to a GraphQL error.
    pub(crate) fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let mut value: Value = serde_json_bytes::to_value(self).unwrap_or_default();
        let mut extensions = value.as_object_mut().map(std::mem::take).unwrap_or_default();
        // the serialized variant holds the error details, only the service name is worth keeping
        extensions.retain(|key, _| key.as_str() == "service");
        extensions.insert("code", self.extension_code().into());
        if let Some(details) = self.custom_extension_details() {
            extensions.extend(details);
        }

        Error::builder()
            .message(self.to_string())
            .and_path(path)
            .classification(self.classification())
            .extensions(extensions)
            .build()
    }
}

impl ErrorExtension for FetchError {
    fn extension_code(&self) -> String {
        match self {
            FetchError::SubrequestMalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::SubrequestTransportError { .. } => "SUBREQUEST_TRANSPORT_ERROR",
            FetchError::UnknownService { .. } => "UNKNOWN_SERVICE",
            FetchError::ServiceResolution { .. } => "SERVICE_RESOLUTION_ERROR",
            FetchError::MissingBackingField { .. } => "MISSING_BACKING_FIELD",
            FetchError::HydrationDepthExceeded { .. } => "HYDRATION_DEPTH_EXCEEDED",
        }
        .to_string()
    }

    fn custom_extension_details(&self) -> Option<crate::json_ext::Object> {
        match self {
            FetchError::MissingBackingField { field, .. } => {
                let mut details = crate::json_ext::Object::new();
                details.insert("field", field.clone().into());
                Some(details)
            }
            _ => None,
        }
    }
}

/// A hook or a field transform failed while an operation was executing.
///
/// The failing stage is abandoned; the error is reported at the path of the field being handled.
#[derive(Error, Display, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum TransformError {
    /// hook '{hook}' failed: {reason}
    HookFailed { hook: &'static str, reason: String },

    /// transform '{transform}' failed: {reason}
    TransformFailed {
        transform: &'static str,
        reason: String,
    },
}

impl TransformError {
    pub(crate) fn hook(hook: &'static str, error: impl std::fmt::Display) -> Self {
        TransformError::HookFailed {
            hook,
            reason: error.to_string(),
        }
    }

    pub(crate) fn transform(transform: &'static str, error: impl std::fmt::Display) -> Self {
        TransformError::TransformFailed {
            transform,
            reason: error.to_string(),
        }
    }

    pub(crate) fn to_graphql_error(&self, path: Option<Path>) -> Error {
        Error::builder()
            .message(self.to_string())
            .and_path(path)
            .classification(self.classification())
            .extension_code(self.extension_code())
            .build()
    }
}

impl ErrorExtension for TransformError {
    fn extension_code(&self) -> String {
        match self {
            TransformError::HookFailed { .. } => "HOOK_FAILED",
            TransformError::TransformFailed { .. } => "TRANSFORM_FAILED",
        }
        .to_string()
    }
}
