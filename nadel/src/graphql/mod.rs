//! GraphQL requests, responses and errors, shared by clients and services.

mod request;
mod response;

use std::fmt;

use heck::ToShoutySnakeCase;
pub use request::Request;
pub use response::Response;
use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;
use serde_json_bytes::Value;

use crate::json_ext::Object;
use crate::json_ext::Path;

/// The extension key carrying the error classification.
pub(crate) const CLASSIFICATION_KEY: &str = "classification";

/// A position in the operation text, 1-based.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Location {
    pub line: u32,
    pub column: u32,
}

/// Coarse category of a GraphQL error, reported under `extensions.classification`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ErrorClassification {
    /// The operation could not be parsed or validated.
    ValidationError,
    /// A service could not be reached or its data could not be fetched.
    DataFetchingException,
    /// A non-null field resolved to null.
    NullValueInNonNullableField,
    /// A field was denied by the authorization hook.
    PermissionDenied,
    /// Execution was aborted before any service call.
    ExecutionAborted,
}

impl ErrorClassification {
    pub(crate) const fn as_str(&self) -> &'static str {
        match self {
            ErrorClassification::ValidationError => "ValidationError",
            ErrorClassification::DataFetchingException => "DataFetchingException",
            ErrorClassification::NullValueInNonNullableField => "NullValueInNonNullableField",
            ErrorClassification::PermissionDenied => "PermissionDenied",
            ErrorClassification::ExecutionAborted => "ExecutionAborted",
        }
    }
}

/// An entry of the `errors` of a [`Response`], from a service or raised by the engine.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
#[non_exhaustive]
pub struct Error {
    pub message: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,

    /// Result keys and list indexes of the field the error belongs to, in the overall result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,

    /// Carries `code` and `classification` for errors raised by the engine.
    #[serde(skip_serializing_if = "Object::is_empty")]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Error {
    /// `classification` and `extension_code` fill `extensions.classification` and
    /// `extensions.code`, unless `extensions` already has them.
    #[builder(visibility = "pub")]
    fn new(
        message: String,
        locations: Vec<Location>,
        path: Option<Path>,
        classification: Option<ErrorClassification>,
        extension_code: Option<String>,
        mut extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        if let Some(classification) = classification {
            extensions
                .entry(CLASSIFICATION_KEY)
                .or_insert(Value::String(ByteString::from(classification.as_str())));
        }
        if let Some(code) = extension_code {
            extensions
                .entry("code")
                .or_insert(Value::String(ByteString::from(code)));
        }
        Self {
            message,
            locations,
            path,
            extensions,
        }
    }

    /// `extensions.code`, when set.
    pub fn extension_code(&self) -> Option<String> {
        self.extensions.get("code").and_then(|c| match c {
            Value::String(s) => Some(s.as_str().to_owned()),
            Value::Number(n) => Some(n.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) | Value::Bool(_) => None,
        })
    }

    pub fn classification(&self) -> Option<&str> {
        self.extensions
            .get(CLASSIFICATION_KEY)
            .and_then(|c| c.as_str())
    }

    /// Returns a duplicate of the error located at `path`.
    pub fn with_path(&self, path: Option<Path>) -> Self {
        let mut error = self.clone();
        error.path = path;
        error
    }
}

/// Drops the `{"line": -1, "column": -1}` locations some services report for errors they cannot
/// place in the query.
pub(crate) fn skip_invalid_locations(mut value: Value) -> Value {
    if let Some(array) = value.as_array_mut() {
        array.retain(|location| {
            location.get("line") != Some(&Value::from(-1))
                || location.get("column") != Some(&Value::from(-1))
        })
    }
    value
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.message.fmt(f)
    }
}

/// How an engine error is reported in `extensions`.
pub(crate) trait ErrorExtension
where
    Self: Sized,
{
    fn extension_code(&self) -> String {
        std::any::type_name::<Self>().to_shouty_snake_case()
    }

    fn classification(&self) -> ErrorClassification {
        ErrorClassification::DataFetchingException
    }

    fn custom_extension_details(&self) -> Option<Object> {
        None
    }
}
