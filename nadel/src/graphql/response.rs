use serde::Deserialize;
use serde::Serialize;
use serde_json_bytes::ByteString;
use serde_json_bytes::Map as JsonMap;

use crate::error::FetchError;
use crate::graphql::skip_invalid_locations;
use crate::graphql::Error;
use crate::json_ext::Object;
use crate::json_ext::Value;

/// The result of one operation, or the raw body returned by one service call.
///
/// The final result of one operation always has this shape: `data` is only absent (`null`)
/// when the root selection failed non-nullably or the operation was aborted before execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default)]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub errors: Vec<Error>,

    #[serde(skip_serializing_if = "Object::is_empty", default)]
    pub extensions: Object,
}

#[buildstructor::buildstructor]
impl Response {
    #[builder(visibility = "pub")]
    fn new(
        data: Option<Value>,
        errors: Vec<Error>,
        extensions: JsonMap<ByteString, Value>,
    ) -> Self {
        Self {
            data,
            errors,
            extensions,
        }
    }

    /// Parses the body returned by `service_name`. Invalid locations are dropped, a missing
    /// `errors` is empty.
    pub(crate) fn from_value(service_name: &str, value: Value) -> Result<Response, FetchError> {
        let mut object = match value {
            Value::Object(object) => object,
            _ => {
                return Err(FetchError::SubrequestMalformedResponse {
                    service: service_name.to_string(),
                    reason: "expected a JSON object".to_string(),
                })
            }
        };
        let data = object.remove("data");
        let errors = match object.remove("errors") {
            Some(Value::Array(errors)) => errors
                .into_iter()
                .map(|mut error| {
                    if let Some(locations) = error.as_object_mut().and_then(|e| e.remove("locations")) {
                        if let Some(error) = error.as_object_mut() {
                            error.insert("locations", skip_invalid_locations(locations));
                        }
                    }
                    serde_json_bytes::from_value::<Error>(error).map_err(|err| {
                        FetchError::SubrequestMalformedResponse {
                            service: service_name.to_string(),
                            reason: format!("invalid error within `errors`: {err}"),
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None | Some(Value::Null) => Vec::new(),
            Some(_) => {
                return Err(FetchError::SubrequestMalformedResponse {
                    service: service_name.to_string(),
                    reason: "`errors` must be an array".to_string(),
                })
            }
        };
        let extensions = match object.remove("extensions") {
            Some(Value::Object(extensions)) => extensions,
            _ => Object::default(),
        };

        Ok(Response {
            data,
            errors,
            extensions,
        })
    }
}
