use std::fmt;
use std::num::NonZeroUsize;

use regex::Regex;

use crate::json_ext::Value;

/// How a hydrated field is resolved from its backing field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HydrationStrategy {
    /// One backing call per source value.
    Single,
    /// The backing field takes a list of ids and returns a list of objects, matched back to the
    /// source ids through `identified_by`.
    Batched {
        batch_size: Option<NonZeroUsize>,
        identified_by: String,
    },
    /// Like [`HydrationStrategy::Batched`], but the n-th result belongs to the n-th id sent.
    IndexBased { batch_size: Option<NonZeroUsize> },
}

impl HydrationStrategy {
    pub fn is_batched(&self) -> bool {
        !matches!(self, HydrationStrategy::Single)
    }

    pub fn batch_size(&self) -> Option<NonZeroUsize> {
        match self {
            HydrationStrategy::Single => None,
            HydrationStrategy::Batched { batch_size, .. }
            | HydrationStrategy::IndexBased { batch_size } => *batch_size,
        }
    }
}

/// Where the value of a backing field argument comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueSource {
    /// `$source.a.b`: a value of the parent object, fetched alongside it.
    Source(Vec<String>),
    /// `$argument.name`: an argument of the hydrated field in the client operation.
    Argument(String),
    /// A constant.
    Literal(Value),
}

impl ValueSource {
    pub(crate) fn parse(value: Value) -> Self {
        match value.as_str() {
            Some(text) => {
                if let Some(path) = text.strip_prefix("$source.") {
                    ValueSource::Source(path.split('.').map(str::to_string).collect())
                } else if let Some(name) = text.strip_prefix("$argument.") {
                    ValueSource::Argument(name.to_string())
                } else {
                    ValueSource::Literal(value)
                }
            }
            None => ValueSource::Literal(value),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct HydrationArgument {
    pub name: String,
    pub source: ValueSource,
}

/// A predicate over one field of the parent object deciding whether a hydration applies.
#[derive(Clone, Debug)]
pub struct HydrationCondition {
    pub source_field: Vec<String>,
    pub predicate: Predicate,
}

#[derive(Clone, Debug)]
pub enum Predicate {
    Equals(Value),
    StartsWith(String),
    /// Anchored at both ends.
    Matches(Regex),
}

impl Predicate {
    pub(crate) fn matches(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Predicate::Matches(Regex::new(&format!("^(?:{pattern})$"))?))
    }

    pub fn evaluate(&self, value: &Value) -> bool {
        match self {
            Predicate::Equals(expected) => match (expected, value) {
                (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
                (expected, value) => expected == value,
            },
            Predicate::StartsWith(prefix) => value
                .as_str()
                .map_or(false, |value| value.starts_with(prefix.as_str())),
            Predicate::Matches(regex) => value.as_str().map_or(false, |value| regex.is_match(value)),
        }
    }
}

/// One `@hydrated` (or `@idHydrated`) declaration on a virtual field.
#[derive(Clone, Debug)]
pub struct HydrationInstruction {
    /// The overall type declaring the virtual field.
    pub virtual_type: String,
    pub virtual_field: String,
    /// The service owning the backing field.
    pub service: String,
    /// A root query field of the overall schema.
    pub backing_field: String,
    pub arguments: Vec<HydrationArgument>,
    pub strategy: HydrationStrategy,
    /// The `$source` argument carrying the ids: one call per id, or the id list of a batch.
    pub source_argument: Option<String>,
    pub condition: Option<HydrationCondition>,
    /// The object type produced by the backing field, when it is concrete. Used to route
    /// polymorphic hydrations.
    pub result_type: Option<String>,
}

impl HydrationInstruction {
    /// Every `$source` path read by this instruction, including its condition.
    pub fn source_paths(&self) -> Vec<&[String]> {
        let mut paths: Vec<&[String]> = self
            .arguments
            .iter()
            .filter_map(|argument| match &argument.source {
                ValueSource::Source(path) => Some(path.as_slice()),
                _ => None,
            })
            .collect();
        if let Some(condition) = &self.condition {
            paths.push(condition.source_field.as_slice());
        }
        paths
    }

    /// The argument named by [`HydrationInstruction::source_argument`].
    pub fn batch_argument(&self) -> Option<&HydrationArgument> {
        let name = self.source_argument.as_deref()?;
        self.arguments.iter().find(|argument| argument.name == name)
    }
}

impl fmt::Display for HydrationInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.virtual_type, self.virtual_field, self.service, self.backing_field
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json_bytes::json;

    use super::*;

    #[test]
    fn test_value_sources() {
        assert_eq!(
            ValueSource::parse(json!("$source.owner.id")),
            ValueSource::Source(vec!["owner".into(), "id".into()])
        );
        assert_eq!(
            ValueSource::parse(json!("$argument.first")),
            ValueSource::Argument("first".into())
        );
        assert_eq!(
            ValueSource::parse(json!({"a": "$source.b"})),
            ValueSource::Literal(json!({"a": "$source.b"}))
        );
    }

    #[test]
    fn test_predicates() {
        assert!(Predicate::Equals(json!("APP_USER")).evaluate(&json!("APP_USER")));
        assert!(!Predicate::Equals(json!("APP_USER")).evaluate(&json!("BOT")));
        assert!(Predicate::Equals(json!(1)).evaluate(&json!(1.0)));
        assert!(Predicate::StartsWith("ari:user".into()).evaluate(&json!("ari:user/1")));
        assert!(!Predicate::StartsWith("ari:user".into()).evaluate(&json!(1)));
        let matches = Predicate::matches("[a-z]+-\\d+").unwrap();
        assert!(matches.evaluate(&json!("jira-12")));
        assert!(!matches.evaluate(&json!("xjira-12x!")));
    }
}
