//! Engine configuration.
use std::num::NonZeroUsize;

use displaydoc::Display;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error, Display)]
#[non_exhaustive]
pub enum ConfigurationError {
    /// could not deserialize configuration: {0}
    DeserializeConfigError(serde_yaml::Error),
    /// {message}: {error}
    InvalidConfiguration {
        message: &'static str,
        error: String,
    },
}

/// How artificial aliases are generated.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AliasStrategy {
    /// Deterministic aliases, e.g. `rename__name__User__fullName`.
    #[default]
    Static,
    /// Aliases carry a random per-operation token so they cannot collide with client aliases.
    Dynamic,
}

/// The configuration of the engine.
///
/// Can be created through `serde::Deserialize` from various formats, or loaded from YAML with
/// [`Configuration::from_yaml`].
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields, default)]
pub struct Configuration {
    /// How artificial aliases are generated.
    pub alias_strategy: AliasStrategy,

    /// Maximum nesting of hydrations. A hydration deeper than this resolves to null with an error.
    pub max_hydration_depth: usize,

    /// Batch size used when a batched hydration does not declare `batchSize`.
    pub default_batch_size: NonZeroUsize,

    /// Maximum number of in-flight service calls per operation. Unlimited when absent.
    pub max_concurrent_service_calls: Option<NonZeroUsize>,

    /// Whether errors returned by hydration backing calls are reported to the client.
    pub include_hydration_errors: bool,

    /// Whether top-level mutation fields execute one after the other.
    pub sequential_mutations: bool,
}

const DEFAULT_MAX_HYDRATION_DEPTH: usize = 16;
const DEFAULT_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(200) {
    Some(size) => size,
    None => NonZeroUsize::MIN,
};

impl Default for Configuration {
    fn default() -> Self {
        Self {
            alias_strategy: AliasStrategy::Static,
            max_hydration_depth: DEFAULT_MAX_HYDRATION_DEPTH,
            default_batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent_service_calls: None,
            include_hydration_errors: true,
            sequential_mutations: true,
        }
    }
}

#[buildstructor::buildstructor]
impl Configuration {
    #[builder(visibility = "pub")]
    fn new(
        alias_strategy: Option<AliasStrategy>,
        max_hydration_depth: Option<usize>,
        default_batch_size: Option<NonZeroUsize>,
        max_concurrent_service_calls: Option<NonZeroUsize>,
        include_hydration_errors: Option<bool>,
        sequential_mutations: Option<bool>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            alias_strategy: alias_strategy.unwrap_or(defaults.alias_strategy),
            max_hydration_depth: max_hydration_depth.unwrap_or(defaults.max_hydration_depth),
            default_batch_size: default_batch_size.unwrap_or(defaults.default_batch_size),
            max_concurrent_service_calls,
            include_hydration_errors: include_hydration_errors
                .unwrap_or(defaults.include_hydration_errors),
            sequential_mutations: sequential_mutations.unwrap_or(defaults.sequential_mutations),
        }
    }

    /// Parse a configuration from YAML.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigurationError> {
        let configuration: Configuration =
            serde_yaml::from_str(raw).map_err(ConfigurationError::DeserializeConfigError)?;
        configuration.validate()?;
        Ok(configuration)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_hydration_depth == 0 {
            return Err(ConfigurationError::InvalidConfiguration {
                message: "max_hydration_depth must be at least 1",
                error: "got 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_yaml_snapshot;

    use super::*;

    #[test]
    fn test_defaults() {
        let configuration = Configuration::from_yaml("{}").unwrap();
        assert_eq!(configuration.alias_strategy, AliasStrategy::Static);
        assert_eq!(configuration.max_hydration_depth, 16);
        assert_eq!(configuration.default_batch_size.get(), 200);
        assert!(configuration.include_hydration_errors);
        assert!(configuration.sequential_mutations);
    }

    #[test]
    fn test_from_yaml() {
        let configuration = Configuration::from_yaml(
            r#"
alias_strategy: dynamic
default_batch_size: 50
max_concurrent_service_calls: 4
include_hydration_errors: false
"#,
        )
        .unwrap();
        assert_eq!(configuration.alias_strategy, AliasStrategy::Dynamic);
        assert_eq!(configuration.default_batch_size.get(), 50);
        assert_eq!(
            configuration.max_concurrent_service_calls.map(NonZeroUsize::get),
            Some(4)
        );
        assert!(!configuration.include_hydration_errors);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let error = Configuration::from_yaml("alias_stratgy: dynamic").unwrap_err();
        assert!(matches!(error, ConfigurationError::DeserializeConfigError(_)));
    }

    #[test]
    fn test_zero_depth_is_rejected() {
        let error = Configuration::from_yaml("max_hydration_depth: 0").unwrap_err();
        assert_eq!(
            error.to_string(),
            "max_hydration_depth must be at least 1: got 0"
        );
    }

    #[test]
    fn test_builder() {
        let configuration = Configuration::builder()
            .alias_strategy(AliasStrategy::Dynamic)
            .sequential_mutations(false)
            .build();
        assert_yaml_snapshot!(configuration, @r###"
        ---
        alias_strategy: dynamic
        max_hydration_depth: 16
        default_batch_size: 200
        max_concurrent_service_calls: ~
        include_hydration_errors: true
        sequential_mutations: false
        "###);
    }
}
