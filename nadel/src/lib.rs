//! A GraphQL federation engine.
//!
//! An operation written against the overall schema is normalized, split per owning service,
//! rewritten into each service's underlying vocabulary, executed (resolving hydrated fields with
//! dependent follow-up calls) and merged back into a single overall-shaped response.

#![cfg_attr(feature = "failfast", allow(unreachable_code))]
#![warn(unreachable_pub)]

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

pub mod blueprint;
mod configuration;
mod engine;
pub mod error;
mod execution;
pub mod graphql;
pub mod hooks;
pub mod instrumentation;
pub mod json_ext;
pub mod normalized;
pub mod result;
mod router;
pub mod services;
pub mod transform;

pub use blueprint::ExecutionBlueprint;
pub use configuration::AliasStrategy;
pub use configuration::Configuration;
pub use engine::Nadel;
pub use engine::NadelBuilder;
pub use hooks::ExecutionHooks;
pub use instrumentation::Instrumentation;
pub use services::HydrationDetails;
pub use services::ServiceRequest;
pub use services::ServiceResponse;
pub use transform::FieldTransform;
