//! FHIR wire/boundary support for the decision-support engine.
//!
//! This crate provides **wire models** and **format helpers** for the resources the plan
//! engine reads and writes:
//! - definitions: [`PlanDefinition`], [`ActivityDefinition`], [`Library`]
//! - outputs: [`CarePlan`], [`RequestGroup`]
//! - operation envelopes: [`Parameters`]
//!
//! Models cover only the elements the engine uses. Documents are parsed from JSON or YAML
//! through [`Resource::parse_json`] / [`Resource::parse_yaml`]; schema mismatches are
//! reported with the path of the failing field.

pub mod activity_definition;
pub mod care_plan;
pub mod datatypes;
pub mod library;
pub mod parameters;
pub mod plan_definition;
pub mod request_group;
pub mod resource;

// Re-export facades
pub use resource::Resource;

// Re-export resource models
pub use activity_definition::ActivityDefinition;
pub use care_plan::{CarePlan, CarePlanActivity};
pub use library::{Library, CQL_CONTENT_TYPE};
pub use parameters::{Parameters, ParametersParameter};
pub use plan_definition::{
    ActionCondition, ConditionKind, DynamicValue, PlanAction, PlanDefinition, ECA_RULE,
};
pub use request_group::{RequestGroup, RequestGroupAction};

// Re-export datatypes
pub use datatypes::{
    Attachment, CodeableConcept, Coding, Expression, Extension, Meta, Period, Reference,
    RelatedArtifact, TriggerDefinition,
};

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("translation error: {0}")]
    Translation(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;
