//! Constants used throughout the CDS core crate.

use crate::config::FhirVersion;

/// Default directory holding plan and definition documents.
pub const DEFAULT_PLAN_DIR: &str = "plans";

/// Default url of the extension that carries a plan's related artifacts on a request group.
pub const DEFAULT_LINK_EXTENSION_URL: &str = "http://example.org";

/// Expression language the bundled evaluator understands.
pub const DEFAULT_EXPRESSION_LANGUAGE: &str = "text/cql";

/// Latest supported FHIR model version.
pub const LATEST_FHIR_VERSION: FhirVersion = FhirVersion::R4;

/// Subject id bound during the discovery dry run. Prefetch templates carry it verbatim.
pub const DISCOVERY_PATIENT_PLACEHOLDER: &str = "{{context.patientId}}";

/// Dynamic value path that replaces the whole output document.
pub const THIS_PATH: &str = "$this";

/// Resource type produced by an ActivityDefinition that does not declare a `kind`.
pub const DEFAULT_ACTIVITY_KIND: &str = "ServiceRequest";

pub const STATUS_DRAFT: &str = "draft";
pub const INTENT_PLAN: &str = "plan";
pub const INTENT_PROPOSAL: &str = "proposal";

/// Resource types outside the patient compartment. Retrieves for these carry no patient filter.
pub const NON_PATIENT_COMPARTMENT_TYPES: &[&str] = &[
    "Practitioner",
    "Organization",
    "Location",
    "Medication",
    "Substance",
    "ValueSet",
    "CodeSystem",
    "Library",
    "PlanDefinition",
    "ActivityDefinition",
    "Questionnaire",
];
