//! FHIR datatypes shared by the decision-support resources.
//!
//! Only the elements the plan engine reads or writes are modelled. Unknown elements in
//! incoming documents are ignored rather than rejected: plan authors routinely carry
//! narrative, identifiers and other metadata the engine has no use for.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Resource metadata.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    /// Last modification instant. Discovery caching keys staleness on this value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    /// Returns true when any coding carries `code`, regardless of system.
    pub fn has_code(&self, code: &str) -> bool {
        self.coding.iter().any(|c| c.code.as_deref() == Some(code))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            display: None,
        }
    }

    /// Builds a typed reference, leaving ids that already carry a type prefix untouched.
    ///
    /// `Reference::typed("Patient", "123")` yields `Patient/123`, while
    /// `Reference::typed("Patient", "Patient/123")` is kept as-is.
    pub fn typed(resource_type: &str, id: &str) -> Self {
        if id.contains('/') {
            Self::new(id)
        } else {
            Self::new(format!("{resource_type}/{id}"))
        }
    }

    /// A local reference to a contained resource (`#id`).
    pub fn contained(id: &str) -> Self {
        Self::new(format!("#{id}"))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Base64 encoded content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

/// An extension with one of the primitive or attachment value choices.
///
/// Exactly one `value*` element is expected to be populated; the constructors keep that
/// invariant, while deserialisation accepts whatever the document carries.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_integer: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date_time: Option<DateTime<FixedOffset>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_attachment: Option<Attachment>,
}

impl Extension {
    pub fn string(url: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            value_string: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn boolean(url: impl Into<String>, value: bool) -> Self {
        Self {
            url: url.into(),
            value_boolean: Some(value),
            ..Default::default()
        }
    }

    pub fn integer(url: impl Into<String>, value: i64) -> Self {
        Self {
            url: url.into(),
            value_integer: Some(value),
            ..Default::default()
        }
    }

    pub fn date_time(url: impl Into<String>, value: DateTime<FixedOffset>) -> Self {
        Self {
            url: url.into(),
            value_date_time: Some(value),
            ..Default::default()
        }
    }

    pub fn attachment(url: impl Into<String>, value: Attachment) -> Self {
        Self {
            url: url.into(),
            value_attachment: Some(value),
            ..Default::default()
        }
    }
}

/// Kind of a related artifact (`documentation`, `citation`, ...).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RelatedArtifact {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Attachment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,
}

/// A computable expression (`language` + `expression`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Expression {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
}

impl Expression {
    pub fn new(language: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            expression: Some(expression.into()),
            ..Default::default()
        }
    }

    /// The expression text, if present and not blank.
    pub fn text(&self) -> Option<&str> {
        self.expression
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Period {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<FixedOffset>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<FixedOffset>>,
}

impl Period {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Trigger for an event-condition-action rule. `name` carries the event name
/// (for CDS Hooks, the hook such as `patient-view`).
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TriggerDefinition {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
