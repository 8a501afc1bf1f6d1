//! PlanDefinition wire model.
//!
//! A plan is a tree of [`PlanAction`]s. Each action may be gated by applicability
//! conditions, point at a sub-definition through `definitionCanonical`, rewrite fields of
//! the output document through dynamic values, and nest further actions.

use crate::datatypes::{CodeableConcept, Expression, Meta, RelatedArtifact, TriggerDefinition};
use crate::Resource;
use serde::{Deserialize, Serialize};

/// Plan type code marking an event-condition-action rule.
pub const ECA_RULE: &str = "eca-rule";

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contained: Vec<Resource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_artifact: Vec<RelatedArtifact>,

    /// Canonical references to expression libraries. The first entry is the primary library.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action: Vec<PlanAction>,
}

impl PlanDefinition {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn is_eca_rule(&self) -> bool {
        self.kind.as_ref().is_some_and(|k| k.has_code(ECA_RULE))
    }

    pub fn primary_library(&self) -> Option<&str> {
        self.library.first().map(String::as_str)
    }

    pub fn last_updated(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.meta.as_ref().and_then(|m| m.last_updated)
    }

    /// Looks up a contained resource by id (without the leading `#`).
    pub fn find_contained(&self, id: &str) -> Option<&Resource> {
        self.contained.iter().find(|r| r.id() == Some(id))
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub documentation: Vec<RelatedArtifact>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trigger: Vec<TriggerDefinition>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition: Vec<ActionCondition>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_canonical: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dynamic_value: Vec<DynamicValue>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub action: Vec<PlanAction>,
}

impl PlanAction {
    /// Applicability conditions in declared order; `start`/`stop` conditions are inert.
    pub fn applicability_conditions(&self) -> impl Iterator<Item = &ActionCondition> {
        self.condition
            .iter()
            .filter(|c| c.kind == ConditionKind::Applicability)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    #[default]
    Applicability,
    Start,
    Stop,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ActionCondition {
    #[serde(default)]
    pub kind: ConditionKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DynamicValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<Expression>,
}
