use crate::datatypes::{CodeableConcept, Meta};
use serde::{Deserialize, Serialize};

/// Definition of a single activity that can be applied to produce a request resource.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub library: Vec<String>,

    /// Resource type the definition produces (`ServiceRequest`, `MedicationRequest`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
}

impl ActivityDefinition {
    /// The canonical this definition is known by: its url when set, otherwise
    /// `ActivityDefinition/<id>`.
    pub fn canonical(&self) -> Option<String> {
        self.url.clone().or_else(|| {
            self.id
                .as_deref()
                .map(|id| format!("ActivityDefinition/{id}"))
        })
    }
}
