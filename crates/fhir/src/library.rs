use crate::datatypes::{Attachment, CodeableConcept, Meta};
use serde::{Deserialize, Serialize};

/// Content type of expression-language source attachments.
pub const CQL_CONTENT_TYPE: &str = "text/cql";

/// A bundle of expression-language source, carried as attachments.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Library {
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
    pub status: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<Attachment>,
}

impl Library {
    /// First attachment of the given content type.
    pub fn content_of_type(&self, content_type: &str) -> Option<&Attachment> {
        self.content
            .iter()
            .find(|a| a.content_type.as_deref() == Some(content_type))
    }
}
