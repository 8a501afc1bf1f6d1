//! Polymorphic resource container and the JSON/YAML parse/render facade.
//!
//! Documents are dispatched on their `resourceType` element. Types the engine works with are
//! decoded into typed structs; everything else is kept verbatim as [`Resource::Other`] so it
//! survives a parse/render cycle untouched.

use crate::{
    ActivityDefinition, CarePlan, FhirError, FhirResult, Library, Parameters, PlanDefinition,
    RequestGroup,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;

// ============================================================================
// Public types
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub enum Resource {
    PlanDefinition(PlanDefinition),
    ActivityDefinition(ActivityDefinition),
    Library(Library),
    CarePlan(CarePlan),
    RequestGroup(RequestGroup),
    Parameters(Parameters),
    /// Any other resource type, kept as raw JSON including its `resourceType`.
    Other(JsonValue),
}

impl Resource {
    // ------------------------------------------------------------------------
    // Parse / render
    // ------------------------------------------------------------------------

    /// Parse a resource from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError::InvalidJson`] for malformed JSON, [`FhirError::InvalidInput`] when
    /// `resourceType` is missing, and [`FhirError::Translation`] (naming the failing field path)
    /// when the document does not match the model for its type.
    pub fn parse_json(json_text: &str) -> FhirResult<Self> {
        let value: JsonValue = serde_json::from_str(json_text)?;
        Self::from_value(value)
    }

    /// Parse a resource from YAML text. Same error contract as [`Resource::parse_json`],
    /// with [`FhirError::InvalidYaml`] for malformed YAML.
    pub fn parse_yaml(yaml_text: &str) -> FhirResult<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml_text)?;
        Self::from_value(value)
    }

    /// Decode a JSON value into the model matching its `resourceType`.
    pub fn from_value(value: JsonValue) -> FhirResult<Self> {
        let resource_type = value
            .get("resourceType")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| FhirError::InvalidInput("missing resourceType".into()))?
            .to_owned();

        let resource = match resource_type.as_str() {
            "PlanDefinition" => Resource::PlanDefinition(typed(&resource_type, value)?),
            "ActivityDefinition" => Resource::ActivityDefinition(typed(&resource_type, value)?),
            "Library" => Resource::Library(typed(&resource_type, value)?),
            "CarePlan" => Resource::CarePlan(typed(&resource_type, value)?),
            "RequestGroup" => Resource::RequestGroup(typed(&resource_type, value)?),
            "Parameters" => Resource::Parameters(typed(&resource_type, value)?),
            _ => Resource::Other(value),
        };
        Ok(resource)
    }

    /// Encode as a JSON value carrying `resourceType`.
    pub fn to_value(&self) -> FhirResult<JsonValue> {
        let body = match self {
            Resource::Other(value) => return Ok(value.clone()),
            Resource::PlanDefinition(r) => serde_json::to_value(r)?,
            Resource::ActivityDefinition(r) => serde_json::to_value(r)?,
            Resource::Library(r) => serde_json::to_value(r)?,
            Resource::CarePlan(r) => serde_json::to_value(r)?,
            Resource::RequestGroup(r) => serde_json::to_value(r)?,
            Resource::Parameters(r) => serde_json::to_value(r)?,
        };

        let mut map = serde_json::Map::new();
        map.insert(
            "resourceType".into(),
            JsonValue::String(self.resource_type().to_owned()),
        );
        if let JsonValue::Object(fields) = body {
            map.extend(fields);
        }
        Ok(JsonValue::Object(map))
    }

    /// Render as pretty-printed JSON text.
    pub fn render_json(&self) -> FhirResult<String> {
        let value = self.to_value()?;
        serde_json::to_string_pretty(&value).map_err(|e| {
            FhirError::Translation(format!(
                "Failed to serialize {}: {e}",
                self.resource_type()
            ))
        })
    }

    pub fn render_yaml(&self) -> FhirResult<String> {
        let value = self.to_value()?;
        serde_yaml::to_string(&value).map_err(|e| {
            FhirError::Translation(format!(
                "Failed to serialize {}: {e}",
                self.resource_type()
            ))
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn resource_type(&self) -> &str {
        match self {
            Resource::PlanDefinition(_) => "PlanDefinition",
            Resource::ActivityDefinition(_) => "ActivityDefinition",
            Resource::Library(_) => "Library",
            Resource::CarePlan(_) => "CarePlan",
            Resource::RequestGroup(_) => "RequestGroup",
            Resource::Parameters(_) => "Parameters",
            Resource::Other(value) => value
                .get("resourceType")
                .and_then(JsonValue::as_str)
                .unwrap_or("Resource"),
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Resource::PlanDefinition(r) => r.id.as_deref(),
            Resource::ActivityDefinition(r) => r.id.as_deref(),
            Resource::Library(r) => r.id.as_deref(),
            Resource::CarePlan(r) => r.id.as_deref(),
            Resource::RequestGroup(r) => r.id.as_deref(),
            Resource::Parameters(r) => r.id.as_deref(),
            Resource::Other(value) => value.get("id").and_then(JsonValue::as_str),
        }
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        match self {
            Resource::PlanDefinition(r) => r.id = Some(id),
            Resource::ActivityDefinition(r) => r.id = Some(id),
            Resource::Library(r) => r.id = Some(id),
            Resource::CarePlan(r) => r.id = Some(id),
            Resource::RequestGroup(r) => r.id = Some(id),
            Resource::Parameters(r) => r.id = Some(id),
            Resource::Other(value) => {
                if let JsonValue::Object(map) = value {
                    map.insert("id".into(), JsonValue::String(id));
                }
            }
        }
    }

    /// Sets `meta.lastUpdated` when the resource does not already carry one.
    pub fn stamp_last_updated(&mut self, instant: DateTime<Utc>) {
        let meta = match self {
            Resource::PlanDefinition(r) => &mut r.meta,
            Resource::ActivityDefinition(r) => &mut r.meta,
            Resource::Library(r) => &mut r.meta,
            Resource::CarePlan(r) => &mut r.meta,
            Resource::RequestGroup(r) => &mut r.meta,
            Resource::Parameters(_) => return,
            Resource::Other(value) => {
                stamp_raw(value, instant);
                return;
            }
        };
        let meta = meta.get_or_insert_with(Default::default);
        if meta.last_updated.is_none() {
            meta.last_updated = Some(instant);
        }
    }

    pub fn as_plan_definition(&self) -> Option<&PlanDefinition> {
        match self {
            Resource::PlanDefinition(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_activity_definition(&self) -> Option<&ActivityDefinition> {
        match self {
            Resource::ActivityDefinition(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_library(&self) -> Option<&Library> {
        match self {
            Resource::Library(r) => Some(r),
            _ => None,
        }
    }
}

macro_rules! impl_from_resource {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Resource {
                fn from(value: $variant) -> Self {
                    Resource::$variant(value)
                }
            }
        )*
    };
}

impl_from_resource!(
    PlanDefinition,
    ActivityDefinition,
    Library,
    CarePlan,
    RequestGroup,
    Parameters
);

impl Serialize for Resource {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Resource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        Resource::from_value(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn typed<T: DeserializeOwned>(resource_type: &str, value: JsonValue) -> FhirResult<T> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(|err| {
        let path = err.path().to_string();
        let source = err.into_inner();
        let path = if path.is_empty() || path == "." {
            "<root>"
        } else {
            path.as_str()
        };
        FhirError::Translation(format!(
            "{resource_type} schema mismatch at {path}: {source}"
        ))
    })
}

fn stamp_raw(value: &mut JsonValue, instant: DateTime<Utc>) {
    let JsonValue::Object(map) = value else {
        return;
    };
    let meta = map
        .entry("meta")
        .or_insert_with(|| JsonValue::Object(Default::default()));
    if let JsonValue::Object(meta) = meta {
        meta.entry("lastUpdated").or_insert_with(|| {
            JsonValue::String(instant.to_rfc3339_opts(SecondsFormat::Millis, true))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_plan_with_contained_activity_definition() {
        let json = r##"{
            "resourceType": "PlanDefinition",
            "id": "chlamydia-screening",
            "meta": { "lastUpdated": "2024-03-01T10:00:00Z" },
            "contained": [
                { "resourceType": "ActivityDefinition", "id": "screening-request", "kind": "ServiceRequest" }
            ],
            "action": [
                { "title": "Order screening", "definitionCanonical": "#screening-request" }
            ]
        }"##;

        let resource = Resource::parse_json(json).expect("valid plan");
        let plan = resource.as_plan_definition().expect("plan definition");

        assert_eq!(plan.id(), Some("chlamydia-screening"));
        assert_eq!(
            plan.last_updated(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        let contained = plan
            .find_contained("screening-request")
            .and_then(Resource::as_activity_definition)
            .expect("contained activity definition");
        assert_eq!(contained.kind.as_deref(), Some("ServiceRequest"));
    }

    #[test]
    fn parses_yaml_documents() {
        let yaml = r#"
resourceType: Library
id: common-logic
content:
  - contentType: text/cql
    data: bGlicmFyeSBDb21tb24=
"#;
        let resource = Resource::parse_yaml(yaml).expect("valid library");
        let library = resource.as_library().expect("library");
        assert!(library.content_of_type("text/cql").is_some());
    }

    #[test]
    fn missing_resource_type_is_rejected() {
        let err = Resource::parse_json(r#"{ "id": "x" }"#).expect_err("should fail");
        match err {
            FhirError::InvalidInput(msg) => assert!(msg.contains("resourceType")),
            other => panic!("Expected InvalidInput, got {other:?}"),
        }
    }

    #[test]
    fn schema_mismatch_reports_field_path() {
        let json = r#"{
            "resourceType": "PlanDefinition",
            "id": "bad",
            "action": [ { "title": 42 } ]
        }"#;
        let err = Resource::parse_json(json).expect_err("should fail");
        match err {
            FhirError::Translation(msg) => {
                assert!(msg.contains("PlanDefinition schema mismatch"));
                assert!(msg.contains("action[0].title"), "message was: {msg}");
            }
            other => panic!("Expected Translation error, got {other:?}"),
        }
    }

    #[test]
    fn render_adds_resource_type() {
        let plan = CarePlan {
            id: Some("cp-1".into()),
            status: Some("draft".into()),
            ..Default::default()
        };
        let value = Resource::from(plan).to_value().expect("encode");
        assert_eq!(value["resourceType"], "CarePlan");
        assert_eq!(value["id"], "cp-1");
        assert_eq!(value["status"], "draft");
    }

    #[test]
    fn unknown_types_are_kept_verbatim() {
        let json = r#"{ "resourceType": "ServiceRequest", "id": "sr-1", "status": "draft" }"#;
        let mut resource = Resource::parse_json(json).expect("valid resource");
        assert_eq!(resource.resource_type(), "ServiceRequest");
        assert_eq!(resource.id(), Some("sr-1"));

        resource.set_id("sr-2");
        let value = resource.to_value().expect("encode");
        assert_eq!(value["id"], "sr-2");
        assert_eq!(value["status"], "draft");
    }

    #[test]
    fn stamping_keeps_existing_last_updated() {
        let earlier = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        let mut plan = Resource::from(PlanDefinition::default());
        plan.stamp_last_updated(earlier);
        plan.stamp_last_updated(later);
        assert_eq!(
            plan.as_plan_definition().and_then(PlanDefinition::last_updated),
            Some(earlier)
        );

        let mut raw = Resource::Other(serde_json::json!({ "resourceType": "Patient" }));
        raw.stamp_last_updated(later);
        assert_eq!(
            raw.to_value().expect("encode")["meta"]["lastUpdated"],
            "2024-01-01T00:00:00.000Z"
        );
    }
}
