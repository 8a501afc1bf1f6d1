//! Sub-definition appliers.
//!
//! Actions that point at an `ActivityDefinition` are materialised by an [`ActivityApplier`].
//! When a definition is not held locally, event-triggered evaluation can fall back to a
//! [`RemoteApplier`] that invokes `$apply` on a FHIR server.

use crate::constants::{DEFAULT_ACTIVITY_KIND, INTENT_PROPOSAL, STATUS_DRAFT};
use crate::session::ApplyRequest;
use crate::store::ResourceStore;
use crate::{CdsError, CdsResult};
use fhir::{ActivityDefinition, Resource};
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use url::Url;

pub trait ActivityApplier: Send + Sync {
    /// Apply the definition stored under `id`.
    fn apply(&self, id: &str, request: &ApplyRequest) -> CdsResult<Resource>;

    /// Apply a definition already in hand, e.g. one contained in the plan.
    fn resolve(&self, definition: &ActivityDefinition, request: &ApplyRequest)
        -> CdsResult<Resource>;
}

pub trait RemoteApplier: Send + Sync {
    fn apply_remote(&self, id: &str, request: &ApplyRequest) -> CdsResult<Resource>;
}

// ============================================================================
// Local applier
// ============================================================================

/// Turns an ActivityDefinition into a draft request resource of its `kind`.
#[derive(Clone)]
pub struct StoreActivityApplier {
    store: Arc<dyn ResourceStore>,
}

impl StoreActivityApplier {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

impl ActivityApplier for StoreActivityApplier {
    fn apply(&self, id: &str, request: &ApplyRequest) -> CdsResult<Resource> {
        let definition = self.store.read_activity_definition(id)?;
        self.resolve(&definition, request)
    }

    fn resolve(
        &self,
        definition: &ActivityDefinition,
        request: &ApplyRequest,
    ) -> CdsResult<Resource> {
        let kind = definition.kind.as_deref().unwrap_or(DEFAULT_ACTIVITY_KIND);

        let mut body = Map::new();
        body.insert("resourceType".into(), json!(kind));
        body.insert("status".into(), json!(STATUS_DRAFT));
        body.insert("intent".into(), json!(INTENT_PROPOSAL));
        body.insert(
            "subject".into(),
            json!({ "reference": format!("Patient/{}", request.subject_id) }),
        );
        if let Some(canonical) = definition.canonical() {
            body.insert("instantiatesCanonical".into(), json!([canonical]));
        }
        if let Some(encounter) = &request.encounter_id {
            body.insert(
                "encounter".into(),
                json!({ "reference": format!("Encounter/{encounter}") }),
            );
        }
        let requester = request
            .practitioner_id
            .as_ref()
            .map(|id| format!("Practitioner/{id}"))
            .or_else(|| {
                request
                    .organization_id
                    .as_ref()
                    .map(|id| format!("Organization/{id}"))
            });
        if let Some(requester) = requester {
            body.insert("requester".into(), json!({ "reference": requester }));
        }
        if let Some(code) = &definition.code {
            body.insert("code".into(), serde_json::to_value(code).map_err(fhir::FhirError::from)?);
        }
        if let Some(description) = &definition.description {
            body.insert("note".into(), json!([{ "text": description }]));
        }

        Ok(Resource::Other(JsonValue::Object(body)))
    }
}

// ============================================================================
// Remote applier
// ============================================================================

/// Invokes `GET <base>/ActivityDefinition/<id>/$apply?patient=<subject>` on a FHIR server.
pub struct HttpRemoteApplier {
    client: reqwest::blocking::Client,
    base: Url,
}

impl HttpRemoteApplier {
    pub fn new(base: Url) -> CdsResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| CdsError::Remote(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub(crate) fn apply_url(&self, id: &str, request: &ApplyRequest) -> CdsResult<Url> {
        let raw = format!(
            "{}/ActivityDefinition/{}/$apply",
            self.base.as_str().trim_end_matches('/'),
            id
        );
        let mut url = Url::parse(&raw)
            .map_err(|e| CdsError::InvalidArgument(format!("invalid apply url {raw}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("patient", &request.subject_id);
            if let Some(encounter) = &request.encounter_id {
                query.append_pair("encounter", encounter);
            }
            if let Some(practitioner) = &request.practitioner_id {
                query.append_pair("practitioner", practitioner);
            }
            if let Some(organization) = &request.organization_id {
                query.append_pair("organization", organization);
            }
        }
        Ok(url)
    }
}

impl RemoteApplier for HttpRemoteApplier {
    fn apply_remote(&self, id: &str, request: &ApplyRequest) -> CdsResult<Resource> {
        let url = self.apply_url(id, request)?;
        tracing::info!("invoking remote $apply: {}", url);

        let body: JsonValue = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/fhir+json")
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|e| CdsError::Remote(format!("{url}: {e}")))?;

        match Resource::from_value(body)? {
            Resource::Parameters(parameters) => parameters.into_first_resource().ok_or_else(|| {
                CdsError::Remote(format!("{url}: response carried no resource parameter"))
            }),
            resource => Ok(resource),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryResourceStore;
    use fhir::{CodeableConcept, Coding};

    fn definition() -> ActivityDefinition {
        ActivityDefinition {
            id: Some("naloxone".into()),
            url: Some("http://example.org/fhir/ActivityDefinition/naloxone".into()),
            kind: Some("MedicationRequest".into()),
            description: Some("Offer naloxone".into()),
            code: Some(CodeableConcept {
                coding: vec![Coding {
                    system: Some("http://www.nlm.nih.gov/research/umls/rxnorm".into()),
                    code: Some("1191222".into()),
                    display: None,
                }],
                text: None,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn resolve_builds_request_of_definition_kind() {
        let applier = StoreActivityApplier::new(Arc::new(InMemoryResourceStore::new()));
        let request = ApplyRequest::new("pat-1")
            .with_encounter("enc-1")
            .with_practitioner("dr-1");

        let resource = applier
            .resolve(&definition(), &request)
            .expect("resolve should succeed");
        let value = resource.to_value().expect("encode");

        assert_eq!(resource.resource_type(), "MedicationRequest");
        assert_eq!(value["status"], "draft");
        assert_eq!(value["subject"]["reference"], "Patient/pat-1");
        assert_eq!(value["encounter"]["reference"], "Encounter/enc-1");
        assert_eq!(value["requester"]["reference"], "Practitioner/dr-1");
        assert_eq!(value["code"]["coding"][0]["code"], "1191222");
        assert_eq!(
            value["instantiatesCanonical"][0],
            "http://example.org/fhir/ActivityDefinition/naloxone"
        );
        assert!(resource.id().is_none());
    }

    #[test]
    fn kind_defaults_to_service_request() {
        let applier = StoreActivityApplier::new(Arc::new(InMemoryResourceStore::new()));
        let resource = applier
            .resolve(&ActivityDefinition::default(), &ApplyRequest::new("p"))
            .expect("resolve should succeed");
        assert_eq!(resource.resource_type(), "ServiceRequest");
    }

    #[test]
    fn apply_reads_definition_from_store() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.insert(definition());
        let applier = StoreActivityApplier::new(store);

        let resource = applier
            .apply("naloxone", &ApplyRequest::new("pat-1"))
            .expect("apply should succeed");
        assert_eq!(resource.resource_type(), "MedicationRequest");

        let err = applier
            .apply("absent", &ApplyRequest::new("pat-1"))
            .expect_err("should fail");
        assert!(err.is_not_found());
    }

    #[test]
    fn remote_apply_url_carries_context() {
        let base = Url::parse("http://fhir.example.org/baseR4/").expect("valid url");
        let applier = HttpRemoteApplier::new(base).expect("client");
        let url = applier
            .apply_url(
                "flu-shot",
                &ApplyRequest::new("pat 1").with_encounter("enc-1"),
            )
            .expect("valid url");

        assert_eq!(
            url.as_str(),
            "http://fhir.example.org/baseR4/ActivityDefinition/flu-shot/$apply?patient=pat+1&encounter=enc-1"
        );
    }
}
