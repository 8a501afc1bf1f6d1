//! Retrieve collector used during the discovery dry run.
//!
//! Every retrieve the evaluator issues is turned into a FHIR search URL template instead of
//! being executed. The templates become the service's prefetch items.

use super::PrefetchItem;
use crate::constants::NON_PATIENT_COMPARTMENT_TYPES;
use crate::evaluation::{
    Code, DataProvider, EvaluationError, RetrieveRequest, TerminologyProvider, Value,
};
use parking_lot::Mutex;
use url::form_urlencoded;

pub struct DiscoveryDataProvider<'a> {
    terminology: Option<&'a dyn TerminologyProvider>,
    urls: Mutex<Vec<String>>,
}

impl<'a> DiscoveryDataProvider<'a> {
    pub fn new(terminology: Option<&'a dyn TerminologyProvider>) -> Self {
        Self {
            terminology,
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Recorded URLs, de-duplicated, keyed `item1..itemN` in first-seen order.
    pub fn into_prefetch(self) -> Vec<PrefetchItem> {
        self.urls
            .into_inner()
            .into_iter()
            .enumerate()
            .map(|(i, url)| PrefetchItem {
                key: format!("item{}", i + 1),
                url,
            })
            .collect()
    }
}

impl DataProvider for DiscoveryDataProvider<'_> {
    fn retrieve(&self, request: &RetrieveRequest) -> Result<Vec<Value>, EvaluationError> {
        let url = prefetch_url(request, self.terminology)?;
        tracing::debug!("discovery retrieve recorded: {}", url);

        let mut urls = self.urls.lock();
        if !urls.contains(&url) {
            urls.push(url);
        }
        Ok(Vec::new())
    }
}

/// Search parameter linking `data_type` to the patient, if it has one.
fn patient_search_param(data_type: &str) -> Option<&'static str> {
    if data_type == "Patient" {
        Some("_id")
    } else if NON_PATIENT_COMPARTMENT_TYPES.contains(&data_type) {
        None
    } else {
        Some("patient")
    }
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn code_list(codes: &[Code]) -> String {
    codes
        .iter()
        .map(|c| match &c.system {
            Some(system) => format!("{system}|{}", c.code),
            None => c.code.clone(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Build the search URL template for one retrieve.
pub fn prefetch_url(
    request: &RetrieveRequest,
    terminology: Option<&dyn TerminologyProvider>,
) -> Result<String, EvaluationError> {
    let mut params = Vec::new();

    if let Some(template_id) = &request.template_id {
        params.push(format!("_profile={template_id}"));
    }

    if let Some(context_value) = &request.context_value {
        if let Some(param) = patient_search_param(&request.data_type) {
            params.push(format!("{param}={context_value}"));
        }
    }

    if request.value_set.is_some() || !request.codes.is_empty() {
        let Some(code_path) = request.code_path.as_deref() else {
            return Err(EvaluationError::Retrieve(format!(
                "A code path must be provided when filtering on codes or a valueset for {}",
                request.data_type
            )));
        };

        match (&request.value_set, terminology) {
            (Some(value_set), Some(terminology)) => {
                let codes = terminology.expand(value_set)?;
                params.push(format!("{code_path}={}", encode(&code_list(&codes))));
            }
            (Some(value_set), None) => {
                let value_set = value_set.strip_prefix("urn:oid:").unwrap_or(value_set);
                params.push(format!("{code_path}:in={value_set}"));
            }
            (None, _) => {
                params.push(format!("{code_path}={}", encode(&code_list(&request.codes))));
            }
        }
    }

    if let Some(date_path) = &request.date_path {
        if let Some(low) = &request.date_low {
            params.push(format!("{date_path}=ge{low}"));
        }
        if let Some(high) = &request.date_high {
            params.push(format!("{date_path}=le{high}"));
        }
    }

    if params.is_empty() {
        Ok(request.data_type.clone())
    } else {
        Ok(format!("{}?{}", request.data_type, params.join("&")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DISCOVERY_PATIENT_PLACEHOLDER;

    struct FixedTerminology;

    impl TerminologyProvider for FixedTerminology {
        fn expand(&self, _value_set: &str) -> Result<Vec<Code>, EvaluationError> {
            Ok(vec![
                Code::new("http://snomed.info/sct", "44054006"),
                Code::new("http://snomed.info/sct", "73211009"),
            ])
        }
    }

    fn patient_scoped(data_type: &str) -> RetrieveRequest {
        RetrieveRequest {
            context: Some("Patient".into()),
            context_value: Some(DISCOVERY_PATIENT_PLACEHOLDER.into()),
            ..RetrieveRequest::new(data_type)
        }
    }

    #[test]
    fn patient_context_parameter_depends_on_type() {
        assert_eq!(
            prefetch_url(&patient_scoped("Patient"), None).expect("url"),
            "Patient?_id={{context.patientId}}"
        );
        assert_eq!(
            prefetch_url(&patient_scoped("Observation"), None).expect("url"),
            "Observation?patient={{context.patientId}}"
        );
        assert_eq!(
            prefetch_url(&patient_scoped("Medication"), None).expect("url"),
            "Medication"
        );
    }

    #[test]
    fn value_set_filter_without_terminology_uses_in_modifier() {
        let request = RetrieveRequest {
            template_id: Some("http://hl7.org/fhir/StructureDefinition/Condition".into()),
            code_path: Some("code".into()),
            value_set: Some("urn:oid:2.16.840.1.113883.3.464".into()),
            ..patient_scoped("Condition")
        };
        assert_eq!(
            prefetch_url(&request, None).expect("url"),
            "Condition?_profile=http://hl7.org/fhir/StructureDefinition/Condition\
             &patient={{context.patientId}}&code:in=2.16.840.1.113883.3.464"
        );
    }

    #[test]
    fn value_set_is_expanded_when_terminology_is_available() {
        let request = RetrieveRequest {
            code_path: Some("code".into()),
            value_set: Some("http://example.org/vs/diabetes".into()),
            ..patient_scoped("Condition")
        };
        assert_eq!(
            prefetch_url(&request, Some(&FixedTerminology)).expect("url"),
            "Condition?patient={{context.patientId}}\
             &code=http%3A%2F%2Fsnomed.info%2Fsct%7C44054006%2Chttp%3A%2F%2Fsnomed.info%2Fsct%7C73211009"
        );
    }

    #[test]
    fn date_bounds_become_ge_and_le() {
        let request = RetrieveRequest {
            date_path: Some("date".into()),
            date_low: Some("2024-01-01".into()),
            date_high: Some("2024-12-31".into()),
            ..patient_scoped("Encounter")
        };
        assert_eq!(
            prefetch_url(&request, None).expect("url"),
            "Encounter?patient={{context.patientId}}&date=ge2024-01-01&date=le2024-12-31"
        );
    }

    #[test]
    fn code_filter_requires_code_path() {
        let request = RetrieveRequest {
            codes: vec![Code::new("http://loinc.org", "2339-0")],
            ..patient_scoped("Observation")
        };
        match prefetch_url(&request, None).expect_err("should fail") {
            EvaluationError::Retrieve(msg) => assert!(msg.contains("Observation")),
            other => panic!("Expected Retrieve error, got {other:?}"),
        }
    }

    #[test]
    fn collector_dedups_and_numbers_items() {
        let collector = DiscoveryDataProvider::new(None);
        for data_type in ["Observation", "Patient", "Observation"] {
            let result = collector
                .retrieve(&patient_scoped(data_type))
                .expect("retrieve");
            assert!(result.is_empty());
        }

        let items = collector.into_prefetch();
        let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["item1", "item2"]);
        assert_eq!(items[0].url, "Observation?patient={{context.patientId}}");
        assert_eq!(items[1].url, "Patient?_id={{context.patientId}}");
    }
}
