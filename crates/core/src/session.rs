//! Per-call apply state.

use crate::builders::CarePlanBuilder;
use crate::constants::{INTENT_PLAN, STATUS_DRAFT};
use crate::evaluation::{CompiledLibrary, EvaluationContext};
use fhir::{CarePlan, PlanDefinition, Reference};

/// Subject and caller context for one `$apply` call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyRequest {
    pub subject_id: String,
    pub encounter_id: Option<String>,
    pub practitioner_id: Option<String>,
    pub organization_id: Option<String>,
    pub user_type: Option<String>,
    pub user_language: Option<String>,
    pub user_task_context: Option<String>,
    pub setting: Option<String>,
    pub setting_context: Option<String>,
}

impl ApplyRequest {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            ..Default::default()
        }
    }

    pub fn with_encounter(mut self, id: impl Into<String>) -> Self {
        self.encounter_id = Some(id.into());
        self
    }

    pub fn with_practitioner(mut self, id: impl Into<String>) -> Self {
        self.practitioner_id = Some(id.into());
        self
    }

    pub fn with_organization(mut self, id: impl Into<String>) -> Self {
        self.organization_id = Some(id.into());
        self
    }

    pub fn with_user_type(mut self, user_type: impl Into<String>) -> Self {
        self.user_type = Some(user_type.into());
        self
    }

    pub fn with_user_language(mut self, language: impl Into<String>) -> Self {
        self.user_language = Some(language.into());
        self
    }

    pub fn with_user_task_context(mut self, context: impl Into<String>) -> Self {
        self.user_task_context = Some(context.into());
        self
    }

    pub fn with_setting(mut self, setting: impl Into<String>) -> Self {
        self.setting = Some(setting.into());
        self
    }

    pub fn with_setting_context(mut self, context: impl Into<String>) -> Self {
        self.setting_context = Some(context.into());
        self
    }
}

/// State of one `apply` call. Created when the call starts and consumed when it returns.
pub struct Session<'a> {
    pub plan: &'a PlanDefinition,
    pub request: &'a ApplyRequest,
    pub library: Option<CompiledLibrary>,
    pub builder: CarePlanBuilder,
}

impl<'a> Session<'a> {
    /// Start a session with the care plan envelope derived from `plan` and `request`.
    pub fn new(
        plan: &'a PlanDefinition,
        request: &'a ApplyRequest,
        library: Option<CompiledLibrary>,
    ) -> Self {
        let mut builder = CarePlanBuilder::new();
        if let Some(id) = plan.id() {
            builder = builder.instantiates_canonical(id);
        }
        builder = builder
            .subject(Reference::typed("Patient", &request.subject_id))
            .status(STATUS_DRAFT)
            .intent(INTENT_PLAN);

        if let Some(encounter) = &request.encounter_id {
            builder = builder.encounter(Reference::typed("Encounter", encounter));
        }

        let practitioner = request
            .practitioner_id
            .as_deref()
            .map(|id| Reference::typed("Practitioner", id));
        let organization = request
            .organization_id
            .as_deref()
            .map(|id| Reference::typed("Organization", id));
        if let Some(author) = practitioner.clone().or_else(|| organization.clone()) {
            builder = builder.author(author);
        }
        for contributor in practitioner.into_iter().chain(organization) {
            builder = builder.contributor(contributor);
        }

        if let Some(language) = &request.user_language {
            builder = builder.language(language);
        }

        Self {
            plan,
            request,
            library,
            builder,
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.request.subject_id
    }

    /// Evaluation context bound to this session's subject and library.
    pub fn evaluation_context(&self) -> EvaluationContext<'_> {
        EvaluationContext::new(self.subject_id()).with_library(self.library.as_ref())
    }

    pub fn finish(self) -> CarePlan {
        self.builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> PlanDefinition {
        PlanDefinition {
            id: Some("hypertension".into()),
            ..Default::default()
        }
    }

    #[test]
    fn envelope_carries_subject_and_defaults() {
        let plan = plan();
        let request = ApplyRequest::new("pat-1");
        let care_plan = Session::new(&plan, &request, None).finish();

        assert_eq!(care_plan.instantiates_canonical, vec!["hypertension"]);
        assert_eq!(
            care_plan.subject.and_then(|r| r.reference).as_deref(),
            Some("Patient/pat-1")
        );
        assert_eq!(care_plan.status.as_deref(), Some("draft"));
        assert_eq!(care_plan.intent.as_deref(), Some("plan"));
        assert!(care_plan.author.is_none());
        assert!(care_plan.contributor.is_empty());
    }

    #[test]
    fn practitioner_is_author_and_both_contribute() {
        let plan = plan();
        let request = ApplyRequest::new("pat-1")
            .with_encounter("enc-7")
            .with_practitioner("dr-2")
            .with_organization("org-3")
            .with_user_language("en-GB");
        let care_plan = Session::new(&plan, &request, None).finish();

        assert_eq!(
            care_plan.author.and_then(|r| r.reference).as_deref(),
            Some("Practitioner/dr-2")
        );
        let contributors: Vec<_> = care_plan
            .contributor
            .iter()
            .filter_map(|r| r.reference.as_deref())
            .collect();
        assert_eq!(contributors, vec!["Practitioner/dr-2", "Organization/org-3"]);
        assert_eq!(
            care_plan.encounter.and_then(|r| r.reference).as_deref(),
            Some("Encounter/enc-7")
        );
        assert_eq!(care_plan.language.as_deref(), Some("en-GB"));
    }

    #[test]
    fn organization_authors_when_no_practitioner() {
        let plan = plan();
        let request = ApplyRequest::new("pat-1").with_organization("org-3");
        let care_plan = Session::new(&plan, &request, None).finish();
        assert_eq!(
            care_plan.author.and_then(|r| r.reference).as_deref(),
            Some("Organization/org-3")
        );
    }
}
