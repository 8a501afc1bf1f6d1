use chrono::{DateTime, FixedOffset};
use fhir::{CarePlan, CarePlanActivity, Extension, Period, Reference, Resource};

/// Incremental construction of a [`CarePlan`]. Setters append in call order.
#[derive(Clone, Debug, Default)]
pub struct CarePlanBuilder {
    care_plan: CarePlan,
}

impl CarePlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instantiates_canonical(mut self, canonical: impl Into<String>) -> Self {
        self.care_plan.instantiates_canonical.push(canonical.into());
        self
    }

    pub fn subject(mut self, subject: Reference) -> Self {
        self.care_plan.subject = Some(subject);
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.care_plan.status = Some(status.into());
        self
    }

    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.care_plan.intent = Some(intent.into());
        self
    }

    pub fn encounter(mut self, encounter: Reference) -> Self {
        self.care_plan.encounter = Some(encounter);
        self
    }

    pub fn author(mut self, author: Reference) -> Self {
        self.care_plan.author = Some(author);
        self
    }

    pub fn contributor(mut self, contributor: Reference) -> Self {
        self.care_plan.contributor.push(contributor);
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.care_plan.language = Some(language.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.set_title(Some(title.into()));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.set_description(Some(description.into()));
        self
    }

    pub fn contained(mut self, resource: Resource) -> Self {
        self.push_contained(resource);
        self
    }

    pub fn activity(mut self, reference: Reference) -> Self {
        self.push_activity(reference);
        self
    }

    pub fn extension(mut self, extension: Extension) -> Self {
        self.push_extension(extension);
        self
    }

    pub fn build(self) -> CarePlan {
        self.care_plan
    }

    /// The document built so far.
    pub fn peek(&self) -> &CarePlan {
        &self.care_plan
    }

    // In-place setters used while walking a plan's actions.

    pub fn push_contained(&mut self, resource: Resource) {
        self.care_plan.contained.push(resource);
    }

    pub fn push_activity(&mut self, reference: Reference) {
        self.care_plan
            .activity
            .push(CarePlanActivity::referencing(reference));
    }

    pub fn push_extension(&mut self, extension: Extension) {
        self.care_plan.extension.push(extension);
    }

    pub fn clear_extensions(&mut self) {
        self.care_plan.extension.clear();
    }

    pub fn set_title(&mut self, title: Option<String>) {
        self.care_plan.title = title;
    }

    pub fn set_description(&mut self, description: Option<String>) {
        self.care_plan.description = description;
    }

    pub fn set_created(&mut self, created: Option<DateTime<FixedOffset>>) {
        self.care_plan.created = created;
    }

    pub fn set_period_start(&mut self, start: Option<DateTime<FixedOffset>>) {
        let period = self.care_plan.period.get_or_insert_with(Period::default);
        period.start = start;
        self.drop_empty_period();
    }

    pub fn set_period_end(&mut self, end: Option<DateTime<FixedOffset>>) {
        let period = self.care_plan.period.get_or_insert_with(Period::default);
        period.end = end;
        self.drop_empty_period();
    }

    /// Replace the whole document.
    pub fn replace(&mut self, care_plan: CarePlan) {
        self.care_plan = care_plan;
    }

    fn drop_empty_period(&mut self) {
        if self.care_plan.period.as_ref().is_some_and(Period::is_empty) {
            self.care_plan.period = None;
        }
    }
}

/// Continue building from an existing document, e.g. one produced by a `$this` rewrite.
impl From<CarePlan> for CarePlanBuilder {
    fn from(care_plan: CarePlan) -> Self {
        Self { care_plan }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fluent_setters_populate_document() {
        let care_plan = CarePlanBuilder::new()
            .instantiates_canonical("PlanDefinition/p1")
            .subject(Reference::typed("Patient", "123"))
            .status("draft")
            .intent("plan")
            .contributor(Reference::typed("Practitioner", "dr-1"))
            .contributor(Reference::typed("Organization", "org-1"))
            .title("Screening")
            .build();

        assert_eq!(care_plan.instantiates_canonical, vec!["PlanDefinition/p1"]);
        assert_eq!(
            care_plan.subject.and_then(|s| s.reference).as_deref(),
            Some("Patient/123")
        );
        assert_eq!(care_plan.contributor.len(), 2);
        assert_eq!(care_plan.title.as_deref(), Some("Screening"));
    }

    #[test]
    fn clearing_both_period_bounds_removes_period() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").expect("valid date");
        let mut builder = CarePlanBuilder::new();

        builder.set_period_start(Some(start));
        assert_eq!(
            builder.peek().period.as_ref().and_then(|p| p.start),
            Some(start)
        );

        builder.set_period_start(None);
        assert!(builder.peek().period.is_none());
    }
}
