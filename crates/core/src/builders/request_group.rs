use fhir::{
    CodeableConcept, Extension, Reference, RelatedArtifact, RequestGroup, RequestGroupAction,
    Resource,
};

#[derive(Clone, Debug, Default)]
pub struct RequestGroupBuilder {
    request_group: RequestGroup,
}

impl RequestGroupBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.request_group.id = Some(id.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.request_group.status = Some(status.into());
        self
    }

    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.request_group.intent = Some(intent.into());
        self
    }

    pub fn subject(mut self, subject: Reference) -> Self {
        self.request_group.subject = Some(subject);
        self
    }

    pub fn extensions(mut self, extensions: impl IntoIterator<Item = Extension>) -> Self {
        self.request_group.extension.extend(extensions);
        self
    }

    pub fn contained(mut self, resources: impl IntoIterator<Item = Resource>) -> Self {
        self.request_group.contained.extend(resources);
        self
    }

    pub fn actions(mut self, actions: impl IntoIterator<Item = RequestGroupAction>) -> Self {
        self.request_group.action.extend(actions);
        self
    }

    pub fn build(self) -> RequestGroup {
        self.request_group
    }
}

/// Builds one request-group action. [`RequestGroupActionBuilder::is_empty`] reports whether
/// anything was set, so callers can drop actions that ended up with no content.
#[derive(Clone, Debug, Default)]
pub struct RequestGroupActionBuilder {
    action: RequestGroupAction,
}

impl RequestGroupActionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(&mut self, title: Option<String>) -> &mut Self {
        self.action.title = title;
        self
    }

    pub fn description(&mut self, description: Option<String>) -> &mut Self {
        self.action.description = description;
        self
    }

    pub fn prefix(&mut self, prefix: Option<String>) -> &mut Self {
        self.action.prefix = prefix;
        self
    }

    pub fn kind(&mut self, kind: Option<CodeableConcept>) -> &mut Self {
        self.action.kind = kind;
        self
    }

    pub fn documentation(&mut self, artifact: RelatedArtifact) -> &mut Self {
        self.action.documentation.push(artifact);
        self
    }

    pub fn resource(&mut self, reference: Reference) -> &mut Self {
        self.action.resource = Some(reference);
        self
    }

    pub fn extension(&mut self, extension: Extension) -> &mut Self {
        self.action.extension.push(extension);
        self
    }

    pub fn clear_extensions(&mut self) -> &mut Self {
        self.action.extension.clear();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.action == RequestGroupAction::default()
    }

    pub fn build(self) -> RequestGroupAction {
        self.action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_action_is_empty_until_a_field_is_set() {
        let mut builder = RequestGroupActionBuilder::new();
        assert!(builder.is_empty());

        builder.prefix(Some("1.".into()));
        assert!(!builder.is_empty());
    }

    #[test]
    fn request_group_collects_parts_in_order() {
        let group = RequestGroupBuilder::new()
            .status("draft")
            .intent("proposal")
            .actions([
                RequestGroupAction {
                    title: Some("first".into()),
                    ..Default::default()
                },
                RequestGroupAction {
                    title: Some("second".into()),
                    ..Default::default()
                },
            ])
            .build();

        let titles: Vec<_> = group
            .action
            .iter()
            .filter_map(|a| a.title.as_deref())
            .collect();
        assert_eq!(titles, vec!["first", "second"]);
        assert_eq!(group.intent.as_deref(), Some("proposal"));
    }
}
