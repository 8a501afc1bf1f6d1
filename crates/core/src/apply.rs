//! Plan action resolution.
//!
//! [`PlanApplyService::apply`] walks a plan's action tree for one subject and materialises the
//! applicable actions into a `CarePlan`. [`PlanApplyService::resolve_cds_hooks_plan`] is the
//! event-triggered variant: applicable actions become a flat, ordered `RequestGroup` wrapped
//! in a care plan envelope.
//!
//! Actions are processed strictly in declared order. Per action:
//! 1. applicability conditions gate the action and its subtree
//! 2. `definitionCanonical` is applied and attached to the output
//! 3. dynamic values rewrite fields of the output document
//! 4. child actions are processed
//!
//! Failures applying a sub-definition are logged and skipped; every other failure aborts the
//! call and is returned to the caller.

use crate::activity::{ActivityApplier, RemoteApplier};
use crate::builders::{
    CarePlanBuilder, DocumentTarget, RequestGroupActionBuilder, RequestGroupBuilder,
};
use crate::config::CoreConfig;
use crate::constants::{INTENT_PROPOSAL, STATUS_DRAFT};
use crate::evaluation::{
    CompiledLibrary, DataProvider, EvaluationContext, ExpressionEvaluator, LibraryResolver, Value,
};
use crate::session::{ApplyRequest, Session};
use crate::store::ResourceStore;
use crate::{CdsError, CdsResult};
use cds_types::{Canonical, NonEmptyText};
use fhir::{
    Attachment, CarePlan, Expression, Extension, PlanAction, PlanDefinition, Reference,
    RelatedArtifact, RequestGroupAction, Resource,
};
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of gating an action on its applicability conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Gate {
    Applies,
    Skipped,
}

/// One request-group action produced in event-triggered mode, with the resource it references.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedAction {
    pub action: RequestGroupAction,
    pub resource: Option<Resource>,
}

/// Evaluates plans against a subject.
pub struct PlanApplyService {
    cfg: Arc<CoreConfig>,
    store: Arc<dyn ResourceStore>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    libraries: Arc<dyn LibraryResolver>,
    applier: Arc<dyn ActivityApplier>,
    remote: Option<Arc<dyn RemoteApplier>>,
    data_provider: Option<Arc<dyn DataProvider>>,
}

impl PlanApplyService {
    pub fn new(
        cfg: Arc<CoreConfig>,
        store: Arc<dyn ResourceStore>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        libraries: Arc<dyn LibraryResolver>,
        applier: Arc<dyn ActivityApplier>,
    ) -> Self {
        Self {
            cfg,
            store,
            evaluator,
            libraries,
            applier,
            remote: None,
            data_provider: None,
        }
    }

    /// Use `remote` when an event-triggered action references an ActivityDefinition that is
    /// not held locally.
    pub fn with_remote_applier(mut self, remote: Arc<dyn RemoteApplier>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_data_provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.data_provider = Some(provider);
        self
    }

    pub fn resolve_primary_library(
        &self,
        plan: &PlanDefinition,
    ) -> CdsResult<Option<CompiledLibrary>> {
        self.libraries.resolve_primary(plan)
    }

    // ========================================================================
    // $apply
    // ========================================================================

    /// Apply the plan stored under `plan_id` to the request's subject.
    ///
    /// # Errors
    ///
    /// - [`CdsError::InvalidArgument`] if the plan id or subject id is blank
    /// - [`CdsError::NotFound`] if the plan does not exist
    /// - [`CdsError::Library`] if the plan's primary library cannot be resolved
    /// - any fatal action-resolution error (see module docs)
    pub fn apply(&self, plan_id: &str, request: &ApplyRequest) -> CdsResult<CarePlan> {
        let plan_id = required("plan id", plan_id)?;
        required("subject id", &request.subject_id)?;

        let plan = self.store.read_plan(plan_id.as_str())?;
        tracing::info!("Performing $apply operation on PlanDefinition/{}", plan_id);

        let library = self.libraries.resolve_primary(&plan)?;
        let mut session = Session::new(&plan, request, library);

        for action in &plan.action {
            self.resolve_action(&mut session, action)?;
        }

        Ok(session.finish())
    }

    fn resolve_action(&self, session: &mut Session<'_>, action: &PlanAction) -> CdsResult<()> {
        if self.meets_conditions(session, action)? == Gate::Skipped {
            return Ok(());
        }

        if let Some(reference) = action.definition_canonical.as_deref() {
            self.resolve_definition(session, reference)?;
        }

        self.resolve_dynamic_values(session, action)?;

        for child in &action.action {
            self.resolve_action(session, child)?;
        }
        Ok(())
    }

    fn meets_conditions(&self, session: &Session<'_>, action: &PlanAction) -> CdsResult<Gate> {
        for condition in action.applicability_conditions() {
            let Some(expression) = condition.expression.as_ref() else {
                return Err(CdsError::MissingConditionExpression(describe(action)));
            };
            if let Some(description) = &expression.description {
                tracing::info!("Resolving condition with description: {}", description);
            }
            if !self.speaks_language(expression) {
                continue;
            }
            let Some(text) = expression.text() else {
                return Err(CdsError::MissingConditionExpression(describe(action)));
            };

            let context = session
                .evaluation_context()
                .with_data_provider(self.data_provider.as_deref());
            if self.gate(&context, action, text)? == Gate::Skipped {
                return Ok(Gate::Skipped);
            }
        }
        Ok(Gate::Applies)
    }

    fn resolve_definition(&self, session: &mut Session<'_>, reference: &str) -> CdsResult<()> {
        let outcome = match parse_definition(reference)? {
            Ok(canonical) if canonical.is_contained() => {
                let contained = find_contained(session.plan, &canonical)?;
                self.apply_contained(contained, session.request)
            }
            Ok(canonical) => self.applier.apply(canonical.id(), session.request),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(mut resource) => {
                let id = match resource.id() {
                    Some(id) => id.to_owned(),
                    None => {
                        let id = Uuid::new_v4().to_string();
                        resource.set_id(id.clone());
                        id
                    }
                };
                tracing::debug!(
                    "attaching {}/{} from {}",
                    resource.resource_type(),
                    id,
                    reference
                );
                session.builder.push_contained(resource);
                session.builder.push_activity(Reference::contained(&id));
            }
            Err(err) => {
                tracing::error!(
                    "ERROR: ActivityDefinition {} could not be applied and threw exception {}",
                    reference,
                    err
                );
            }
        }
        Ok(())
    }

    fn resolve_dynamic_values(
        &self,
        session: &mut Session<'_>,
        action: &PlanAction,
    ) -> CdsResult<()> {
        for dynamic_value in &action.dynamic_value {
            let Some(expression) = dynamic_value.expression.as_ref() else {
                continue;
            };
            let Some(text) = expression.text() else {
                continue;
            };
            if let Some(description) = &expression.description {
                tracing::info!("Resolving dynamic value with description: {}", description);
            }

            let path = dynamic_value.path.as_deref().unwrap_or_default();
            let value = {
                let context = session
                    .evaluation_context()
                    .with_data_provider(self.data_provider.as_deref());
                self.evaluator.evaluate(&context, text)?
            };
            DocumentTarget::CarePlan(&mut session.builder).set(
                path,
                value,
                self.cfg.link_extension_url(),
            )?;
        }
        Ok(())
    }

    // ========================================================================
    // Event-triggered resolution
    // ========================================================================

    /// Load `plan_id`, bind its primary library and the configured data provider, and resolve
    /// it in event-triggered mode for `subject_id`.
    pub fn apply_cds_hooks(&self, plan_id: &str, subject_id: &str) -> CdsResult<CarePlan> {
        required("subject id", subject_id)?;
        let plan = self.store.read_plan(plan_id)?;
        let library = self.libraries.resolve_primary(&plan)?;
        let context = EvaluationContext::new(subject_id)
            .with_library(library.as_ref())
            .with_data_provider(self.data_provider.as_deref());
        self.resolve_cds_hooks_plan(&context, &plan, subject_id)
    }

    /// Resolve `plan` into a `RequestGroup` wrapped in a care plan envelope.
    ///
    /// The request group is contained in the returned care plan and referenced from its single
    /// activity. Related artifacts of the plan are always carried as request-group extensions.
    pub fn resolve_cds_hooks_plan(
        &self,
        context: &EvaluationContext<'_>,
        plan: &PlanDefinition,
        subject_id: &str,
    ) -> CdsResult<CarePlan> {
        let extensions: Vec<Extension> = plan
            .related_artifact
            .iter()
            .map(|artifact| self.link_extension(artifact))
            .collect();

        let request = ApplyRequest::new(subject_id);
        let resolved = self.resolve_hooks_actions(context, plan, &plan.action, &request)?;

        let mut actions = Vec::with_capacity(resolved.len());
        let mut contained = Vec::new();
        for ResolvedAction { action, resource } in resolved {
            actions.push(action);
            contained.extend(resource);
        }

        let request_group_id = Uuid::new_v4().to_string();
        let request_group = RequestGroupBuilder::new()
            .id(request_group_id.clone())
            .status(STATUS_DRAFT)
            .intent(INTENT_PROPOSAL)
            .subject(Reference::typed("Patient", subject_id))
            .extensions(extensions)
            .contained(contained)
            .actions(actions)
            .build();

        let mut builder = CarePlanBuilder::new();
        if let Some(id) = plan.id() {
            builder = builder.instantiates_canonical(id);
        }
        Ok(builder
            .subject(Reference::typed("Patient", subject_id))
            .status(STATUS_DRAFT)
            .intent(INTENT_PROPOSAL)
            .contained(Resource::from(request_group))
            .activity(Reference::contained(&request_group_id))
            .build())
    }

    fn link_extension(&self, artifact: &RelatedArtifact) -> Extension {
        Extension::attachment(
            self.cfg.link_extension_url(),
            Attachment {
                title: artifact.display.clone(),
                url: artifact.url.clone(),
                extension: artifact.extension.clone(),
                ..Default::default()
            },
        )
    }

    fn resolve_hooks_actions(
        &self,
        context: &EvaluationContext<'_>,
        plan: &PlanDefinition,
        actions: &[PlanAction],
        request: &ApplyRequest,
    ) -> CdsResult<Vec<ResolvedAction>> {
        let mut resolved = Vec::new();

        for action in actions {
            if self.hooks_conditions_met(context, action)? == Gate::Skipped {
                continue;
            }

            let mut builder = RequestGroupActionBuilder::new();
            builder
                .title(action.title.clone())
                .description(action.description.clone())
                .prefix(action.prefix.clone())
                .kind(action.kind.clone());
            if let Some(documentation) = action.documentation.first() {
                builder.documentation(RelatedArtifact {
                    kind: documentation.kind.clone(),
                    display: documentation.display.clone(),
                    url: documentation.url.clone(),
                    document: documentation.document.as_ref().map(|d| Attachment {
                        url: d.url.clone(),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }

            let resource = match action.definition_canonical.as_deref() {
                Some(reference) => {
                    self.resolve_hooks_definition(plan, reference, request, &mut builder)?
                }
                None => None,
            };

            for dynamic_value in &action.dynamic_value {
                let Some(text) = dynamic_value.expression.as_ref().and_then(Expression::text) else {
                    continue;
                };
                let path = dynamic_value.path.as_deref().unwrap_or_default();
                let value = self.evaluator.evaluate(context, text)?;
                DocumentTarget::RequestGroupAction(&mut builder).set(
                    path,
                    value,
                    self.cfg.link_extension_url(),
                )?;
            }

            if builder.is_empty() {
                tracing::debug!("dropping empty action {}", describe(action));
            } else {
                resolved.push(ResolvedAction {
                    action: builder.build(),
                    resource,
                });
            }

            resolved.extend(self.resolve_hooks_actions(context, plan, &action.action, request)?);
        }

        Ok(resolved)
    }

    fn hooks_conditions_met(
        &self,
        context: &EvaluationContext<'_>,
        action: &PlanAction,
    ) -> CdsResult<Gate> {
        for condition in action.applicability_conditions() {
            let Some(expression) = condition.expression.as_ref() else {
                tracing::debug!("skipping condition without expression on {}", describe(action));
                continue;
            };
            if !self.speaks_language(expression) {
                continue;
            }
            let Some(text) = expression.text() else {
                continue;
            };
            if self.gate(context, action, text)? == Gate::Skipped {
                return Ok(Gate::Skipped);
            }
        }
        Ok(Gate::Applies)
    }

    fn resolve_hooks_definition(
        &self,
        plan: &PlanDefinition,
        reference: &str,
        request: &ApplyRequest,
        builder: &mut RequestGroupActionBuilder,
    ) -> CdsResult<Option<Resource>> {
        let outcome = match parse_definition(reference)? {
            Err(err) => Err(err),
            Ok(canonical) if canonical.is_contained() => {
                let contained = find_contained(plan, &canonical)?;
                self.apply_contained(contained, request)
            }
            Ok(canonical) if canonical.refers_to("ActivityDefinition") => {
                match self.store.read_activity_definition(canonical.id()) {
                    Ok(definition) => {
                        if let Some(description) = &definition.description {
                            builder.description(Some(description.clone()));
                        }
                        self.applier.resolve(&definition, request)
                    }
                    Err(err) if err.is_not_found() => match &self.remote {
                        Some(remote) => remote.apply_remote(canonical.id(), request),
                        None => Err(err),
                    },
                    Err(err) => Err(err),
                }
            }
            Ok(canonical) => self.applier.apply(canonical.id(), request),
        };

        match outcome {
            Ok(mut resource) => {
                let id = Uuid::new_v4().to_string();
                resource.set_id(id.clone());
                builder.resource(Reference::contained(&id));
                Ok(Some(resource))
            }
            Err(err) => {
                tracing::error!(
                    "ERROR: ActivityDefinition {} could not be applied and threw exception {}",
                    reference,
                    err
                );
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Shared helpers
    // ========================================================================

    fn speaks_language(&self, expression: &Expression) -> bool {
        match expression.language.as_deref() {
            Some(language) if language != self.cfg.expression_language() => {
                tracing::warn!(
                    "An action language other than {} was found: {}",
                    self.cfg.expression_language(),
                    language
                );
                false
            }
            _ => true,
        }
    }

    fn gate(
        &self,
        context: &EvaluationContext<'_>,
        action: &PlanAction,
        expression: &str,
    ) -> CdsResult<Gate> {
        match self.evaluator.evaluate(context, expression)? {
            Value::Boolean(true) => Ok(Gate::Applies),
            Value::Boolean(false) => {
                tracing::info!("{} does not apply", describe(action));
                Ok(Gate::Skipped)
            }
            Value::Null => {
                tracing::warn!(
                    "Expression {} returned null for {}; action does not apply",
                    expression,
                    describe(action)
                );
                Ok(Gate::Skipped)
            }
            other => {
                tracing::warn!(
                    "The condition expression {} returned a non-boolean value ({}); continuing",
                    expression,
                    other.type_name()
                );
                Ok(Gate::Applies)
            }
        }
    }

    fn apply_contained(&self, contained: &Resource, request: &ApplyRequest) -> CdsResult<Resource> {
        match contained {
            Resource::ActivityDefinition(definition) => self.applier.resolve(definition, request),
            other => Err(CdsError::NotImplemented(format!(
                "applying contained {} definitions",
                other.resource_type()
            ))),
        }
    }
}

fn required(label: &str, value: &str) -> CdsResult<NonEmptyText> {
    NonEmptyText::new(value).map_err(|_| CdsError::InvalidArgument(format!("{label} is required")))
}

/// Nested plans abort the call. An unreadable reference is handed back as the inner error
/// so the action is logged and skipped like any other failed definition.
fn parse_definition(reference: &str) -> CdsResult<CdsResult<Canonical>> {
    match Canonical::parse(reference) {
        Ok(canonical) if canonical.refers_to("PlanDefinition") => Err(CdsError::NotImplemented(
            format!("Plan Definition refers to sub Plan Definition {reference}"),
        )),
        Ok(canonical) => Ok(Ok(canonical)),
        Err(err) => Ok(Err(err.into())),
    }
}

fn find_contained<'p>(plan: &'p PlanDefinition, canonical: &Canonical) -> CdsResult<&'p Resource> {
    plan.find_contained(canonical.id())
        .ok_or_else(|| CdsError::ContainedNotFound {
            resource_type: "PlanDefinition".into(),
            id: canonical.id().to_string(),
        })
}

fn describe(action: &PlanAction) -> String {
    match action.title.as_deref().or(action.prefix.as_deref()) {
        Some(label) => format!("action '{label}'"),
        None => "untitled action".to_string(),
    }
}
