//! Stub capabilities shared by the unit tests.

use crate::activity::{ActivityApplier, RemoteApplier};
use crate::config::{CoreConfig, FhirVersion};
use crate::constants::{DEFAULT_EXPRESSION_LANGUAGE, DEFAULT_LINK_EXTENSION_URL};
use crate::evaluation::{
    EvaluationContext, EvaluationError, ExpressionEvaluator, LiteralEvaluator, Value,
};
use crate::session::ApplyRequest;
use crate::{CdsError, CdsResult};
use fhir::{ActivityDefinition, Resource};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub(crate) fn test_cfg() -> Arc<CoreConfig> {
    Arc::new(
        CoreConfig::new(
            PathBuf::from("plans"),
            FhirVersion::R4,
            None,
            DEFAULT_LINK_EXTENSION_URL.into(),
            DEFAULT_EXPRESSION_LANGUAGE.into(),
        )
        .expect("CoreConfig::new should succeed"),
    )
}

/// Literal evaluator with per-expression overrides and a call counter.
#[derive(Default)]
pub(crate) struct StubEvaluator {
    overrides: HashMap<String, Result<Value, EvaluationError>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl StubEvaluator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, expression: &str, value: Value) -> Self {
        self.overrides.insert(expression.to_string(), Ok(value));
        self
    }

    pub(crate) fn failing(mut self, expression: &str) -> Self {
        self.overrides.insert(
            expression.to_string(),
            Err(EvaluationError::Failed(format!("{expression} exploded"))),
        );
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

impl ExpressionEvaluator for StubEvaluator {
    fn evaluate(
        &self,
        context: &EvaluationContext<'_>,
        expression: &str,
    ) -> Result<Value, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(expression.to_string());
        match self.overrides.get(expression) {
            Some(result) => result.clone(),
            None => LiteralEvaluator.evaluate(context, expression),
        }
    }
}

/// Applier that records calls and fails for selected ids.
#[derive(Default)]
pub(crate) struct StubApplier {
    failing: Vec<String>,
    applied: Mutex<Vec<String>>,
}

impl StubApplier {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing_on(mut self, id: &str) -> Self {
        self.failing.push(id.to_string());
        self
    }

    pub(crate) fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    fn produce(&self, id: &str, request: &ApplyRequest) -> CdsResult<Resource> {
        self.applied.lock().push(id.to_string());
        if self.failing.iter().any(|f| f == id) {
            return Err(CdsError::not_found("ActivityDefinition", id));
        }
        Ok(Resource::Other(json!({
            "resourceType": "ServiceRequest",
            "status": "draft",
            "subject": { "reference": format!("Patient/{}", request.subject_id) },
            "instantiatesCanonical": [format!("ActivityDefinition/{id}")]
        })))
    }
}

impl ActivityApplier for StubApplier {
    fn apply(&self, id: &str, request: &ApplyRequest) -> CdsResult<Resource> {
        self.produce(id, request)
    }

    fn resolve(
        &self,
        definition: &ActivityDefinition,
        request: &ApplyRequest,
    ) -> CdsResult<Resource> {
        let id = definition.id.as_deref().unwrap_or("contained");
        self.produce(id, request)
    }
}

#[derive(Default)]
pub(crate) struct StubRemote {
    calls: Mutex<Vec<String>>,
}

impl StubRemote {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl RemoteApplier for StubRemote {
    fn apply_remote(&self, id: &str, request: &ApplyRequest) -> CdsResult<Resource> {
        self.calls.lock().push(id.to_string());
        Ok(Resource::Other(json!({
            "resourceType": "CommunicationRequest",
            "status": "draft",
            "subject": { "reference": format!("Patient/{}", request.subject_id) }
        })))
    }
}
