//! Evaluation capabilities consumed by the engine.
//!
//! The engine never interprets expressions itself. It hands expression text and an
//! [`EvaluationContext`] to an [`ExpressionEvaluator`] and receives a typed [`Value`].
//! Data access during evaluation goes through a [`DataProvider`]; value set expansion
//! through a [`TerminologyProvider`]; library loading through a [`LibraryResolver`].
//!
//! Two small implementations ship with the crate: [`LiteralEvaluator`] and
//! [`StoreLibraryResolver`]. Neither is a full expression-language engine.

pub mod library;
pub mod literal;

pub use library::{parse_library_source, StoreLibraryResolver};
pub use literal::LiteralEvaluator;

use crate::CdsResult;
use cds_types::Canonical;
use chrono::{DateTime, FixedOffset};
use fhir::PlanDefinition;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Values
// ============================================================================

/// Result of evaluating an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Code(Code),
    Interval(Interval),
    List(Vec<Value>),
    Tuple(BTreeMap<String, Value>),
    Resource(Box<fhir::Resource>),
    /// A value of a type the engine does not model, kept as raw JSON.
    Other(serde_json::Value),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::String(_) => "String",
            Value::DateTime(_) => "DateTime",
            Value::Code(_) => "Code",
            Value::Interval(_) => "Interval",
            Value::List(_) => "List",
            Value::Tuple(_) => "Tuple",
            Value::Resource(_) => "Resource",
            Value::Other(_) => "Any",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<fhir::Resource> for Value {
    fn from(value: fhir::Resource) -> Self {
        Value::Resource(Box::new(value))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Code {
    pub system: Option<String>,
    pub code: String,
    pub display: Option<String>,
}

impl Code {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: code.into(),
            display: None,
        }
    }
}

/// An interval with optional bounds. A missing bound is unbounded on that side.
#[derive(Clone, Debug, PartialEq)]
pub struct Interval {
    pub low: Option<Box<Value>>,
    pub high: Option<Box<Value>>,
    pub low_closed: bool,
    pub high_closed: bool,
}

impl Interval {
    /// `[null, null]`: unbounded on both sides, both sides closed.
    pub fn unbounded() -> Self {
        Self {
            low: None,
            high: None,
            low_closed: true,
            high_closed: true,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("could not resolve expression: {0}")]
    UnknownExpression(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("retrieve failed: {0}")]
    Retrieve(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Failed(String),
}

// ============================================================================
// Capability traits
// ============================================================================

/// Evaluates expression text against a bound context.
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(
        &self,
        context: &EvaluationContext<'_>,
        expression: &str,
    ) -> Result<Value, EvaluationError>;
}

/// Supplies clinical data to retrieve expressions.
pub trait DataProvider: Send + Sync {
    fn retrieve(&self, request: &RetrieveRequest) -> Result<Vec<Value>, EvaluationError>;
}

/// Expands value sets into their member codes.
pub trait TerminologyProvider: Send + Sync {
    fn expand(&self, value_set: &str) -> Result<Vec<Code>, EvaluationError>;
}

/// Loads and compiles the expression libraries a plan references.
pub trait LibraryResolver: Send + Sync {
    /// Resolve one library reference of `plan`.
    fn resolve(&self, plan: &PlanDefinition, reference: &Canonical) -> CdsResult<CompiledLibrary>;

    /// Resolve the plan's first library. Plans without libraries yield `Ok(None)`.
    fn resolve_primary(&self, plan: &PlanDefinition) -> CdsResult<Option<CompiledLibrary>> {
        let Some(reference) = plan.primary_library() else {
            return Ok(None);
        };
        let reference = Canonical::parse(reference)?;
        self.resolve(plan, &reference).map(Some)
    }
}

/// A data request issued by a retrieve expression.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetrieveRequest {
    /// Evaluation context type, e.g. `Patient`.
    pub context: Option<String>,
    /// Element on the retrieved type that links it to the context.
    pub context_path: Option<String>,
    /// Value of the context, typically the subject id.
    pub context_value: Option<String>,
    pub data_type: String,
    pub template_id: Option<String>,
    pub code_path: Option<String>,
    pub codes: Vec<Code>,
    pub value_set: Option<String>,
    pub date_path: Option<String>,
    pub date_low: Option<String>,
    pub date_high: Option<String>,
}

impl RetrieveRequest {
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Compiled libraries
// ============================================================================

/// Evaluator-facing view of an expression library.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledLibrary {
    pub name: String,
    pub version: Option<String>,
    pub usings: Vec<UsingDef>,
    pub parameters: Vec<ParameterDef>,
    pub statements: Vec<ExpressionDef>,
}

impl CompiledLibrary {
    pub fn statement(&self, name: &str) -> Option<&ExpressionDef> {
        self.statements.iter().find(|s| s.name == name)
    }

    /// Version declared for `model` in a `using` line.
    pub fn using_version(&self, model: &str) -> Option<&str> {
        self.usings
            .iter()
            .find(|u| u.model == model)
            .and_then(|u| u.version.as_deref())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsingDef {
    pub model: String,
    pub version: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterDef {
    pub name: String,
    pub type_specifier: TypeSpecifier,
}

/// Shape of a declared parameter type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeSpecifier {
    List(String),
    Interval(String),
    Tuple,
    Named(String),
}

impl TypeSpecifier {
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let inner = |prefix: &str| {
            text.strip_prefix(prefix)
                .and_then(|rest| rest.strip_suffix('>'))
                .map(|inner| inner.trim().to_string())
        };
        if let Some(element) = inner("List<") {
            TypeSpecifier::List(element)
        } else if let Some(point) = inner("Interval<") {
            TypeSpecifier::Interval(point)
        } else if text.starts_with("Tuple") {
            TypeSpecifier::Tuple
        } else {
            TypeSpecifier::Named(text.to_string())
        }
    }

    /// Empty value of this shape, used when no caller value is bound.
    pub fn default_value(&self) -> Value {
        match self {
            TypeSpecifier::List(_) => Value::List(Vec::new()),
            TypeSpecifier::Interval(_) => Value::Interval(Interval::unbounded()),
            TypeSpecifier::Tuple => Value::Tuple(BTreeMap::new()),
            TypeSpecifier::Named(_) => Value::Other(serde_json::json!({})),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpressionDef {
    pub name: String,
    pub expression: String,
}

// ============================================================================
// Evaluation context
// ============================================================================

static NO_PARAMETERS: BTreeMap<String, Value> = BTreeMap::new();

/// Everything an expression is evaluated against.
#[derive(Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub library: Option<&'a CompiledLibrary>,
    pub subject_id: &'a str,
    pub parameters: &'a BTreeMap<String, Value>,
    pub data_provider: Option<&'a dyn DataProvider>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(subject_id: &'a str) -> Self {
        Self {
            library: None,
            subject_id,
            parameters: &NO_PARAMETERS,
            data_provider: None,
        }
    }

    pub fn with_library(mut self, library: Option<&'a CompiledLibrary>) -> Self {
        self.library = library;
        self
    }

    pub fn with_parameters(mut self, parameters: &'a BTreeMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_data_provider(mut self, provider: Option<&'a dyn DataProvider>) -> Self {
        self.data_provider = provider;
        self
    }
}

impl fmt::Debug for EvaluationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("library", &self.library.map(|l| l.name.as_str()))
            .field("subject_id", &self.subject_id)
            .field("parameters", &self.parameters.keys().collect::<Vec<_>>())
            .field("data_provider", &self.data_provider.is_some())
            .finish()
    }
}
