use crate::evaluation::EvaluationError;

#[derive(Debug, thiserror::Error)]
pub enum CdsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{resource_type}/{id} not found")]
    NotFound { resource_type: String, id: String },

    #[error("contained resource #{id} not found in {resource_type}")]
    ContainedNotFound { resource_type: String, id: String },

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("missing condition expression: {0}")]
    MissingConditionExpression(String),

    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("library error: {0}")]
    Library(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("unsupported path: {0}")]
    UnsupportedPath(String),

    #[error("remote apply failed: {0}")]
    Remote(String),

    #[error("invalid reference: {0}")]
    InvalidReference(#[from] cds_types::TextError),

    #[error("FHIR error: {0}")]
    Fhir(#[from] fhir::FhirError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CdsError {
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        CdsError::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CdsError::NotFound { .. })
    }
}

pub type CdsResult<T> = std::result::Result<T, CdsError>;
