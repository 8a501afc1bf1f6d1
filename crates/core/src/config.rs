//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and passed into core services as
//! `Arc<CoreConfig>`. Services never read process-wide environment variables while evaluating
//! a plan; binaries call the `*_from_env_value` helpers below and build a `CoreConfig`.

use crate::constants::{
    DEFAULT_EXPRESSION_LANGUAGE, DEFAULT_LINK_EXTENSION_URL, DEFAULT_PLAN_DIR,
    LATEST_FHIR_VERSION,
};
use crate::{CdsError, CdsResult};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

/// FHIR model versions a library may declare in its `using FHIR version '...'` line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FhirVersion {
    Dstu2,
    Stu3,
    R4,
}

impl FhirVersion {
    /// Library `using` versions accepted for this model release.
    pub fn accepted_versions(self) -> &'static [&'static str] {
        match self {
            FhirVersion::Dstu2 => &["1.0.2"],
            FhirVersion::Stu3 => &["3.0.0", "3.0.1"],
            FhirVersion::R4 => &["4.0.0", "4.0.1"],
        }
    }

    pub fn accepts(self, version: &str) -> bool {
        self.accepted_versions().contains(&version.trim())
    }
}

impl fmt::Display for FhirVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FhirVersion::Dstu2 => "DSTU2",
            FhirVersion::Stu3 => "STU3",
            FhirVersion::R4 => "R4",
        };
        f.write_str(name)
    }
}

impl FromStr for FhirVersion {
    type Err = CdsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DSTU2" | "1.0.2" => Ok(FhirVersion::Dstu2),
            "STU3" | "3.0.0" | "3.0.1" => Ok(FhirVersion::Stu3),
            "R4" | "4.0.0" | "4.0.1" => Ok(FhirVersion::R4),
            other => Err(CdsError::InvalidArgument(format!(
                "unsupported FHIR version: {other}"
            ))),
        }
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    plan_dir: PathBuf,
    fhir_version: FhirVersion,
    server_base: Option<Url>,
    link_extension_url: String,
    expression_language: String,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    pub fn new(
        plan_dir: PathBuf,
        fhir_version: FhirVersion,
        server_base: Option<Url>,
        link_extension_url: String,
        expression_language: String,
    ) -> CdsResult<Self> {
        if link_extension_url.trim().is_empty() {
            return Err(CdsError::InvalidArgument(
                "link_extension_url cannot be empty".into(),
            ));
        }
        if expression_language.trim().is_empty() {
            return Err(CdsError::InvalidArgument(
                "expression_language cannot be empty".into(),
            ));
        }

        Ok(Self {
            plan_dir,
            fhir_version,
            server_base,
            link_extension_url,
            expression_language,
        })
    }

    pub fn plan_dir(&self) -> &Path {
        &self.plan_dir
    }

    pub fn fhir_version(&self) -> FhirVersion {
        self.fhir_version
    }

    /// Base URL of the FHIR server used for remote `$apply`, when one is configured.
    pub fn server_base(&self) -> Option<&Url> {
        self.server_base.as_ref()
    }

    pub fn link_extension_url(&self) -> &str {
        &self.link_extension_url
    }

    pub fn expression_language(&self) -> &str {
        &self.expression_language
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse the plan directory; falls back to [`DEFAULT_PLAN_DIR`].
pub fn plan_dir_from_env_value(value: Option<String>) -> PathBuf {
    PathBuf::from(non_blank(value).unwrap_or_else(|| DEFAULT_PLAN_DIR.to_string()))
}

/// Parse the FHIR model version from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the latest supported version.
pub fn fhir_version_from_env_value(value: Option<String>) -> CdsResult<FhirVersion> {
    let parsed = non_blank(value)
        .map(|v| v.parse::<FhirVersion>())
        .transpose()?;

    Ok(parsed.unwrap_or(LATEST_FHIR_VERSION))
}

/// Parse the remote FHIR server base URL. A missing value disables remote `$apply`.
pub fn server_base_from_env_value(value: Option<String>) -> CdsResult<Option<Url>> {
    non_blank(value)
        .map(|v| {
            Url::parse(&v)
                .map_err(|e| CdsError::InvalidArgument(format!("invalid server base {v}: {e}")))
        })
        .transpose()
}

pub fn link_extension_url_from_env_value(value: Option<String>) -> String {
    non_blank(value).unwrap_or_else(|| DEFAULT_LINK_EXTENSION_URL.to_string())
}

pub fn expression_language_from_env_value(value: Option<String>) -> String {
    non_blank(value).unwrap_or_else(|| DEFAULT_EXPRESSION_LANGUAGE.to_string())
}
