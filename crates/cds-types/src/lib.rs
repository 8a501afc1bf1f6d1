//! Validated primitives shared across the CDS crates.
//!
//! - [`NonEmptyText`]: trimmed text that is guaranteed to hold at least one character
//! - [`Canonical`]: a parsed canonical/relative/contained reference such as
//!   `http://example.org/fhir/ActivityDefinition/flu-shot|1.0.0` or `#contained-id`

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("Text cannot be empty")]
    Empty,
    /// The reference did not end in a resource id
    #[error("Reference has no id segment: {0}")]
    MissingId(String),
}

/// A string type that guarantees non-empty content.
///
/// This type wraps a `String` and ensures it contains at least one non-whitespace character.
/// The input is automatically trimmed of leading and trailing whitespace during construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NonEmptyText(String);

impl NonEmptyText {
    /// Creates a new `NonEmptyText` from the given input.
    ///
    /// # Returns
    ///
    /// Returns `Ok(NonEmptyText)` if the trimmed input is non-empty,
    /// or `Err(TextError::Empty)` if it's empty or contains only whitespace.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for NonEmptyText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for NonEmptyText {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for NonEmptyText {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for NonEmptyText {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NonEmptyText::new(&s).map_err(serde::de::Error::custom)
    }
}

/// A parsed reference to another resource.
///
/// Three shapes are accepted:
/// - contained fragments: `#med-1`
/// - relative references: `ActivityDefinition/med-1`
/// - canonical URLs, optionally versioned: `http://example.org/ActivityDefinition/med-1|2.0`
///
/// The resource type is only recognised when the segment before the id starts with an
/// uppercase ASCII letter, which is how FHIR resource type names are spelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canonical {
    raw: String,
    resource_type: Option<String>,
    id: String,
    version: Option<String>,
    contained: bool,
}

impl Canonical {
    /// Parses a reference string. A trailing `_history/<vid>` is read as the version.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] for blank input and [`TextError::MissingId`] when the
    /// reference has no usable id segment (for example `#` or `http://example.org/`).
    pub fn parse(input: impl AsRef<str>) -> Result<Self, TextError> {
        let raw = NonEmptyText::new(input)?.into_inner();

        if let Some(fragment) = raw.strip_prefix('#') {
            if fragment.is_empty() {
                return Err(TextError::MissingId(raw));
            }
            return Ok(Self {
                id: fragment.to_owned(),
                raw,
                resource_type: None,
                version: None,
                contained: true,
            });
        }

        let (path, mut version) = match raw.split_once('|') {
            Some((path, version)) if !version.is_empty() => (path, Some(version.to_owned())),
            Some((path, _)) => (path, None),
            None => (raw.as_str(), None),
        };

        let mut segments = path.rsplit('/').filter(|s| !s.is_empty()).peekable();
        if let Some(vid) = segments.next_if(|_| path.contains("/_history/")) {
            if segments.next_if_eq(&"_history").is_none() {
                return Err(TextError::MissingId(raw.clone()));
            }
            version.get_or_insert_with(|| vid.to_owned());
        }
        let id = segments
            .next()
            .filter(|s| !s.contains(':'))
            .ok_or_else(|| TextError::MissingId(raw.clone()))?
            .to_owned();
        let resource_type = segments
            .next()
            .filter(|s| s.starts_with(|c: char| c.is_ascii_uppercase()))
            .map(str::to_owned);

        Ok(Self {
            raw,
            resource_type,
            id,
            version,
            contained: false,
        })
    }

    /// The reference exactly as supplied (trimmed).
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// True for `#id` references into the owning resource's `contained` list.
    pub fn is_contained(&self) -> bool {
        self.contained
    }

    /// True when the reference names `resource_type` as its target type.
    pub fn refers_to(&self, resource_type: &str) -> bool {
        self.resource_type.as_deref() == Some(resource_type)
    }
}

impl std::fmt::Display for Canonical {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_text_trims_input() {
        let text = NonEmptyText::new("  patient-1 ").expect("valid text");
        assert_eq!(text.as_str(), "patient-1");
    }

    #[test]
    fn non_empty_text_rejects_whitespace() {
        assert_eq!(NonEmptyText::new("   "), Err(TextError::Empty));
    }

    #[test]
    fn parses_versioned_canonical_url() {
        let canonical =
            Canonical::parse("http://example.org/fhir/ActivityDefinition/flu-shot|1.0.0")
                .expect("valid canonical");
        assert_eq!(canonical.id(), "flu-shot");
        assert_eq!(canonical.resource_type(), Some("ActivityDefinition"));
        assert_eq!(canonical.version(), Some("1.0.0"));
        assert!(!canonical.is_contained());
        assert!(canonical.refers_to("ActivityDefinition"));
    }

    #[test]
    fn parses_version_specific_reference() {
        let canonical = Canonical::parse("ActivityDefinition/flu-shot/_history/2")
            .expect("valid reference");
        assert_eq!(canonical.id(), "flu-shot");
        assert_eq!(canonical.resource_type(), Some("ActivityDefinition"));
        assert_eq!(canonical.version(), Some("2"));
    }

    #[test]
    fn version_specific_plan_reference_keeps_its_type() {
        let canonical = Canonical::parse("http://example.org/fhir/PlanDefinition/inner/_history/1")
            .expect("valid reference");
        assert_eq!(canonical.id(), "inner");
        assert!(canonical.refers_to("PlanDefinition"));
        assert_eq!(canonical.version(), Some("1"));
    }

    #[test]
    fn rejects_urn_reference() {
        let err = Canonical::parse("urn:uuid:0f4c1b2e-1111-2222-3333-444455556666")
            .expect_err("urn has no id segment");
        match err {
            TextError::MissingId(raw) => assert!(raw.starts_with("urn:uuid:")),
            other => panic!("Expected MissingId, got {other:?}"),
        }
    }

    #[test]
    fn parses_relative_reference() {
        let canonical = Canonical::parse("PlanDefinition/opioid-1").expect("valid reference");
        assert_eq!(canonical.id(), "opioid-1");
        assert!(canonical.refers_to("PlanDefinition"));
        assert_eq!(canonical.version(), None);
    }

    #[test]
    fn parses_contained_fragment() {
        let canonical = Canonical::parse("#ad-1").expect("valid fragment");
        assert!(canonical.is_contained());
        assert_eq!(canonical.id(), "ad-1");
        assert_eq!(canonical.resource_type(), None);
    }

    #[test]
    fn bare_id_has_no_resource_type() {
        let canonical = Canonical::parse("library-1").expect("valid id");
        assert_eq!(canonical.id(), "library-1");
        assert_eq!(canonical.resource_type(), None);
    }

    #[test]
    fn rejects_references_without_id() {
        assert_eq!(
            Canonical::parse("#"),
            Err(TextError::MissingId("#".to_string()))
        );
        assert!(matches!(
            Canonical::parse("http://"),
            Err(TextError::MissingId(_))
        ));
        assert_eq!(Canonical::parse(""), Err(TextError::Empty));
    }
}
