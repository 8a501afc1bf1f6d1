//! Output document builders and the dynamic-value field table.
//!
//! Dynamic values name a field of the document being built by a short path. Only a closed set
//! of paths is writable, per document kind:
//!
//! | Target | Path | Accepts |
//! |--------|------|---------|
//! | care plan | `title`, `description` | String |
//! | care plan | `created`, `period.start`, `period.end` | DateTime |
//! | care plan | `extension` | String, Boolean, Integer, DateTime |
//! | care plan | `$this` | a CarePlan resource (replaces the document) |
//! | request-group action | `…title`, `…description`, `…extension` | String |
//!
//! `Null` clears the field. Any other path is rejected with [`CdsError::UnsupportedPath`].

mod care_plan;
mod request_group;

pub use care_plan::CarePlanBuilder;
pub use request_group::{RequestGroupActionBuilder, RequestGroupBuilder};

use crate::constants::THIS_PATH;
use crate::evaluation::Value;
use crate::{CdsError, CdsResult};
use chrono::{DateTime, FixedOffset};
use fhir::{Extension, Resource};

/// A writable field of an output document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentField {
    Title,
    Description,
    Created,
    PeriodStart,
    PeriodEnd,
    Extension,
    This,
}

/// The document a dynamic value writes into.
#[derive(Debug)]
pub enum DocumentTarget<'a> {
    CarePlan(&'a mut CarePlanBuilder),
    RequestGroupAction(&'a mut RequestGroupActionBuilder),
}

impl DocumentTarget<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentTarget::CarePlan(_) => "CarePlan",
            DocumentTarget::RequestGroupAction(_) => "RequestGroup.action",
        }
    }

    /// Look `path` up in this target's field table.
    pub fn field(&self, path: &str) -> CdsResult<DocumentField> {
        let path = path.trim();
        let field = match self {
            DocumentTarget::CarePlan(_) => {
                let path = path.strip_prefix("CarePlan.").unwrap_or(path);
                match path {
                    "title" => Some(DocumentField::Title),
                    "description" => Some(DocumentField::Description),
                    "created" => Some(DocumentField::Created),
                    "period.start" => Some(DocumentField::PeriodStart),
                    "period.end" => Some(DocumentField::PeriodEnd),
                    "extension" => Some(DocumentField::Extension),
                    THIS_PATH => Some(DocumentField::This),
                    _ => None,
                }
            }
            DocumentTarget::RequestGroupAction(_) => {
                if path == THIS_PATH {
                    None
                } else if path.ends_with("title") {
                    Some(DocumentField::Title)
                } else if path.ends_with("description") {
                    Some(DocumentField::Description)
                } else if path.ends_with("extension") {
                    Some(DocumentField::Extension)
                } else {
                    None
                }
            }
        };
        field.ok_or_else(|| CdsError::UnsupportedPath(format!("{} on {}", path, self.kind())))
    }

    /// Write `value` into the field named by `path`.
    ///
    /// Extensions are created with `extension_url` as their url.
    pub fn set(&mut self, path: &str, value: Value, extension_url: &str) -> CdsResult<()> {
        let field = self.field(path)?;

        if field == DocumentField::This {
            return match (self, value) {
                (DocumentTarget::CarePlan(builder), Value::Resource(resource)) => {
                    match *resource {
                        Resource::CarePlan(care_plan) => {
                            builder.replace(care_plan);
                            Ok(())
                        }
                        other => Err(CdsError::TypeMismatch(format!(
                            "{THIS_PATH} requires a CarePlan, got {}",
                            other.resource_type()
                        ))),
                    }
                }
                (_, value) => Err(CdsError::TypeMismatch(format!(
                    "{THIS_PATH} requires a CarePlan, got {}",
                    value.type_name()
                ))),
            };
        }

        let primitive = Primitive::coerce(path, value)?;
        match self {
            DocumentTarget::CarePlan(builder) => match field {
                DocumentField::Title => builder.set_title(primitive.into_text(path)?),
                DocumentField::Description => builder.set_description(primitive.into_text(path)?),
                DocumentField::Created => builder.set_created(primitive.into_date_time(path)?),
                DocumentField::PeriodStart => {
                    builder.set_period_start(primitive.into_date_time(path)?)
                }
                DocumentField::PeriodEnd => builder.set_period_end(primitive.into_date_time(path)?),
                DocumentField::Extension => match primitive.into_extension(extension_url) {
                    Some(extension) => builder.push_extension(extension),
                    None => builder.clear_extensions(),
                },
                DocumentField::This => {}
            },
            DocumentTarget::RequestGroupAction(builder) => match field {
                DocumentField::Title => {
                    builder.title(primitive.into_text(path)?);
                }
                DocumentField::Description => {
                    builder.description(primitive.into_text(path)?);
                }
                DocumentField::Extension => match primitive.into_text(path)? {
                    Some(text) => {
                        builder.extension(Extension::string(extension_url, text));
                    }
                    None => {
                        builder.clear_extensions();
                    }
                },
                _ => {
                    return Err(CdsError::UnsupportedPath(format!(
                        "{path} on RequestGroup.action"
                    )))
                }
            },
        }
        Ok(())
    }
}

/// Evaluator results narrowed to what document fields can hold.
#[derive(Clone, Debug, PartialEq)]
enum Primitive {
    Null,
    String(String),
    DateTime(DateTime<FixedOffset>),
    Boolean(bool),
    Integer(i64),
}

impl Primitive {
    fn coerce(path: &str, value: Value) -> CdsResult<Self> {
        match value {
            Value::Null => Ok(Primitive::Null),
            Value::String(s) => Ok(Primitive::String(s)),
            Value::DateTime(dt) => Ok(Primitive::DateTime(dt)),
            Value::Boolean(b) => Ok(Primitive::Boolean(b)),
            Value::Integer(i) => Ok(Primitive::Integer(i)),
            other @ (Value::Code(_)
            | Value::Interval(_)
            | Value::List(_)
            | Value::Tuple(_)
            | Value::Resource(_)
            | Value::Other(_)) => Err(CdsError::TypeMismatch(format!(
                "cannot write {} to {path}",
                other.type_name()
            ))),
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Primitive::Null => "Null",
            Primitive::String(_) => "String",
            Primitive::DateTime(_) => "DateTime",
            Primitive::Boolean(_) => "Boolean",
            Primitive::Integer(_) => "Integer",
        }
    }

    fn into_text(self, path: &str) -> CdsResult<Option<String>> {
        match self {
            Primitive::Null => Ok(None),
            Primitive::String(s) => Ok(Some(s)),
            other => Err(CdsError::TypeMismatch(format!(
                "{path} expects a String, got {}",
                other.type_name()
            ))),
        }
    }

    fn into_date_time(self, path: &str) -> CdsResult<Option<DateTime<FixedOffset>>> {
        match self {
            Primitive::Null => Ok(None),
            Primitive::DateTime(dt) => Ok(Some(dt)),
            other => Err(CdsError::TypeMismatch(format!(
                "{path} expects a DateTime, got {}",
                other.type_name()
            ))),
        }
    }

    fn into_extension(self, url: &str) -> Option<Extension> {
        match self {
            Primitive::Null => None,
            Primitive::String(s) => Some(Extension::string(url, s)),
            Primitive::DateTime(dt) => Some(Extension::date_time(url, dt)),
            Primitive::Boolean(b) => Some(Extension::boolean(url, b)),
            Primitive::Integer(i) => Some(Extension::integer(url, i)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir::CarePlan;

    const URL: &str = "http://example.org";

    #[test]
    fn writes_text_fields_on_care_plan() {
        let mut builder = CarePlanBuilder::new();
        let mut target = DocumentTarget::CarePlan(&mut builder);

        target
            .set("title", Value::String("Hello".into()), URL)
            .expect("title should be writable");
        target
            .set("CarePlan.description", Value::String("World".into()), URL)
            .expect("description should be writable");

        let care_plan = builder.build();
        assert_eq!(care_plan.title.as_deref(), Some("Hello"));
        assert_eq!(care_plan.description.as_deref(), Some("World"));
    }

    #[test]
    fn coerces_date_time_into_created_and_period() {
        let when = DateTime::parse_from_rfc3339("2024-06-01T08:00:00+02:00").expect("valid");
        let mut builder = CarePlanBuilder::new();
        let mut target = DocumentTarget::CarePlan(&mut builder);

        target
            .set("created", Value::DateTime(when), URL)
            .expect("created should be writable");
        target
            .set("period.end", Value::DateTime(when), URL)
            .expect("period.end should be writable");

        let care_plan = builder.build();
        assert_eq!(care_plan.created, Some(when));
        assert_eq!(care_plan.period.and_then(|p| p.end), Some(when));
    }

    #[test]
    fn null_clears_field() {
        let mut builder = CarePlanBuilder::new().title("Old");
        DocumentTarget::CarePlan(&mut builder)
            .set("title", Value::Null, URL)
            .expect("null should clear");
        assert_eq!(builder.build().title, None);
    }

    #[test]
    fn rejects_unknown_paths() {
        let mut builder = CarePlanBuilder::new();
        let err = DocumentTarget::CarePlan(&mut builder)
            .set("activity.detail", Value::String("x".into()), URL)
            .expect_err("should fail");
        match err {
            CdsError::UnsupportedPath(msg) => assert!(msg.contains("activity.detail")),
            other => panic!("Expected UnsupportedPath, got {other:?}"),
        }

        let mut action = RequestGroupActionBuilder::new();
        let err = DocumentTarget::RequestGroupAction(&mut action)
            .set(THIS_PATH, Value::Null, URL)
            .expect_err("should fail");
        assert!(matches!(err, CdsError::UnsupportedPath(_)));
    }

    #[test]
    fn rejects_values_the_field_cannot_hold() {
        let mut builder = CarePlanBuilder::new();
        let mut target = DocumentTarget::CarePlan(&mut builder);

        let err = target
            .set("created", Value::String("yesterday".into()), URL)
            .expect_err("should fail");
        assert!(matches!(err, CdsError::TypeMismatch(_)));

        let err = target
            .set("title", Value::List(vec![]), URL)
            .expect_err("should fail");
        assert!(matches!(err, CdsError::TypeMismatch(_)));
    }

    #[test]
    fn this_replaces_document() {
        let mut builder = CarePlanBuilder::new().title("before");
        let replacement = CarePlan {
            id: Some("replacement".into()),
            ..Default::default()
        };

        DocumentTarget::CarePlan(&mut builder)
            .set(THIS_PATH, Value::from(Resource::from(replacement)), URL)
            .expect("$this should accept a CarePlan");

        let care_plan = builder.build();
        assert_eq!(care_plan.id.as_deref(), Some("replacement"));
        assert_eq!(care_plan.title, None);
    }

    #[test]
    fn this_requires_care_plan() {
        let mut builder = CarePlanBuilder::new();
        let err = DocumentTarget::CarePlan(&mut builder)
            .set(THIS_PATH, Value::String("nope".into()), URL)
            .expect_err("should fail");
        assert!(matches!(err, CdsError::TypeMismatch(_)));
    }

    #[test]
    fn request_group_action_uses_path_suffixes() {
        let mut action = RequestGroupActionBuilder::new();
        let mut target = DocumentTarget::RequestGroupAction(&mut action);

        target
            .set("action.title", Value::String("Consider naloxone".into()), URL)
            .expect("title");
        target
            .set("action.extension", Value::String("warning".into()), URL)
            .expect("extension");

        let built = action.build();
        assert_eq!(built.title.as_deref(), Some("Consider naloxone"));
        assert_eq!(built.extension.len(), 1);
        assert_eq!(built.extension[0].url, URL);
        assert_eq!(built.extension[0].value_string.as_deref(), Some("warning"));
    }

    #[test]
    fn care_plan_extension_accepts_primitives() {
        let mut builder = CarePlanBuilder::new();
        let mut target = DocumentTarget::CarePlan(&mut builder);
        target
            .set("extension", Value::Boolean(true), URL)
            .expect("boolean extension");
        target
            .set("extension", Value::Integer(3), URL)
            .expect("integer extension");

        let care_plan = builder.build();
        assert_eq!(care_plan.extension.len(), 2);
        assert_eq!(care_plan.extension[0].value_boolean, Some(true));
        assert_eq!(care_plan.extension[1].value_integer, Some(3));
    }
}
