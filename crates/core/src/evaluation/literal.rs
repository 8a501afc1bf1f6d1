//! A minimal expression evaluator for literals, references and retrieves.
//!
//! Grammar (one expression per call, surrounding whitespace ignored):
//!
//! ```text
//! expr      := "not" expr | "exists" expr | atom
//! atom      := "true" | "false" | "null" | integer | 'string' | @dateTime
//!            | "[" Type (":" "valueSet")? "]"
//!            | "\"Name\"" | Name
//! ```
//!
//! Names resolve to a statement of the bound library (evaluated recursively) and then to a
//! bound parameter. Retrieves are forwarded to the context's data provider; without one they
//! yield an empty list.

use super::{
    EvaluationContext, EvaluationError, ExpressionEvaluator, RetrieveRequest, Value,
};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

const MAX_REFERENCE_DEPTH: usize = 32;

/// Evaluates the literal grammar described in the module docs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LiteralEvaluator;

impl LiteralEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn eval(
        &self,
        context: &EvaluationContext<'_>,
        expression: &str,
        depth: usize,
    ) -> Result<Value, EvaluationError> {
        if depth > MAX_REFERENCE_DEPTH {
            return Err(EvaluationError::Failed(format!(
                "reference depth exceeded while evaluating {expression}"
            )));
        }

        let text = expression.trim();
        if text.is_empty() {
            return Err(EvaluationError::Syntax("empty expression".into()));
        }

        if let Some(operand) = strip_keyword(text, "not") {
            return match self.eval(context, operand, depth + 1)? {
                Value::Boolean(b) => Ok(Value::Boolean(!b)),
                Value::Null => Ok(Value::Null),
                other => Err(EvaluationError::Unsupported(format!(
                    "not applied to {}",
                    other.type_name()
                ))),
            };
        }

        if let Some(operand) = strip_keyword(text, "exists") {
            let exists = match self.eval(context, operand, depth + 1)? {
                Value::Null => false,
                Value::List(items) => items.iter().any(|v| !v.is_null()),
                _ => true,
            };
            return Ok(Value::Boolean(exists));
        }

        match text {
            "true" => return Ok(Value::Boolean(true)),
            "false" => return Ok(Value::Boolean(false)),
            "null" => return Ok(Value::Null),
            _ => {}
        }

        if let Ok(integer) = text.parse::<i64>() {
            return Ok(Value::Integer(integer));
        }

        if let Some(inner) = text
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
        {
            return Ok(Value::String(inner.replace("\\'", "'")));
        }

        if let Some(literal) = text.strip_prefix('@') {
            return parse_date_time(literal).map(Value::DateTime);
        }

        if let Some(body) = text.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            return self.retrieve(context, body);
        }

        let name = match text.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            Some(quoted) => quoted,
            None if is_identifier(text) => text,
            None => return Err(EvaluationError::Syntax(text.to_string())),
        };
        self.reference(context, name, depth)
    }

    fn reference(
        &self,
        context: &EvaluationContext<'_>,
        name: &str,
        depth: usize,
    ) -> Result<Value, EvaluationError> {
        if let Some(statement) = context.library.and_then(|l| l.statement(name)) {
            return self.eval(context, &statement.expression, depth + 1);
        }
        if let Some(value) = context.parameters.get(name) {
            return Ok(value.clone());
        }
        Err(EvaluationError::UnknownExpression(name.to_string()))
    }

    fn retrieve(
        &self,
        context: &EvaluationContext<'_>,
        body: &str,
    ) -> Result<Value, EvaluationError> {
        let (data_type, value_set) = match body.split_once(':') {
            Some((data_type, value_set)) => {
                let value_set = value_set.trim().trim_matches('"').trim();
                if value_set.is_empty() {
                    return Err(EvaluationError::Syntax(format!("[{body}]")));
                }
                (data_type.trim(), Some(value_set.to_string()))
            }
            None => (body.trim(), None),
        };
        if !is_identifier(data_type) {
            return Err(EvaluationError::Syntax(format!("[{body}]")));
        }

        let Some(provider) = context.data_provider else {
            return Ok(Value::List(Vec::new()));
        };

        let request = RetrieveRequest {
            context: Some("Patient".into()),
            context_path: (data_type != "Patient").then(|| "subject".to_string()),
            context_value: Some(context.subject_id.to_string()),
            code_path: value_set.as_ref().map(|_| "code".to_string()),
            value_set,
            ..RetrieveRequest::new(data_type)
        };
        provider.retrieve(&request).map(Value::List)
    }
}

impl ExpressionEvaluator for LiteralEvaluator {
    fn evaluate(
        &self,
        context: &EvaluationContext<'_>,
        expression: &str,
    ) -> Result<Value, EvaluationError> {
        self.eval(context, expression, 0)
    }
}

fn strip_keyword<'t>(text: &'t str, keyword: &str) -> Option<&'t str> {
    let rest = text.strip_prefix(keyword)?;
    rest.starts_with(char::is_whitespace).then(|| rest.trim_start())
}

fn is_identifier(text: &str) -> bool {
    text.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Accepts RFC 3339 date-times, offset-less date-times (taken as UTC) and bare dates.
fn parse_date_time(literal: &str) -> Result<DateTime<FixedOffset>, EvaluationError> {
    let literal = literal.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(literal) {
        return Ok(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(literal, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive).fixed_offset());
    }
    if let Some(naive) = NaiveDate::parse_from_str(literal, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(Utc.from_utc_datetime(&naive).fixed_offset());
    }
    Err(EvaluationError::Syntax(format!("invalid date-time literal @{literal}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::{CompiledLibrary, DataProvider, ExpressionDef};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    fn eval(expression: &str) -> Result<Value, EvaluationError> {
        LiteralEvaluator.evaluate(&EvaluationContext::new("patient-1"), expression)
    }

    #[test]
    fn evaluates_literals() {
        assert_eq!(eval("true"), Ok(Value::Boolean(true)));
        assert_eq!(eval(" false "), Ok(Value::Boolean(false)));
        assert_eq!(eval("null"), Ok(Value::Null));
        assert_eq!(eval("42"), Ok(Value::Integer(42)));
        assert_eq!(eval("'Hello'"), Ok(Value::String("Hello".into())));
        assert_eq!(eval("not true"), Ok(Value::Boolean(false)));
        assert_eq!(eval("not null"), Ok(Value::Null));
    }

    #[test]
    fn evaluates_date_time_literals() {
        let Value::DateTime(dt) = eval("@2024-05-01T09:30:00+01:00").expect("date-time") else {
            panic!("expected DateTime");
        };
        assert_eq!(dt.to_rfc3339(), "2024-05-01T09:30:00+01:00");

        let Value::DateTime(date) = eval("@2024-05-01").expect("date") else {
            panic!("expected DateTime");
        };
        assert_eq!(date.to_rfc3339(), "2024-05-01T00:00:00+00:00");
    }

    #[test]
    fn resolves_statements_then_parameters() {
        let library = CompiledLibrary {
            name: "Screening".into(),
            statements: vec![
                ExpressionDef {
                    name: "Is Eligible".into(),
                    expression: "\"Has Consent\"".into(),
                },
                ExpressionDef {
                    name: "Has Consent".into(),
                    expression: "true".into(),
                },
            ],
            ..Default::default()
        };
        let mut parameters = BTreeMap::new();
        parameters.insert("Threshold".to_string(), Value::Integer(5));

        let context = EvaluationContext::new("patient-1")
            .with_library(Some(&library))
            .with_parameters(&parameters);

        assert_eq!(
            LiteralEvaluator.evaluate(&context, "\"Is Eligible\""),
            Ok(Value::Boolean(true))
        );
        assert_eq!(
            LiteralEvaluator.evaluate(&context, "Threshold"),
            Ok(Value::Integer(5))
        );
        assert_eq!(
            LiteralEvaluator.evaluate(&context, "Missing"),
            Err(EvaluationError::UnknownExpression("Missing".into()))
        );
    }

    #[test]
    fn self_reference_is_bounded() {
        let library = CompiledLibrary {
            name: "Loop".into(),
            statements: vec![ExpressionDef {
                name: "Loop".into(),
                expression: "Loop".into(),
            }],
            ..Default::default()
        };
        let context = EvaluationContext::new("p").with_library(Some(&library));
        assert!(matches!(
            LiteralEvaluator.evaluate(&context, "Loop"),
            Err(EvaluationError::Failed(_))
        ));
    }

    #[derive(Default)]
    struct RecordingProvider {
        requests: Mutex<Vec<RetrieveRequest>>,
    }

    impl DataProvider for RecordingProvider {
        fn retrieve(&self, request: &RetrieveRequest) -> Result<Vec<Value>, EvaluationError> {
            self.requests.lock().push(request.clone());
            Ok(vec![Value::String("obs".into())])
        }
    }

    #[test]
    fn retrieves_go_through_data_provider() {
        let provider = RecordingProvider::default();
        let context = EvaluationContext::new("patient-9").with_data_provider(Some(&provider));

        let value = LiteralEvaluator
            .evaluate(&context, "exists [Observation: \"http://example.org/vs/a1c\"]")
            .expect("retrieve");
        assert_eq!(value, Value::Boolean(true));

        let requests = provider.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].data_type, "Observation");
        assert_eq!(requests[0].context_value.as_deref(), Some("patient-9"));
        assert_eq!(requests[0].code_path.as_deref(), Some("code"));
        assert_eq!(
            requests[0].value_set.as_deref(),
            Some("http://example.org/vs/a1c")
        );
    }

    #[test]
    fn retrieve_without_provider_is_empty() {
        assert_eq!(eval("[Condition]"), Ok(Value::List(Vec::new())));
        assert_eq!(eval("exists [Condition]"), Ok(Value::Boolean(false)));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(matches!(eval("1 +"), Err(EvaluationError::Syntax(_))));
        assert!(matches!(eval(""), Err(EvaluationError::Syntax(_))));
        assert!(matches!(eval("@not-a-date"), Err(EvaluationError::Syntax(_))));
    }
}
