//! Library loading from the resource store.
//!
//! A FHIR `Library` carries expression source as a base64 `text/cql` attachment. The
//! resolver decodes it and reads the declarations the engine and discovery need:
//! `library`, `using`, `parameter` and `define`. Statement bodies are kept as text for the
//! evaluator; nothing here type-checks them.

use super::{CompiledLibrary, ExpressionDef, LibraryResolver, ParameterDef, TypeSpecifier, UsingDef};
use crate::store::ResourceStore;
use crate::{CdsError, CdsResult};
use base64::{engine::general_purpose, Engine as _};
use cds_types::Canonical;
use fhir::{Library, PlanDefinition, CQL_CONTENT_TYPE};
use std::sync::Arc;

/// Resolves plan library references against a [`ResourceStore`].
#[derive(Clone)]
pub struct StoreLibraryResolver {
    store: Arc<dyn ResourceStore>,
}

impl StoreLibraryResolver {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    fn load(&self, plan: &PlanDefinition, reference: &Canonical) -> CdsResult<Library> {
        if reference.is_contained() {
            return plan
                .find_contained(reference.id())
                .and_then(fhir::Resource::as_library)
                .cloned()
                .ok_or_else(|| CdsError::ContainedNotFound {
                    resource_type: "PlanDefinition".into(),
                    id: reference.id().to_string(),
                });
        }
        self.store.read_library(reference.id())
    }
}

impl LibraryResolver for StoreLibraryResolver {
    fn resolve(&self, plan: &PlanDefinition, reference: &Canonical) -> CdsResult<CompiledLibrary> {
        let library = self.load(plan, reference).map_err(|e| {
            CdsError::Library(format!("could not resolve library {reference}: {e}"))
        })?;
        compile_library(&library)
    }
}

/// Decode the `text/cql` attachment of `library` and read its declarations.
pub fn compile_library(library: &Library) -> CdsResult<CompiledLibrary> {
    let label = library.id.as_deref().unwrap_or("<unnamed>");
    let data = library
        .content_of_type(CQL_CONTENT_TYPE)
        .and_then(|a| a.data.as_deref())
        .ok_or_else(|| CdsError::Library(format!("Library/{label} has no {CQL_CONTENT_TYPE} content")))?;

    let bytes = general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| CdsError::Library(format!("Library/{label} content is not base64: {e}")))?;
    let source = String::from_utf8(bytes)
        .map_err(|e| CdsError::Library(format!("Library/{label} content is not UTF-8: {e}")))?;

    parse_library_source(&source)
}

/// Read the declarations of expression-language source text.
///
/// Statements continue on indented lines until the next top-level declaration.
/// Function definitions and `context`/`include`/terminology declarations are ignored.
pub fn parse_library_source(source: &str) -> CdsResult<CompiledLibrary> {
    let mut library = CompiledLibrary::default();
    let mut current: Option<ExpressionDef> = None;

    for raw_line in source.lines() {
        let line = strip_comment(raw_line);
        if line.trim().is_empty() {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            if let Some(def) = current.as_mut() {
                if !def.expression.is_empty() {
                    def.expression.push(' ');
                }
                def.expression.push_str(line.trim());
            }
            continue;
        }

        if let Some(def) = current.take() {
            library.statements.push(def);
        }

        let line = line.trim();
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        match keyword {
            "library" => {
                let (name, rest) = take_name(rest).ok_or_else(|| {
                    CdsError::Library(format!("malformed library declaration: {line}"))
                })?;
                library.name = name;
                library.version = take_version(rest);
            }
            "using" => {
                if let Some((model, rest)) = take_name(rest) {
                    library.usings.push(UsingDef {
                        model,
                        version: take_version(rest),
                    });
                }
            }
            "parameter" => {
                if let Some((name, rest)) = take_name(rest) {
                    let type_text = rest.split(" default ").next().unwrap_or("").trim();
                    let type_specifier = if type_text.is_empty() || type_text == "default" {
                        TypeSpecifier::Named("Any".into())
                    } else {
                        TypeSpecifier::parse(type_text)
                    };
                    library.parameters.push(ParameterDef {
                        name,
                        type_specifier,
                    });
                }
            }
            "define" => current = parse_define(rest),
            _ => {}
        }
    }

    if let Some(def) = current.take() {
        library.statements.push(def);
    }

    if library.name.is_empty() {
        return Err(CdsError::Library(
            "source has no library declaration".into(),
        ));
    }
    Ok(library)
}

fn parse_define(rest: &str) -> Option<ExpressionDef> {
    let rest = rest
        .strip_prefix("public ")
        .or_else(|| rest.strip_prefix("private "))
        .unwrap_or(rest)
        .trim_start();
    if rest.starts_with("function ") {
        return None;
    }

    let (name, rest) = take_name(rest)?;
    let expression = rest.trim().strip_prefix(':')?.trim().to_string();
    Some(ExpressionDef { name, expression })
}

/// Split a leading quoted (`"Name"`) or bare name from `text`.
fn take_name(text: &str) -> Option<(String, &str)> {
    let text = text.trim_start();
    if let Some(quoted) = text.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some((quoted[..end].to_string(), &quoted[end + 1..]));
    }
    let end = text
        .find(|c: char| c.is_whitespace() || c == ':')
        .unwrap_or(text.len());
    if end == 0 {
        return None;
    }
    Some((text[..end].to_string(), &text[end..]))
}

fn take_version(text: &str) -> Option<String> {
    let version = text.trim().strip_prefix("version")?.trim();
    let version = version.trim_matches('\'');
    (!version.is_empty()).then(|| version.to_string())
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        // Keep `//` inside string literals and URLs.
        Some(idx) if !line[..idx].contains('\'') && !line[..idx].ends_with(':') => &line[..idx],
        _ => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryResourceStore;
    use fhir::{Attachment, Resource};

    const SOURCE: &str = r#"library OpioidCds version '1.0.0'

using FHIR version '4.0.1'

include FHIRHelpers version '4.0.1' called FHIRHelpers

parameter "Measurement Period" Interval<DateTime>
parameter Codes List<Code> default { }
parameter Settings Tuple { mode String }
parameter Threshold Integer

context Patient

// rule entry point
define "Is Applicable":
  exists [MedicationRequest: "http://example.org/vs/opioids"]

define private "Has Consent": true
define function "Helper"(x Integer): x
"#;

    fn library_resource(id: &str, source: &str) -> Resource {
        Resource::Library(Library {
            id: Some(id.into()),
            content: vec![Attachment {
                content_type: Some(CQL_CONTENT_TYPE.into()),
                data: Some(general_purpose::STANDARD.encode(source)),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    #[test]
    fn reads_declarations() {
        let library = parse_library_source(SOURCE).expect("valid source");

        assert_eq!(library.name, "OpioidCds");
        assert_eq!(library.version.as_deref(), Some("1.0.0"));
        assert_eq!(library.using_version("FHIR"), Some("4.0.1"));

        let parameters: Vec<_> = library
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), &p.type_specifier))
            .collect();
        assert_eq!(
            parameters,
            vec![
                (
                    "Measurement Period",
                    &TypeSpecifier::Interval("DateTime".into())
                ),
                ("Codes", &TypeSpecifier::List("Code".into())),
                ("Settings", &TypeSpecifier::Tuple),
                ("Threshold", &TypeSpecifier::Named("Integer".into())),
            ]
        );

        assert_eq!(library.statements.len(), 2);
        assert_eq!(
            library.statement("Is Applicable").map(|s| s.expression.as_str()),
            Some("exists [MedicationRequest: \"http://example.org/vs/opioids\"]")
        );
        assert_eq!(
            library.statement("Has Consent").map(|s| s.expression.as_str()),
            Some("true")
        );
    }

    #[test]
    fn source_without_library_declaration_is_rejected() {
        let err = parse_library_source("define X: true").expect_err("should fail");
        assert!(matches!(err, CdsError::Library(_)));
    }

    #[test]
    fn resolves_primary_library_from_store() {
        let store = Arc::new(InMemoryResourceStore::new());
        store.insert(library_resource("opioid-logic", SOURCE));
        let resolver = StoreLibraryResolver::new(store);

        let plan = PlanDefinition {
            id: Some("opioid".into()),
            library: vec!["http://example.org/fhir/Library/opioid-logic|1.0.0".into()],
            ..Default::default()
        };

        let library = resolver
            .resolve_primary(&plan)
            .expect("resolution should succeed")
            .expect("plan has a library");
        assert_eq!(library.name, "OpioidCds");

        assert_eq!(
            resolver
                .resolve_primary(&PlanDefinition::default())
                .expect("no library is fine"),
            None
        );
    }

    #[test]
    fn missing_library_is_a_library_error() {
        let resolver = StoreLibraryResolver::new(Arc::new(InMemoryResourceStore::new()));
        let plan = PlanDefinition {
            library: vec!["Library/absent".into()],
            ..Default::default()
        };
        match resolver.resolve_primary(&plan).expect_err("should fail") {
            CdsError::Library(msg) => assert!(msg.contains("Library/absent"), "message: {msg}"),
            other => panic!("Expected Library error, got {other:?}"),
        }
    }

    #[test]
    fn contained_library_is_resolved_from_plan() {
        let resolver = StoreLibraryResolver::new(Arc::new(InMemoryResourceStore::new()));
        let plan = PlanDefinition {
            contained: vec![library_resource("inline", "library Inline\ndefine X: 1\n")],
            library: vec!["#inline".into()],
            ..Default::default()
        };
        let library = resolver
            .resolve_primary(&plan)
            .expect("resolution should succeed")
            .expect("plan has a library");
        assert_eq!(library.name, "Inline");
        assert_eq!(library.statement("X").map(|s| s.expression.as_str()), Some("1"));
    }
}
