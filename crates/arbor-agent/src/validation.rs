//! JSON Schema validation with model-readable error reports.
//!
//! Schemas are compiled once per tool at registration. Validation failures
//! are collected as [`SchemaIssue`]s and rendered one line per issue:
//!
//! ```text
//! Field `arguments.path` is required. Suggestion: `Add a value for "path"`
//! ```

use std::fmt;

use jsonschema::JSONSchema;
use jsonschema::error::{TypeKind, ValidationErrorKind};
use serde_json::Value;
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Issues
// ─────────────────────────────────────────────────────────────────────────────

/// What went wrong at one location.
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    Required { property: String },
    Type { expected: Vec<String> },
    AdditionalProperty { property: String },
    Enum { options: Vec<Value> },
    Other { message: String },
}

/// A single validation failure with its decoded instance path.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaIssue {
    pub path: Vec<String>,
    pub kind: IssueKind,
}

impl SchemaIssue {
    pub fn new(path: Vec<String>, kind: IssueKind) -> Self {
        Self { path, kind }
    }
}

/// Decode a JSON pointer (`/a/b~1c`) into its segments.
pub fn decode_pointer(pointer: &str) -> Vec<String> {
    pointer
        .split('/')
        .skip(1)
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect()
}

fn field_path(prefix: &str, path: &[String], leaf: Option<&str>) -> String {
    let mut out = prefix.to_string();
    for segment in path.iter().map(String::as_str).chain(leaf) {
        if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
            out.push('[');
            out.push_str(segment);
            out.push(']');
        } else {
            if !out.is_empty() {
                out.push('.');
            }
            out.push_str(segment);
        }
    }
    out
}

fn join_options(options: &[Value]) -> String {
    options
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render one issue as `Field \`<path>\` <problem>. Suggestion: \`<fix>\``.
pub fn format_issue(prefix: &str, issue: &SchemaIssue) -> String {
    match &issue.kind {
        IssueKind::Required { property } => format!(
            "Field `{}` is required. Suggestion: `Add a value for \"{}\"`",
            field_path(prefix, &issue.path, Some(property)),
            property
        ),
        IssueKind::Type { expected } => {
            let expected = if expected.is_empty() {
                "the declared type".to_string()
            } else {
                expected.join(" or ")
            };
            format!(
                "Field `{}` must be of type {}. Suggestion: `Provide a {} value`",
                field_path(prefix, &issue.path, None),
                expected,
                expected
            )
        }
        IssueKind::AdditionalProperty { property } => format!(
            "Field `{}` is not allowed. Suggestion: `Remove \"{}\" or check its spelling`",
            field_path(prefix, &issue.path, Some(property)),
            property
        ),
        IssueKind::Enum { options } => {
            let options = join_options(options);
            format!(
                "Field `{}` must be one of {}. Suggestion: `Use one of: {}`",
                field_path(prefix, &issue.path, None),
                options,
                options
            )
        }
        IssueKind::Other { message } => format!(
            "Field `{}` is invalid: {}. Suggestion: `Check the value against the schema`",
            field_path(prefix, &issue.path, None),
            message.trim_end_matches('.')
        ),
    }
}

/// Render every issue, one per line.
pub fn format_issues(prefix: &str, issues: &[SchemaIssue]) -> String {
    issues
        .iter()
        .map(|issue| format_issue(prefix, issue))
        .collect::<Vec<_>>()
        .join("\n")
}

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

/// A validation failure. Fatal to the invocation that triggered it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ValidationError {
    message: String,
    issues: Vec<SchemaIssue>,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            issues: Vec::new(),
        }
    }

    /// Arguments supplied by the model did not match the tool's schema.
    pub fn arguments(tool: &str, issues: Vec<SchemaIssue>) -> Self {
        Self::report(
            format!("Invalid arguments for tool `{tool}`"),
            "arguments",
            issues,
        )
    }

    /// A tool returned a result that violates its contract.
    pub fn result(tool: &str, prefix: &str, issues: Vec<SchemaIssue>) -> Self {
        Self::report(format!("Invalid result from tool `{tool}`"), prefix, issues)
    }

    fn report(header: String, prefix: &str, issues: Vec<SchemaIssue>) -> Self {
        Self {
            message: format!("{header}:\n{}", format_issues(prefix, &issues)),
            issues,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn issues(&self) -> &[SchemaIssue] {
        &self.issues
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compiled schema
// ─────────────────────────────────────────────────────────────────────────────

/// A compiled JSON Schema.
pub struct CompiledSchema {
    schema: JSONSchema,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> Result<Self, ValidationError> {
        let schema = JSONSchema::compile(schema)
            .map_err(|e| ValidationError::new(format!("Invalid JSON schema: {e}")))?;
        Ok(Self { schema })
    }

    /// Validate `instance`, returning every issue found.
    pub fn validate(&self, instance: &Value) -> Vec<SchemaIssue> {
        match self.schema.validate(instance) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.flat_map(issues_from).collect(),
        }
    }
}

fn issues_from(error: jsonschema::ValidationError<'_>) -> Vec<SchemaIssue> {
    let path = decode_pointer(&error.instance_path.to_string());
    let kinds = match &error.kind {
        ValidationErrorKind::Required { property } => vec![IssueKind::Required {
            property: property
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| property.to_string()),
        }],
        ValidationErrorKind::Type { kind } => vec![IssueKind::Type {
            expected: match kind {
                TypeKind::Single(primitive) => vec![primitive.to_string()],
                TypeKind::Multiple(types) => types.into_iter().map(|t| t.to_string()).collect(),
            },
        }],
        ValidationErrorKind::AdditionalProperties { unexpected } => unexpected
            .iter()
            .map(|property| IssueKind::AdditionalProperty {
                property: property.clone(),
            })
            .collect(),
        ValidationErrorKind::Enum { options } => vec![IssueKind::Enum {
            options: options
                .as_array()
                .cloned()
                .unwrap_or_else(|| vec![options.clone()]),
        }],
        _ => vec![IssueKind::Other {
            message: error.to_string(),
        }],
    };
    kinds
        .into_iter()
        .map(|kind| SchemaIssue::new(path.clone(), kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> CompiledSchema {
        CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "mode": { "enum": ["read", "write"] },
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "name": { "type": "string" } },
                        "required": ["name"]
                    }
                }
            },
            "required": ["path"],
            "additionalProperties": false
        }))
        .unwrap()
    }

    #[test]
    fn test_decode_pointer() {
        assert!(decode_pointer("").is_empty());
        assert_eq!(decode_pointer("/a/0"), vec!["a", "0"]);
        assert_eq!(decode_pointer("/a~1b/c~0d"), vec!["a/b", "c~d"]);
    }

    #[test]
    fn test_valid_instance_has_no_issues() {
        assert!(schema().validate(&json!({"path": "src/lib.rs"})).is_empty());
    }

    #[test]
    fn test_missing_required() {
        let issues = schema().validate(&json!({}));
        assert_eq!(issues.len(), 1);
        assert_eq!(
            format_issues("arguments", &issues),
            "Field `arguments.path` is required. Suggestion: `Add a value for \"path\"`"
        );
    }

    #[test]
    fn test_wrong_type() {
        let issues = schema().validate(&json!({"path": 5}));
        assert_eq!(
            issues[0].kind,
            IssueKind::Type {
                expected: vec!["string".to_string()]
            }
        );
        let line = format_issue("arguments", &issues[0]);
        assert!(line.starts_with("Field `arguments.path` must be of type string."));
    }

    #[test]
    fn test_additional_property() {
        let issues = schema().validate(&json!({"path": "x", "extra": true}));
        assert_eq!(issues.len(), 1);
        let line = format_issue("arguments", &issues[0]);
        assert!(line.contains("Field `arguments.extra` is not allowed"));
    }

    #[test]
    fn test_enum_and_nested_paths() {
        let issues = schema().validate(&json!({
            "path": "x",
            "mode": "append",
            "items": [{"name": "ok"}, {}]
        }));
        let report = format_issues("arguments", &issues);
        assert!(report.contains("Field `arguments.mode` must be one of \"read\", \"write\""));
        assert!(report.contains("Field `arguments.items[1].name` is required"));
        assert_eq!(report.lines().count(), 2);
    }

    #[test]
    fn test_invalid_schema_rejected() {
        let err = CompiledSchema::compile(&json!({"type": 12})).unwrap_err();
        assert!(err.message().starts_with("Invalid JSON schema"));
    }

    #[test]
    fn test_error_report_header() {
        let err = ValidationError::arguments(
            "read_file",
            vec![SchemaIssue::new(
                vec![],
                IssueKind::Required {
                    property: "path".to_string(),
                },
            )],
        );
        assert!(err.to_string().starts_with("Invalid arguments for tool `read_file`:\n"));
        assert_eq!(err.issues().len(), 1);
    }
}
