use thiserror::Error;

/// Problems with a sweep definition or parameter matrix. All of these are
/// detected before the first run is launched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SweepError {
    #[error("empty_candidates: parameter '{0}' has no candidate values")]
    EmptyCandidates(String),
    #[error("duplicate_parameter: parameter '{0}' is declared more than once")]
    DuplicateParameter(String),
    #[error("reserved_parameter: '{0}' is reserved for the recorded timing")]
    ReservedParameter(String),
    #[error("unconsumed_parameter: matrix '{matrix}' declares '{name}' but neither the template nor the launch command uses it")]
    UnconsumedParameter { matrix: String, name: String },
    #[error("missing_template_field: matrix '{matrix}' has no parameter '{name}' required by template.fields")]
    MissingTemplateField { matrix: String, name: String },
    #[error("unknown_placeholder: '{{{name}}}' in {location} is not a known field")]
    UnknownPlaceholder { name: String, location: String },
    #[error("malformed_template: {location}: {detail}")]
    MalformedTemplate { location: String, detail: String },
    #[error("schema_version: unsupported '{found}' (expected {expected})")]
    SchemaVersion { found: String, expected: String },
    #[error("empty_matrix: {0}")]
    EmptyMatrix(String),
    #[error("unknown_matrix: no matrix named '{0}'")]
    UnknownMatrix(String),
    #[error("empty_command: launch.command must name a program")]
    EmptyCommand,
}
