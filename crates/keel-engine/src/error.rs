//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateError),

    #[error("template {path} is not valid UTF-8")]
    #[diagnostic(code(keel::template::encoding))]
    InvalidUtf8 { path: String },

    #[error("invalid chart: {0}")]
    #[diagnostic(code(keel::chart::invalid))]
    Chart(#[from] keel_core::CoreError),
}

/// Broad category of a template failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    InvalidOperation,
    Other,
}

impl From<minijinja::ErrorKind> for TemplateErrorKind {
    fn from(kind: minijinja::ErrorKind) -> Self {
        match kind {
            minijinja::ErrorKind::UndefinedError => Self::UndefinedVariable,
            minijinja::ErrorKind::UnknownFilter => Self::UnknownFilter,
            minijinja::ErrorKind::UnknownFunction => Self::UnknownFunction,
            minijinja::ErrorKind::SyntaxError => Self::SyntaxError,
            minijinja::ErrorKind::InvalidOperation => Self::InvalidOperation,
            _ => Self::Other,
        }
    }
}

/// Template failure with the offending source attached
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{path}: {message}")]
#[diagnostic(code(keel::template::render))]
pub struct TemplateError {
    /// Rendered-output key of the template (`<chart>/<path>`)
    pub path: String,

    pub message: String,

    pub kind: TemplateErrorKind,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,
}

impl TemplateError {
    pub fn from_minijinja(err: &minijinja::Error, path: &str, source: &str) -> Self {
        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        };

        Self {
            path: path.to_string(),
            message,
            kind: err.kind().into(),
            src: NamedSource::new(path, source.to_string()),
            span: err.line().and_then(|line| line_span(source, line)),
        }
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

/// Byte span of a 1-based line
fn line_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;
    for (idx, line) in source.lines().enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }
    None
}

pub type Result<T> = std::result::Result<T, EngineError>;
