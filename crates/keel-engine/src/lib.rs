//! Keel Engine - chart rendering
//!
//! Defines the [`Renderer`] boundary used by release operations and a
//! MiniJinja implementation with Kubernetes-oriented filters.

pub mod engine;
pub mod error;
pub mod filters;
pub mod renderer;

pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use renderer::Renderer;
