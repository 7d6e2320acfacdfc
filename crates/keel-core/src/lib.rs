//! Keel Core - chart, values and render-context types
//!
//! - `Chart`: metadata, templates, default values and sub-charts
//! - `Values`: configuration tree with merge and coalesce semantics
//! - `RenderContext`: what templates see while rendering

pub mod chart;
pub mod context;
pub mod error;
pub mod values;

pub use chart::{Chart, ChartDependency, ChartMetadata, Maintainer, TemplateFile};
pub use context::{Capabilities, ChartInfo, KubeVersion, ReleaseOptions, RenderContext};
pub use error::{CoreError, Result};
pub use values::{Values, parse_set_values};
