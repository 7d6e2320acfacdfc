//! The rendering boundary consumed by release operations

use keel_core::{Chart, ReleaseOptions, Values};
use std::collections::BTreeMap;

use crate::error::Result;

/// Turns a chart plus final values into rendered text keyed by source path
///
/// Keys are `<chart-name>/<template-path>`; implementations must be pure
/// (no cluster access, no persistence).
pub trait Renderer: Send + Sync {
    fn render(
        &self,
        chart: &Chart,
        values: &Values,
        options: &ReleaseOptions,
    ) -> Result<BTreeMap<String, String>>;
}

impl<R: Renderer + ?Sized> Renderer for std::sync::Arc<R> {
    fn render(
        &self,
        chart: &Chart,
        values: &Values,
        options: &ReleaseOptions,
    ) -> Result<BTreeMap<String, String>> {
        (**self).render(chart, values, options)
    }
}
