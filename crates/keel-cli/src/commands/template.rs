//! Template command - render a chart locally without touching a cluster

use clap::Args;
use console::style;
use keel_core::{Chart, ReleaseOptions};
use keel_engine::Engine;
use keel_kube::render_chart;
use std::path::PathBuf;

use super::Context;
use crate::error::Result;
use crate::util;

#[derive(Debug, Args)]
pub struct TemplateArgs {
    /// Release name used for rendering
    pub name: String,

    /// Chart directory
    pub chart: PathBuf,

    /// Values file(s) to merge
    #[arg(short = 'f', long = "values")]
    pub values: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Only print documents whose source path contains this
    #[arg(short = 's', long)]
    pub show_only: Option<String>,

    /// Leave hook resources out of the output
    #[arg(long)]
    pub no_hooks: bool,

    /// Render undefined values as empty instead of failing
    #[arg(long)]
    pub lenient: bool,
}

pub fn run(ctx: &Context, args: &TemplateArgs) -> Result<()> {
    let chart = Chart::load(&args.chart)?;
    let values = util::load_values(&args.values, &args.set)?;
    let options = ReleaseOptions::for_install(&args.name, ctx.namespace());
    let engine = Engine::builder().strict(!args.lenient).build();

    let rendered = render_chart(&engine, &chart, &values, None, &options)?;
    tracing::debug!(
        chart = chart.name(),
        hooks = rendered.hooks.len(),
        "rendered chart"
    );

    let wanted = |path: &str| args.show_only.as_deref().is_none_or(|f| path.contains(f));

    for document in rendered.manifest.split("\n---\n").filter(|d| !d.trim().is_empty()) {
        let source = document
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("# Source: "))
            .unwrap_or_default();
        if wanted(source) {
            println!("---\n{}", document.trim_end());
        }
    }

    if !args.no_hooks {
        for hook in rendered.hooks.iter().filter(|h| wanted(&h.path)) {
            println!("---\n# Source: {}\n{}", hook.path, hook.manifest.trim_end());
        }
    }

    if args.show_only.is_none()
        && let Some(notes) = &rendered.notes
    {
        println!("\n{}", style("NOTES:").yellow().bold());
        println!("{}", notes.trim_end());
    }
    Ok(())
}
