//! Install command - deploy a chart as a new release

use clap::Args;
use console::style;
use keel_core::Chart;
use keel_kube::InstallOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::Context;
use crate::display;
use crate::error::{CliError, Result};
use crate::util;

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Release name, or the chart directory with --generate-name
    #[arg(value_name = "NAME")]
    pub first: String,

    /// Chart directory
    #[arg(value_name = "CHART")]
    pub chart: Option<PathBuf>,

    /// Generate the release name
    #[arg(short = 'g', long)]
    pub generate_name: bool,

    /// Values file(s) to merge
    #[arg(short = 'f', long = "values")]
    pub values: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Wait for resources to become ready
    #[arg(long)]
    pub wait: bool,

    /// Also wait for Jobs to complete (implies --wait)
    #[arg(long)]
    pub wait_for_jobs: bool,

    /// Bound for waits and hooks (e.g. 90s, 5m)
    #[arg(long, value_parser = util::parse_duration)]
    pub timeout: Option<Duration>,

    /// Uninstall on failure (implies --wait)
    #[arg(long)]
    pub atomic: bool,

    /// Reuse the name of a deleted or failed release
    #[arg(long)]
    pub replace: bool,

    /// Adopt existing resources instead of failing
    #[arg(long)]
    pub take_ownership: bool,

    /// Do not run hooks
    #[arg(long)]
    pub no_hooks: bool,

    /// Render and print without touching the cluster or the store
    #[arg(long)]
    pub dry_run: bool,

    /// Custom description recorded on success
    #[arg(long)]
    pub description: Option<String>,

    /// Labels recorded on the release (key=value)
    #[arg(long = "label")]
    pub labels: Vec<String>,
}

impl InstallArgs {
    /// `NAME CHART`, or `CHART` alone with --generate-name
    fn target(&self) -> Result<(Option<&str>, &Path)> {
        match (&self.chart, self.generate_name) {
            (Some(chart), false) => Ok((Some(self.first.as_str()), chart.as_path())),
            (None, true) => Ok((None, Path::new(&self.first))),
            (Some(_), true) => Err(CliError::validation(
                "--generate-name takes the chart as the only argument",
            )),
            (None, false) => Err(CliError::validation(
                "missing chart: pass NAME CHART, or CHART with --generate-name",
            )),
        }
    }

    fn options(&self, name: Option<&str>, namespace: &str, timeout: Option<Duration>) -> Result<InstallOptions> {
        let mut options = match name {
            Some(name) => InstallOptions::new(name, namespace),
            None => InstallOptions::generated(namespace),
        }
        .with_values(util::load_values(&self.values, &self.set)?);

        if self.wait {
            options.wait = true;
        }
        if let Some(timeout) = timeout {
            options.timeout = timeout;
        }
        if self.wait_for_jobs {
            options = options.with_wait_for_jobs();
        }
        if self.atomic {
            options = options.with_atomic();
        }
        options.replace = self.replace;
        options.take_ownership = self.take_ownership;
        options.disable_hooks = self.no_hooks;
        options.dry_run = self.dry_run;
        options.description = self.description.clone();
        options.labels = util::parse_labels(&self.labels)?;
        Ok(options)
    }
}

pub async fn run(ctx: &Context, args: &InstallArgs) -> Result<()> {
    let (name, chart_dir) = args.target()?;
    let chart = Chart::load(chart_dir)?;
    println!(
        "{} Installing chart {} version {}",
        style("→").blue().bold(),
        style(chart.name()).cyan(),
        style(&chart.metadata.version).yellow()
    );

    let options = args
        .options(name, ctx.namespace(), ctx.timeout(args.timeout))?
        .with_cancel(util::interrupt_token());

    let coordinator = ctx.coordinator().await?;
    let release = coordinator.install(&chart, &options).await?;

    if args.dry_run {
        println!("{} Dry run, nothing was applied\n", style("✓").green().bold());
        println!("{}", release.manifest.trim_start());
        return Ok(());
    }

    println!(
        "{} Installed {} (revision {}) in namespace {}\n",
        style("✓").green().bold(),
        style(&release.name).cyan(),
        style(release.version).yellow(),
        style(&release.namespace).yellow()
    );
    display::print_release_summary(&release);
    display::print_notes(&release);
    Ok(())
}
