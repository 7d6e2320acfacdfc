//! Upgrade command - move a release to a new chart or values

use clap::Args;
use console::style;
use keel_core::Chart;
use keel_kube::{InstallOptions, KubeError, UpgradeOptions, ValueReusePolicy};
use std::path::PathBuf;
use std::time::Duration;

use super::Context;
use crate::display;
use crate::error::Result;
use crate::util;

#[derive(Debug, Args)]
pub struct UpgradeArgs {
    /// Release name
    pub name: String,

    /// Chart directory
    pub chart: PathBuf,

    /// Values file(s) to merge
    #[arg(short = 'f', long = "values")]
    pub values: Vec<PathBuf>,

    /// Set values on command line (key=value)
    #[arg(long = "set")]
    pub set: Vec<String>,

    /// Install the release if it does not exist yet
    #[arg(short = 'i', long)]
    pub install: bool,

    /// Ignore stored values; use chart defaults plus the given values
    #[arg(long, conflicts_with_all = ["reuse_values", "reset_then_reuse_values"])]
    pub reset_values: bool,

    /// Layer the given values over the previous computed values
    #[arg(long, conflicts_with = "reset_then_reuse_values")]
    pub reuse_values: bool,

    /// New chart defaults, then previous values, then the given values
    #[arg(long)]
    pub reset_then_reuse_values: bool,

    /// Wait for resources to become ready
    #[arg(long)]
    pub wait: bool,

    /// Also wait for Jobs to complete (implies --wait)
    #[arg(long)]
    pub wait_for_jobs: bool,

    /// Bound for waits and hooks (e.g. 90s, 5m)
    #[arg(long, value_parser = util::parse_duration)]
    pub timeout: Option<Duration>,

    /// Roll back on failure (implies --wait)
    #[arg(long)]
    pub atomic: bool,

    /// Take over conflicting fields and replace immutable objects
    #[arg(long)]
    pub force: bool,

    /// Leave resources removed from the chart in the cluster
    #[arg(long)]
    pub no_prune: bool,

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
}

impl UpgradeArgs {
    fn value_reuse(&self) -> ValueReusePolicy {
        if self.reset_values {
            ValueReusePolicy::ResetValues
        } else if self.reuse_values {
            ValueReusePolicy::ReuseValues
        } else if self.reset_then_reuse_values {
            ValueReusePolicy::ResetThenReuseValues
        } else {
            ValueReusePolicy::Default
        }
    }

    fn options(&self, namespace: &str, timeout: Option<Duration>) -> Result<UpgradeOptions> {
        let mut options = UpgradeOptions::new(&self.name, namespace)
            .with_values(util::load_values(&self.values, &self.set)?)
            .with_value_reuse(self.value_reuse());

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
        options.force = self.force;
        options.prune = !self.no_prune;
        options.take_ownership = self.take_ownership;
        options.disable_hooks = self.no_hooks;
        options.dry_run = self.dry_run;
        options.description = self.description.clone();
        Ok(options)
    }

    /// Equivalent install for `--install` on a release with no history
    fn install_options(&self, upgrade: &UpgradeOptions) -> InstallOptions {
        let mut options = InstallOptions::new(&upgrade.name, &upgrade.namespace)
            .with_values(upgrade.values.clone())
            .with_cancel(upgrade.cancel.clone());
        options.wait = upgrade.wait;
        options.wait_for_jobs = upgrade.wait_for_jobs;
        options.timeout = upgrade.timeout;
        options.atomic = upgrade.atomic;
        options.take_ownership = upgrade.take_ownership;
        options.disable_hooks = upgrade.disable_hooks;
        options.dry_run = upgrade.dry_run;
        options.description = upgrade.description.clone();
        options
    }
}

pub async fn run(ctx: &Context, args: &UpgradeArgs) -> Result<()> {
    let chart = Chart::load(&args.chart)?;
    println!(
        "{} Upgrading {} to chart {} version {}",
        style("→").blue().bold(),
        style(&args.name).cyan(),
        style(chart.name()).cyan(),
        style(&chart.metadata.version).yellow()
    );

    let options = args
        .options(ctx.namespace(), ctx.timeout(args.timeout))?
        .with_cancel(util::interrupt_token());
    let coordinator = ctx.coordinator().await?;

    let release = match coordinator.upgrade(&chart, &options).await {
        Err(KubeError::NoDeployedReleases { name }) if args.install => {
            let history = coordinator.storage().history(&options.namespace, &name).await?;
            if !history.is_empty() {
                return Err(KubeError::NoDeployedReleases { name }.into());
            }
            println!("{} Release not found, installing", style("→").blue());
            coordinator.install(&chart, &args.install_options(&options)).await?
        }
        other => other?,
    };

    if args.dry_run {
        println!("{} Dry run, nothing was applied\n", style("✓").green().bold());
        println!("{}", release.manifest.trim_start());
        return Ok(());
    }

    println!(
        "{} Release {} is now at revision {}\n",
        style("✓").green().bold(),
        style(&release.name).cyan(),
        style(release.version).yellow()
    );
    display::print_release_summary(&release);
    display::print_notes(&release);
    Ok(())
}
