//! Rollback command - restore an earlier revision

use clap::Args;
use console::style;
use keel_kube::RollbackOptions;
use std::time::Duration;

use super::Context;
use crate::display;
use crate::error::Result;
use crate::util;

#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// Release name
    pub name: String,

    /// Revision to restore (default: the previous one)
    #[arg(default_value_t = 0)]
    pub revision: u32,

    /// Restart pods of Deployments, StatefulSets and DaemonSets
    #[arg(long)]
    pub recreate_pods: bool,

    /// Wait for resources to become ready
    #[arg(long)]
    pub wait: bool,

    /// Also wait for Jobs to complete (implies --wait)
    #[arg(long)]
    pub wait_for_jobs: bool,

    /// Bound for waits and hooks (e.g. 90s, 5m)
    #[arg(long, value_parser = util::parse_duration)]
    pub timeout: Option<Duration>,

    /// Take over conflicting fields and replace immutable objects
    #[arg(long)]
    pub force: bool,

    /// Adopt existing resources instead of failing
    #[arg(long)]
    pub take_ownership: bool,

    /// Do not run hooks
    #[arg(long)]
    pub no_hooks: bool,

    /// Show what would be restored without applying it
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn run(ctx: &Context, args: &RollbackArgs) -> Result<()> {
    let mut options = RollbackOptions::new(&args.name, ctx.namespace())
        .to_version(args.revision)
        .with_cancel(util::interrupt_token());
    if let Some(timeout) = ctx.timeout(args.timeout) {
        options.timeout = timeout;
    }
    options.wait = args.wait || args.wait_for_jobs;
    options.wait_for_jobs = args.wait_for_jobs;
    options.recreate = args.recreate_pods;
    options.force = args.force;
    options.take_ownership = args.take_ownership;
    options.disable_hooks = args.no_hooks;
    options.dry_run = args.dry_run;

    let coordinator = ctx.coordinator().await?;
    let release = coordinator.rollback(&options).await?;

    if args.dry_run {
        println!(
            "{} Dry run: {} would become revision {} ({})",
            style("✓").green().bold(),
            style(&release.name).cyan(),
            release.version,
            release.info.description
        );
        return Ok(());
    }

    println!(
        "{} Rollback complete: {} is now at revision {}\n",
        style("✓").green().bold(),
        style(&release.name).cyan(),
        style(release.version).yellow()
    );
    display::print_release_summary(&release);
    Ok(())
}
