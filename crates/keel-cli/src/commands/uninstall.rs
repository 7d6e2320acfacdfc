//! Uninstall command - remove a release from the cluster

use clap::Args;
use console::style;
use keel_kube::UninstallOptions;
use std::time::Duration;

use super::Context;
use crate::error::Result;
use crate::util;

#[derive(Debug, Args)]
pub struct UninstallArgs {
    /// Release name
    pub name: String,

    /// Keep the release records (marked deleted) instead of purging them
    #[arg(long)]
    pub keep_history: bool,

    /// Do not run hooks
    #[arg(long)]
    pub no_hooks: bool,

    /// Bound for hooks (e.g. 90s, 5m)
    #[arg(long, value_parser = util::parse_duration)]
    pub timeout: Option<Duration>,

    /// Show what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,

    /// Custom description recorded with --keep-history
    #[arg(long)]
    pub description: Option<String>,
}

pub async fn run(ctx: &Context, args: &UninstallArgs) -> Result<()> {
    let mut options = UninstallOptions::new(&args.name, ctx.namespace());
    options.purge = !args.keep_history;
    options.disable_hooks = args.no_hooks;
    options.dry_run = args.dry_run;
    options.description = args.description.clone();
    if let Some(timeout) = ctx.timeout(args.timeout) {
        options.timeout = timeout;
    }

    let coordinator = ctx.coordinator().await?;
    let release = coordinator.uninstall(&options).await?;

    if args.dry_run {
        println!(
            "{} Dry run: would uninstall {} (revision {})",
            style("✓").green().bold(),
            style(&release.name).cyan(),
            release.version
        );
        return Ok(());
    }

    println!(
        "{} Release {} uninstalled",
        style("✓").green().bold(),
        style(&release.name).cyan()
    );
    if args.keep_history {
        println!("  History kept; `keel history {}` still shows it", release.name);
    }
    Ok(())
}
