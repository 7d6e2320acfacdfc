//! Recover command - release the pending lock of a stuck operation

use clap::Args;
use console::style;

use super::Context;
use crate::error::Result;

#[derive(Debug, Args)]
pub struct RecoverArgs {
    /// Release name
    pub name: String,
}

pub async fn run(ctx: &Context, args: &RecoverArgs) -> Result<()> {
    println!(
        "{} Attempting to recover release {}",
        style("→").blue().bold(),
        style(&args.name).cyan()
    );

    let storage = ctx.storage().await?;
    let release = storage.recover(ctx.namespace(), &args.name).await?;

    println!(
        "{} Revision {} of {} marked {}",
        style("✓").green().bold(),
        release.version,
        style(&release.name).cyan(),
        style(release.status()).yellow()
    );
    println!("\nYou can now retry the operation:");
    println!("  keel upgrade {} <chart>", release.name);
    Ok(())
}
