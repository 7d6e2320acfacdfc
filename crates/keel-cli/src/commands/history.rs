//! History command - show the revisions of a release

use clap::Args;
use console::style;

use super::Context;
use crate::display::{self, OutputFormat};
use crate::error::Result;

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Release name
    pub name: String,

    /// Show at most this many of the newest revisions
    #[arg(long)]
    pub max: Option<usize>,

    #[arg(short = 'o', long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

pub async fn run(ctx: &Context, args: &HistoryArgs) -> Result<()> {
    let storage = ctx.storage().await?;
    let history = storage.recent(ctx.namespace(), &args.name, args.max).await?;

    if args.output.emit(&history)? {
        return Ok(());
    }

    println!(
        "Release history for {} in namespace {}:\n",
        style(&args.name).cyan(),
        style(ctx.namespace()).yellow()
    );
    display::print_history_table(&history);
    Ok(())
}
