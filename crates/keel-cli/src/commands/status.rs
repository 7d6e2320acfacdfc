//! Status command - show a stored release

use clap::Args;
use console::style;

use super::Context;
use crate::display::{self, OutputFormat};
use crate::error::Result;

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Release name
    pub name: String,

    /// Show this revision instead of the latest
    #[arg(long)]
    pub revision: Option<u32>,

    /// Print the user-supplied values
    #[arg(long)]
    pub show_values: bool,

    /// Print the rendered manifest
    #[arg(long)]
    pub show_manifest: bool,

    #[arg(short = 'o', long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

pub async fn run(ctx: &Context, args: &StatusArgs) -> Result<()> {
    let storage = ctx.storage().await?;
    let release = match args.revision {
        Some(version) => storage.get(ctx.namespace(), &args.name, version).await?,
        None => storage.last(ctx.namespace(), &args.name).await?,
    };

    if args.output.emit(&release)? {
        return Ok(());
    }

    display::print_release_summary(&release);
    display::print_hooks(&release);

    if args.show_values {
        println!("\n{}", style("USER-SUPPLIED VALUES:").bold());
        print!("{}", serde_yaml::to_string(&release.config)?);
    }
    if args.show_manifest {
        println!("\n{}", style("MANIFEST:").bold());
        println!("{}", release.manifest.trim_start());
    }

    display::print_notes(&release);
    Ok(())
}
