//! Keel CLI - chart-based release orchestration for Kubernetes

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod display;
mod error;
mod exit_codes;
mod util;

use commands::Context;
use config::{ConfigFile, DriverKind, Overrides, Settings};
use error::{CliError, Result};

#[derive(Parser)]
#[command(name = "keel")]
#[command(author = "Keel Contributors")]
#[command(version)]
#[command(about = "Install, upgrade and roll back chart releases on Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Namespace of the release
    #[arg(short, long, global = true, env = "KEEL_NAMESPACE")]
    namespace: Option<String>,

    /// Where release records are kept
    #[arg(long, global = true, value_enum, env = "KEEL_DRIVER")]
    driver: Option<DriverKind>,

    /// Directory for the file driver
    #[arg(long, global = true, env = "KEEL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Versions kept per release (0: unlimited)
    #[arg(long, global = true, env = "KEEL_MAX_HISTORY")]
    max_history: Option<usize>,

    /// Config file (default: ~/.config/keel/config.yaml)
    #[arg(long, global = true, env = "KEEL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a chart locally
    Template(commands::template::TemplateArgs),

    /// Install a chart as a new release
    Install(commands::install::InstallArgs),

    /// Upgrade a release to a new chart or new values
    Upgrade(commands::upgrade::UpgradeArgs),

    /// Roll a release back to an earlier revision
    Rollback(commands::rollback::RollbackArgs),

    /// Uninstall a release
    Uninstall(commands::uninstall::UninstallArgs),

    /// List releases
    #[command(alias = "ls")]
    List(commands::list::ListArgs),

    /// Show the revisions of a release
    History(commands::history::HistoryArgs),

    /// Show the status of a release
    Status(commands::status::StatusArgs),

    /// Mark a release stuck in a pending state as failed
    Recover(commands::recover::RecoverArgs),
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("KEEL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn context(cli: &Cli) -> Result<Context> {
    let file = ConfigFile::load(cli.config.as_deref())?;
    let overrides = Overrides {
        namespace: cli.namespace.clone(),
        driver: cli.driver,
        data_dir: cli.data_dir.clone(),
        max_history: cli.max_history,
    };
    Ok(Context::new(Settings::resolve(file, overrides)?))
}

async fn dispatch(cli: Cli) -> Result<()> {
    let ctx = context(&cli)?;
    match &cli.command {
        Commands::Template(args) => commands::template::run(&ctx, args),
        Commands::Install(args) => commands::install::run(&ctx, args).await,
        Commands::Upgrade(args) => commands::upgrade::run(&ctx, args).await,
        Commands::Rollback(args) => commands::rollback::run(&ctx, args).await,
        Commands::Uninstall(args) => commands::uninstall::run(&ctx, args).await,
        Commands::List(args) => commands::list::run(&ctx, args).await,
        Commands::History(args) => commands::history::run(&ctx, args).await,
        Commands::Status(args) => commands::status::run(&ctx, args).await,
        Commands::Recover(args) => commands::recover::run(&ctx, args).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug);

    match dispatch(cli).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            let code = err.exit_code();
            if matches!(err, CliError::Cancelled) {
                eprintln!("Interrupted");
            } else {
                eprintln!("{:?}", miette::Report::new(err));
            }
            ExitCode::from(code as u8)
        }
    }
}
