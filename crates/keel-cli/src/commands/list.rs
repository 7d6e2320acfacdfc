//! List command - list releases

use clap::{Args, ValueEnum};
use console::style;
use keel_kube::{ListRequest, ReleaseStatus, SortBy, SortOrder};

use super::Context;
use crate::display::{self, OutputFormat};
use crate::error::{CliError, Result};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SortKey {
    Name,
    Date,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// List releases across all namespaces
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Regular expression matched against release names
    #[arg(short = 'l', long)]
    pub filter: Option<String>,

    /// Only releases whose latest status is one of these (e.g. deployed, failed)
    #[arg(long = "status")]
    pub statuses: Vec<String>,

    #[arg(long, value_enum, default_value = "name")]
    pub sort_by: SortKey,

    /// Reverse the sort order
    #[arg(short = 'r', long)]
    pub reverse: bool,

    /// Maximum releases to show (0: default page size)
    #[arg(short = 'm', long, default_value_t = 0)]
    pub max: usize,

    /// Start at this release name (from a previous page)
    #[arg(long)]
    pub offset: Option<String>,

    #[arg(short = 'o', long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

impl ListArgs {
    fn request(&self, namespace: &str) -> Result<ListRequest> {
        let sort_by = match self.sort_by {
            SortKey::Name => SortBy::Name,
            SortKey::Date => SortBy::LastReleased,
        };
        let order = if self.reverse { SortOrder::Desc } else { SortOrder::Asc };

        let mut request = ListRequest::new().with_sort(sort_by, order).with_limit(self.max);
        if !self.all_namespaces {
            request = request.in_namespace(namespace);
        }
        if let Some(filter) = &self.filter {
            request = request.with_filter(filter);
        }
        if let Some(offset) = &self.offset {
            request = request.with_offset(offset);
        }
        for status in &self.statuses {
            let status: ReleaseStatus = status.parse().map_err(CliError::validation)?;
            request = request.with_status(status);
        }
        Ok(request)
    }
}

pub async fn run(ctx: &Context, args: &ListArgs) -> Result<()> {
    let request = args.request(ctx.namespace())?;
    let storage = ctx.storage().await?;
    let response = storage.list(&request).await?;

    if args.output.emit(&response.releases)? {
        return Ok(());
    }

    if response.releases.is_empty() {
        if args.all_namespaces {
            println!("No releases found in any namespace");
        } else {
            println!("No releases found in namespace {}", ctx.namespace());
        }
        return Ok(());
    }

    display::print_release_table(&response.releases);
    if let Some(next) = &response.next {
        println!(
            "\n{} shown of {}; continue with --offset {}",
            display::pluralize(response.count, "release", "releases"),
            response.total,
            style(next).cyan()
        );
    }
    Ok(())
}
