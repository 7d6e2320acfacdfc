//! Display formatting for CLI output
//!
//! Tables for releases and history, status colors, and the
//! machine-readable output modes.

use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use console::{StyledObject, style};
use keel_kube::{Release, ReleaseStatus};
use serde::Serialize;

use crate::error::Result;

/// `-o/--output`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    /// Print `value` as JSON/YAML; `false` means the caller renders a table
    pub fn emit<T: Serialize + ?Sized>(self, value: &T) -> Result<bool> {
        match self {
            OutputFormat::Table => Ok(false),
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(value)?);
                Ok(true)
            }
            OutputFormat::Yaml => {
                print!("{}", serde_yaml::to_string(value)?);
                Ok(true)
            }
        }
    }
}

pub fn status_style(status: ReleaseStatus) -> StyledObject<&'static str> {
    let text = status.as_str();
    match status {
        ReleaseStatus::Deployed => style(text).green(),
        ReleaseStatus::Failed => style(text).red(),
        s if s.is_pending() => style(text).yellow(),
        _ => style(text).dim(),
    }
}

pub fn format_time(time: &DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

pub fn print_release_table(releases: &[Release]) {
    println!(
        "{:<24} {:<16} {:<9} {:<17} {:<24} {:<20}",
        style("NAME").bold(),
        style("NAMESPACE").bold(),
        style("REVISION").bold(),
        style("STATUS").bold(),
        style("CHART").bold(),
        style("UPDATED").bold()
    );
    for release in releases {
        println!(
            "{:<24} {:<16} {:<9} {:<17} {:<24} {:<20}",
            release.name,
            release.namespace,
            release.version,
            status_style(release.status()),
            release.chart_ref(),
            format_time(&release.info.last_deployed)
        );
    }
}

pub fn print_history_table(history: &[Release]) {
    println!(
        "{:<9} {:<20} {:<17} {:<24} {}",
        style("REVISION").bold(),
        style("UPDATED").bold(),
        style("STATUS").bold(),
        style("CHART").bold(),
        style("DESCRIPTION").bold()
    );
    for release in history {
        println!(
            "{:<9} {:<20} {:<17} {:<24} {}",
            release.version,
            format_time(&release.info.last_deployed),
            status_style(release.status()),
            release.chart_ref(),
            release.info.description
        );
    }
}

/// Header block shared by `status` and the mutating commands
pub fn print_release_summary(release: &Release) {
    println!("NAME:          {}", style(&release.name).cyan());
    println!("NAMESPACE:     {}", style(&release.namespace).yellow());
    println!("REVISION:      {}", release.version);
    println!("STATUS:        {}", status_style(release.status()));
    println!("CHART:         {}", release.chart_ref());
    println!("LAST DEPLOYED: {}", format_time(&release.info.last_deployed));
    if let Some(deleted) = &release.info.deleted {
        println!("DELETED:       {}", format_time(deleted));
    }
    println!("DESCRIPTION:   {}", release.info.description);
    if !release.labels.is_empty() {
        let labels: Vec<String> = release.labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        println!("LABELS:        {}", labels.join(","));
    }
}

pub fn print_hooks(release: &Release) {
    if release.hooks.is_empty() {
        return;
    }
    println!("\n{}", style("HOOKS:").bold());
    for hook in &release.hooks {
        let events: Vec<&str> = hook.events.iter().map(|e| e.as_str()).collect();
        let phase = hook
            .last_run
            .as_ref()
            .map(|run| format!("{:?}", run.phase).to_lowercase())
            .unwrap_or_else(|| "not run".to_string());
        println!(
            "  {}/{} [{}] weight {} ({})",
            hook.kind,
            hook.name,
            events.join(","),
            hook.weight,
            style(phase).dim()
        );
    }
}

pub fn print_notes(release: &Release) {
    if let Some(notes) = &release.info.notes {
        println!("\n{}", style("NOTES:").bold());
        println!("{}", notes.trim_end());
    }
}
