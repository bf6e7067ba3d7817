use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::export::ExportOptions;
use crate::commands::plan::PlanOptions;
use crate::commands::run::RunOptions;
use crate::commands::sync::SyncCommandOptions;
use crate::commands::{self, CommandReport, RunContext};

#[derive(Debug, Parser)]
#[command(
    name = "jira-dumper",
    version,
    about = "Archive Jira issues, XML exports and attachments to a local tree"
)]
struct Cli {
    /// Print the report as JSON.
    #[arg(long, global = true)]
    json: bool,
    /// Archive root (overrides JIRA_DUMPER_OUTPUT_DIR).
    #[arg(long, global = true, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Tracker base URL (overrides JIRA_BASE_URL).
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Enumerate every issue key of a project created within a date range.
    Plan {
        /// Project to plan; repeat for several.
        #[arg(long = "project", value_name = "PROJECT", required = true)]
        projects: Vec<String>,
        /// First creation day, YYYY-MM-DD (default: two years before today).
        #[arg(long)]
        since: Option<String>,
        /// Last creation day, YYYY-MM-DD (default: today).
        #[arg(long)]
        until: Option<String>,
    },
    /// Fetch the XML export of planned (or given) issues.
    Export {
        #[arg(long)]
        project: String,
        #[arg(long = "key", value_name = "KEY")]
        keys: Vec<String>,
        /// Re-export only the keys that failed last time.
        #[arg(long, conflicts_with = "keys")]
        retry_failed: bool,
    },
    /// Mirror attachments listed in export documents.
    Sync {
        /// Export documents to process.
        documents: Vec<PathBuf>,
        /// Process every export document of this project.
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        dry_run: bool,
        /// Download even when the local copy is current.
        #[arg(long)]
        force: bool,
    },
    /// Plan, export and sync a project in one go.
    Run {
        #[arg(long = "project", value_name = "PROJECT", required = true)]
        projects: Vec<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        force: bool,
    },
    /// Show configuration, lock and per-project run state.
    Status,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("command={} ok={}", report.command, report.ok);
    for detail in &report.details {
        println!("{detail}");
    }
    for issue in &report.issues {
        println!("issue: {issue}");
    }
    Ok(())
}

/// Parse arguments, run the command and print its report. Returns `report.ok`.
pub fn run() -> Result<bool> {
    let cli = Cli::parse();
    let ctx = RunContext::load(cli.output_dir.as_deref(), cli.base_url.as_deref())?;

    let report = match cli.command {
        Command::Plan {
            projects,
            since,
            until,
        } => commands::plan::run(
            &ctx,
            &PlanOptions {
                projects,
                since,
                until,
            },
        )?,
        Command::Export {
            project,
            keys,
            retry_failed,
        } => commands::export::run(
            &ctx,
            &ExportOptions {
                project,
                keys,
                retry_failed,
            },
        )?,
        Command::Sync {
            documents,
            project,
            dry_run,
            force,
        } => commands::sync::run(
            &ctx,
            &SyncCommandOptions {
                project,
                documents,
                dry_run,
                force,
            },
        )?,
        Command::Run {
            projects,
            since,
            until,
            force,
        } => commands::run::run(
            &ctx,
            &RunOptions {
                projects,
                since,
                until,
                force,
            },
        )?,
        Command::Status => commands::status::run(&ctx)?,
    };

    print_report(&report, cli.json)?;
    Ok(report.ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_accepts_documents_and_flags() {
        let cli = Cli::try_parse_from([
            "jira-dumper",
            "sync",
            "--dry-run",
            "--output-dir",
            "/archive",
            "a.xml",
            "b.xml",
        ])
        .expect("parse");
        assert_eq!(cli.output_dir, Some(PathBuf::from("/archive")));
        match cli.command {
            Command::Sync {
                documents, dry_run, ..
            } => {
                assert!(dry_run);
                assert_eq!(documents.len(), 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn plan_takes_repeated_projects_and_optional_since() {
        let cli = Cli::try_parse_from([
            "jira-dumper",
            "plan",
            "--project",
            "OPS",
            "--project",
            "INFRA",
        ])
        .expect("parse");
        match cli.command {
            Command::Plan {
                projects, since, ..
            } => {
                assert_eq!(projects, vec!["OPS".to_string(), "INFRA".to_string()]);
                assert!(since.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["jira-dumper", "plan"]).is_err());
        assert!(Cli::try_parse_from(["jira-dumper", "run"]).is_err());
    }

    #[test]
    fn retry_failed_conflicts_with_explicit_keys() {
        let parsed = Cli::try_parse_from([
            "jira-dumper",
            "export",
            "--project",
            "OPS",
            "--key",
            "OPS-1",
            "--retry-failed",
        ]);
        assert!(parsed.is_err());
    }
}
