use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use crate::commands::{self, CommandReport};

#[derive(Parser)]
#[command(name = "locsync")]
#[command(about = "Reconcile stored file locations against remote storage", long_about = None)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a public-status check for a project
    StartCheck {
        #[arg(long)]
        project_id: i64,
        /// Restart even if a check looks like it is still running
        #[arg(long)]
        force: bool,
    },
    /// Execute the queued check for a project
    Run {
        #[arg(long)]
        project_id: i64,
        #[arg(long)]
        user_id: i64,
    },
    /// Queue and execute a check in one step
    Check {
        #[arg(long)]
        project_id: i64,
        #[arg(long)]
        user_id: i64,
    },
    /// Show the latest check for a project
    Status {
        #[arg(long)]
        project_id: i64,
        /// Include per-item location status
        #[arg(long)]
        files: bool,
    },
    /// Build and print the filename index of a storage path
    Index {
        #[arg(long)]
        system: String,
        #[arg(long, default_value = "/")]
        path: String,
        /// Authenticate with this user's stored token
        #[arg(long)]
        user_id: Option<i64>,
    },
    /// Validate configuration, store and environment
    Verify,
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let state = if report.ok { "ok" } else { "failed" };
    println!("{}: {state}", report.command);
    for line in &report.details {
        println!("  {line}");
    }
    for issue in &report.issues {
        println!("  issue: {issue}");
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let report = match cli.command {
        Commands::StartCheck { project_id, force } => {
            commands::start_check::run(&commands::start_check::StartCheckOptions {
                project_id,
                force,
            })?
        }
        Commands::Run {
            project_id,
            user_id,
        } => commands::run_check::run(&commands::run_check::RunCheckOptions {
            project_id,
            user_id,
            start: false,
        })?,
        Commands::Check {
            project_id,
            user_id,
        } => commands::run_check::run(&commands::run_check::RunCheckOptions {
            project_id,
            user_id,
            start: true,
        })?,
        Commands::Status { project_id, files } => {
            commands::status::run(&commands::status::StatusOptions { project_id, files })?
        }
        Commands::Index {
            system,
            path,
            user_id,
        } => commands::index::run(&commands::index::IndexOptions {
            system,
            path,
            user_id,
        })?,
        Commands::Verify => commands::verify::run()?,
    };

    print_report(&report, cli.json)?;
    if !report.ok {
        return Err(anyhow!("{} failed", report.command));
    }
    Ok(())
}
