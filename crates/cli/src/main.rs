//! hwctl - operator CLI for the hostwatch monitoring agent
//!
//! Reads the alert and report stores directly and queries a running
//! daemon over HTTP.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, config, reports, status};
use hostwatch_core::DataDir;
use std::path::PathBuf;

/// hostwatch operator CLI
#[derive(Parser)]
#[command(name = "hwctl")]
#[command(author, version, about = "CLI for the hostwatch monitoring agent", long_about = None)]
pub struct Cli {
    /// Agent data directory (alerts, reports, logs, config)
    #[arg(long, env = "HOSTWATCH_DATA_DIR", default_value = "monitoring")]
    pub data_dir: PathBuf,

    /// Daemon URL for live queries
    #[arg(long, env = "HWCTL_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List stored alerts, newest first
    Alerts {
        /// Filter by severity (low, medium, high, warning, critical)
        #[arg(long, short)]
        severity: Option<String>,

        /// Filter by anomaly type (e.g. cpu_spike, potential_ddos)
        #[arg(long = "type", short = 't')]
        kind: Option<String>,

        /// Maximum number of alerts to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Inspect stored status reports
    #[command(subcommand)]
    Reports(ReportsCommands),

    /// Show live status of a running daemon
    Status,

    /// Monitor configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum ReportsCommands {
    /// Show the most recent report
    Latest,

    /// List stored reports
    List {
        /// Maximum number of reports to list
        #[arg(long, short, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective monitor configuration
    Show {
        /// Config file (defaults to <data-dir>/config/monitor-config.json)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = DataDir::new(&cli.data_dir);

    match cli.command {
        Commands::Alerts {
            severity,
            kind,
            limit,
        } => {
            alerts::list_alerts(
                &data_dir,
                severity.as_deref(),
                kind.as_deref(),
                limit,
                cli.format,
            )?;
        }
        Commands::Reports(reports_cmd) => match reports_cmd {
            ReportsCommands::Latest => reports::show_latest(&data_dir, cli.format)?,
            ReportsCommands::List { limit } => {
                reports::list_reports(&data_dir, limit, cli.format)?;
            }
        },
        Commands::Status => {
            let client = client::DaemonClient::new(&cli.api_url)?;
            status::show_status(&client, cli.format).await?;
        }
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show { path } => {
                let path = path.unwrap_or_else(|| data_dir.config_path());
                config::show_config(&path, cli.format)?;
            }
        },
    }

    Ok(())
}
