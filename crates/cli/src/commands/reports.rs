//! Inspect stored status reports

use anyhow::Result;
use colored::Colorize;
use hostwatch_core::report::StatusReport;
use hostwatch_core::DataDir;
use tabled::Tabled;

use crate::output::{
    color_status, format_bytes, format_timestamp, print_heading, print_json, print_rows,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct DiskRow {
    #[tabled(rename = "Mount")]
    mount: String,
    #[tabled(rename = "Usage")]
    usage: String,
    #[tabled(rename = "Available")]
    available: String,
    #[tabled(rename = "Status")]
    status: String,
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "Report")]
    file_name: String,
}

/// Show the most recent status report
pub fn show_latest(data_dir: &DataDir, format: OutputFormat) -> Result<()> {
    let Some(report) = data_dir.report_store().latest()? else {
        print_warning("No status reports found");
        return Ok(());
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => print_report(&report),
    }
    Ok(())
}

fn print_report(report: &StatusReport) {
    print_heading("Status Report", 60);
    println!("Host:        {}", report.system.hostname.cyan());
    println!("Generated:   {}", format_timestamp(&report.timestamp));
    println!("Mode:        {}", color_status(report.mode.as_str()));
    println!("Status:      {}", color_status(report.summary.status.as_str()));
    println!("Uptime:      {}", report.summary.uptime);
    if let Some(reason) = &report.shutdown_reason {
        println!("Shutdown:    {}", reason.yellow());
    }
    println!();

    let perf = &report.performance;
    println!("{}", "Performance".bold());
    println!("{}", "-".repeat(60));
    println!(
        "CPU:         {:.1}% ({} cores, load {:.2}/{:.2}/{:.2}) {}",
        perf.cpu.usage,
        perf.cpu.cores,
        perf.cpu.load_average[0],
        perf.cpu.load_average[1],
        perf.cpu.load_average[2],
        color_status(perf.cpu.status.as_str())
    );
    println!(
        "Memory:      {:.1}% ({} free of {}) {}",
        perf.memory.usage,
        format_bytes(perf.memory.free_bytes),
        format_bytes(perf.memory.total_bytes),
        color_status(perf.memory.status.as_str())
    );
    println!(
        "Network:     {} connections from {} IPs, {} open ports {}",
        perf.network.active_connections,
        perf.network.unique_ips,
        perf.network.open_ports,
        color_status(perf.network.status.as_str())
    );
    println!();

    print_rows(
        perf.disk
            .iter()
            .map(|d| DiskRow {
                mount: d.mount_point.clone(),
                usage: format!("{:.1}%", d.usage),
                available: format_bytes(d.available_bytes),
                status: color_status(d.status.as_str()),
            })
            .collect(),
    );

    if !report.alerts.is_empty() {
        println!();
        println!("{}", "Threshold alerts".bold());
        for alert in &report.alerts {
            println!("  [{}] {}", color_status(alert.level.as_str()), alert.message);
        }
    }

    if !report.connectivity.is_empty() {
        println!();
        println!("{}", "Connectivity".bold());
        for result in &report.connectivity {
            let status = if result.is_reachable() { "reachable" } else { "unreachable" };
            println!("  {:<20} {}", result.host, color_status(status));
        }
    }

    println!();
    println!("Recent anomalies: {}", report.recent_anomalies.len());
}

/// List stored reports, newest first
pub fn list_reports(data_dir: &DataDir, limit: usize, format: OutputFormat) -> Result<()> {
    let entries = data_dir.report_store().list(Some(limit))?;

    match format {
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Table => print_rows(
            entries
                .into_iter()
                .map(|e| ReportRow {
                    file_name: e.file_name,
                })
                .collect(),
        ),
    }
    Ok(())
}
