//! Query a running daemon

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use crate::client::DaemonClient;
use crate::output::{
    color_status, format_timestamp, print_heading, print_info, print_json, OutputFormat,
};

/// Show mode, uptime, the last health assessment and component health
pub async fn show_status(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;
    let health = client.health().await?;

    if let OutputFormat::Json = format {
        return print_json(&json!({ "agent": status, "health": health }));
    }

    print_heading("Agent Status", 50);
    println!("Node:        {}", status.node.cyan());
    println!("Mode:        {}", color_status(status.mode.as_str()));
    println!("Uptime:      {}", status.uptime);
    println!("Ticks:       {}", status.ticks);
    match &status.last_sample_at {
        Some(ts) => println!("Last sample: {}", format_timestamp(ts)),
        None => println!("Last sample: {}", "none yet".yellow()),
    }
    println!();

    match &status.assessment {
        Some(a) => {
            println!("{}", "Host assessment".bold());
            println!("{}", "-".repeat(50));
            println!("Overall:     {}", color_status(a.status.as_str()));
            println!("CPU:         {}", color_status(a.cpu.as_str()));
            println!("Memory:      {}", color_status(a.memory.as_str()));
            println!("Disk:        {}", color_status(a.disk.as_str()));
            println!("Connections: {}", color_status(a.connections.as_str()));
        }
        None => print_info("No health check has run yet"),
    }
    println!();

    println!("{}", "Components".bold());
    println!("{}", "-".repeat(50));
    let mut components: Vec<_> = health.components.iter().collect();
    components.sort_by(|a, b| a.0.cmp(b.0));
    for (name, component) in components {
        let label = serde_json::to_value(component.status)?
            .as_str()
            .unwrap_or_default()
            .to_string();
        match &component.message {
            Some(message) => println!("{:<12} {} ({})", name, color_status(&label), message),
            None => println!("{:<12} {}", name, color_status(&label)),
        }
    }

    Ok(())
}
