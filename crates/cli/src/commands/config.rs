//! Show the monitor configuration the daemon will use

use anyhow::{Context, Result};
use colored::Colorize;
use hostwatch_core::MonitorConfig;
use std::path::Path;

use crate::output::{print_heading, print_info, print_json, OutputFormat};

/// Read the config file without creating it; defaults stand in when absent
pub fn load(path: &Path) -> Result<(MonitorConfig, bool)> {
    if !path.exists() {
        return Ok((MonitorConfig::default(), false));
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config: MonitorConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config.validate()?;
    Ok((config, true))
}

pub fn show_config(path: &Path, format: OutputFormat) -> Result<()> {
    let (config, from_file) = load(path)?;

    match format {
        OutputFormat::Json => print_json(&config)?,
        OutputFormat::Table => {
            print_heading("Monitor Configuration", 60);
            if from_file {
                println!("Source: {}", path.display().to_string().cyan());
            } else {
                print_info(&format!(
                    "{} not found, showing defaults",
                    path.display()
                ));
            }
            println!();

            let m = &config.monitoring;
            println!("{}", "Monitoring".bold());
            println!("  interval:            {}ms", m.interval);
            println!("  fastInterval:        {}ms", m.fast_interval);
            println!("  healthCheckInterval: {}ms", m.health_check_interval);
            println!("  reportInterval:      {}ms", m.report_interval);
            println!();

            println!("{}", "Thresholds (warning / critical)".bold());
            let t = &config.thresholds;
            for (name, pair) in [
                ("cpu", t.cpu),
                ("memory", t.memory),
                ("disk", t.disk),
                ("connections", t.connections),
            ] {
                println!("  {:<12} {} / {}", name, pair.warning, pair.critical);
            }
            println!();

            println!("{}", "Response".bold());
            println!("  enabled:             {}", config.response.enabled);
            println!("  dryRun:              {}", config.response.dry_run);
            println!(
                "  webhook:             {}",
                config.alerts.webhook_url.as_deref().unwrap_or("(none)")
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_falls_back_without_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor-config.json");

        let (config, from_file) = load(&path).unwrap();
        assert!(!from_file);
        assert_eq!(config, MonitorConfig::default());
        assert!(!path.exists());
    }

    #[test]
    fn test_partial_file_is_merged_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor-config.json");
        std::fs::write(&path, r#"{"monitoring":{"interval":5000}}"#).unwrap();

        let (config, from_file) = load(&path).unwrap();
        assert!(from_file);
        assert_eq!(config.monitoring.interval, 5000);
        assert_eq!(config.monitoring.fast_interval, 2000);
    }
}
