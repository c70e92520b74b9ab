//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a rounded table, or a notice when there are no rows
pub fn print_rows<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    let count = rows.len();
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
    println!("\nTotal: {}", count);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes >= GB {
        format!("{:.2}Gi", bytes / GB)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes / MB)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes / KB)
    } else {
        format!("{}B", bytes.max(0.0) as u64)
    }
}

/// Format CPU cores, switching to millicores below one core
pub fn format_cores(cores: f64) -> String {
    if cores >= 1.0 {
        format!("{:.2}", cores)
    } else {
        format!("{}m", (cores.max(0.0) * 1000.0).round() as u64)
    }
}

/// Format a percentage
pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Color a percentage by pressure
pub fn color_percent(value: f64) -> String {
    let formatted = format_percent(value);
    if value >= 90.0 {
        formatted.red().to_string()
    } else if value >= 70.0 {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "ready" | "running" | "succeeded" | "true" => status.green().to_string(),
        "pending" | "unknown" => status.yellow().to_string(),
        "notready" | "failed" | "false" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// `ready/desired`, colored by whether the workload has caught up
pub fn color_replicas(ready: i32, desired: i32) -> String {
    let formatted = format!("{}/{}", ready, desired);
    if ready >= desired {
        formatted.green().to_string()
    } else if ready == 0 {
        formatted.red().to_string()
    } else {
        formatted.yellow().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512.0), "512B");
        assert_eq!(format_bytes(2048.0), "2.00Ki");
        assert_eq!(format_bytes(3.0 * 1024.0 * 1024.0 * 1024.0), "3.00Gi");
    }

    #[test]
    fn test_format_cores() {
        assert_eq!(format_cores(0.25), "250m");
        assert_eq!(format_cores(1.5), "1.50");
        assert_eq!(format_cores(0.0), "0m");
    }
}
