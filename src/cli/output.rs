// Output formatting and display for CLI

use crate::daemon::DaemonStatus;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

/// Print an error message to stderr
pub fn print_error(error: &str) {
    eprintln!("{} {}", "✗ Error:".red().bold(), error);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print a success message
pub fn print_success_msg(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print the status of the instance guarded by a PID file
pub fn print_status(status: &DaemonStatus) {
    if status.running {
        println!("{}", "✓ Server is running".green().bold());
    } else if status.stale {
        println!("{}", "⚠ Server is not running (stale PID file)".yellow().bold());
    } else {
        println!("{}", "✗ Server is not running".red().bold());
    }

    println!(
        "  {:<10} {}",
        "PID file:".bold(),
        status.pid_file.display().to_string().cyan()
    );

    if let Some(pid) = status.pid {
        println!("  {:<10} {}", "PID:".bold(), pid);
    }
    if let Some(ref name) = status.process_name {
        println!("  {:<10} {}", "Process:".bold(), name);
    }
    if let Some(memory) = status.memory_bytes {
        println!("  {:<10} {}", "Memory:".bold(), format_memory(memory));
    }
}

/// Format memory usage in human-readable format
fn format_memory(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes < KB {
        format!("{}B", bytes)
    } else if bytes < MB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else if bytes < GB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else {
        format!("{:.2}GB", bytes as f64 / GB as f64)
    }
}

/// Create a spinner for long operations
pub fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Finish a progress bar with success
pub fn finish_progress_success(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✓".green(), message));
}

/// Finish a progress bar with error
pub fn finish_progress_error(pb: ProgressBar, message: &str) {
    pb.finish_with_message(format!("{} {}", "✗".red(), message));
}
