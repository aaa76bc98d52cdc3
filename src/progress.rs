//! Progress reporting for the share walker
//!
//! A spinner line fed from the live walk counters, plus the header and
//! summary printed around a run.

use crate::walker::{WalkProgress, WalkResult};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Failures listed individually in the summary before eliding the rest
const MAX_LISTED_FAILURES: usize = 10;

/// Spinner showing walk status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        }
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &WalkProgress) {
        let msg = format!(
            "Dirs: {} | Files: {} | Read: {} | Rate: {:.0}/s | In flight: {} | Sessions: {}",
            format_number(progress.dirs),
            format_number(progress.files),
            format_size(progress.bytes, BINARY),
            progress.files_per_second(),
            format_number(progress.in_flight),
            progress.sessions,
        );
        self.bar.set_message(msg);
    }

    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Print a summary of the walk results
pub fn print_summary(result: &WalkResult) {
    let summary = &result.summary;
    let title = if result.completed {
        style("Walk Complete").green().bold()
    } else {
        style("Walk Interrupted").yellow().bold()
    };

    println!();
    println!("{}", title);
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Sessions:").bold(), result.sessions);
    println!("  {} {}", style("Directories:").bold(), format_number(summary.listed));
    println!("  {} {}", style("Files:").bold(), format_number(summary.drained));
    println!("  {} {}", style("Bytes Read:").bold(), format_size(summary.bytes, BINARY));
    println!(
        "  {} {:.1}s ({:.0} files/sec)",
        style("Duration:").bold(),
        result.duration.as_secs_f64(),
        result.files_per_second()
    );
    if summary.cancelled() > 0 {
        println!("  {} {}", style("Cancelled:").yellow().bold(), format_number(summary.cancelled()));
    }
    if summary.failed() > 0 {
        println!("  {} {}", style("Failures:").red().bold(), format_number(summary.failed()));
        let failures = result.failures();
        for failure in failures.iter().take(MAX_LISTED_FAILURES) {
            println!("    {} {}", style(&failure.path).dim(), failure.reason);
        }
        if failures.len() > MAX_LISTED_FAILURES {
            println!("    ... and {} more", failures.len() - MAX_LISTED_FAILURES);
        }
    }
    println!();
}

/// Print a header at the start of the walk
pub fn print_header(url: &str, sessions: usize, max_in_flight: Option<usize>) {
    println!();
    println!("{} {}", style("smb-walker").cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Source:").bold(), url);
    println!("  {} {}", style("Sessions:").bold(), sessions);
    match max_in_flight {
        Some(limit) => println!("  {} {}", style("In flight:").bold(), limit),
        None => println!("  {} unbounded", style("In flight:").bold()),
    }
    println!();
}
