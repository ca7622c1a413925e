//! Spinners for long-running passes.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner with a message; hidden when `quiet`
pub fn spinner(msg: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn finish_success(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("{} {msg}", "✓".green()));
}

pub fn finish_error(pb: &ProgressBar, msg: &str) {
    finish(pb, format!("{} {msg}", "✗".red()));
}

fn finish(pb: &ProgressBar, line: String) {
    if pb.is_hidden() {
        return;
    }
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.finish_with_message(line);
}
