//! Spinners for the interactive commands

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
        .template("{spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

fn finish_spinner(spinner: &ProgressBar, prefix_style: &str, prefix: &'static str, message: &str) {
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template(prefix_style)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_prefix(prefix);
    spinner.finish_with_message(message.to_string());
}

pub fn finish_spinner_success(spinner: &ProgressBar, message: &str) {
    finish_spinner(spinner, "{prefix:.green} {msg}", "✓", message);
}

pub fn finish_spinner_error(spinner: &ProgressBar, message: &str) {
    finish_spinner(spinner, "{prefix:.red} {msg}", "✗", message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_spinner() {
        let spinner = create_spinner("Loading rooms...");
        assert!(!spinner.is_finished());
        spinner.finish();
        assert!(spinner.is_finished());
    }

    #[test]
    fn test_finish_helpers() {
        let ok = create_spinner("Working...");
        finish_spinner_success(&ok, "Done");
        assert!(ok.is_finished());

        let failed = create_spinner("Working...");
        finish_spinner_error(&failed, "Failed");
        assert!(failed.is_finished());
    }
}
