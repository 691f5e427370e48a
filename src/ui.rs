//! Terminal output: a spinner while a step runs, coloured step results.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use jobdispatch::{DeliveryReport, DispatchError, Job};

/// Visual progress for a scripted run.
pub struct RunProgress {
    // Spinner; step lines are printed above it.
    pb: ProgressBar,
    // Completed steps.
    green: Style,
    // Unexpected failures.
    red: Style,
    // Refusals the script expects.
    yellow: Style,
    // Job stamps.
    dim: Style,
}

impl RunProgress {
    /// Start the spinner with `title` as its first message.
    pub fn start(title: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(title.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }

    pub fn step(&self, message: &str) {
        self.pb.set_message(message.to_string());
    }

    /// A step that changed a job.
    pub fn done(&self, message: &str, job: &Job) {
        self.pb.println(format!(
            "  {} {message} {}",
            self.green.apply_to("✓"),
            self.dim.apply_to(format!("[{}]", job.stamp()))
        ));
    }

    /// A step that was expected to be refused.
    pub fn refused(&self, message: &str, err: &DispatchError) {
        self.pb.println(format!(
            "  {} {message}: {err}",
            self.yellow.apply_to("⊘")
        ));
    }

    /// A step that should have worked and did not.
    pub fn failed(&self, message: &str, err: &DispatchError) {
        self.pb.println(format!("  {} {message}: {err}", self.red.apply_to("✗")));
    }

    /// Counts from a delivery report, red when any send failed.
    pub fn report(&self, report: &DeliveryReport) {
        let mark = if report.failed.is_empty() {
            self.green.apply_to("→")
        } else {
            self.red.apply_to("→")
        };
        self.pb.println(format!(
            "    {mark} notified {} / failed {} / skipped {}",
            report.delivered.len(),
            report.failed.len(),
            report.skipped.len()
        ));
    }

    pub fn finish(&self, message: &str) {
        self.pb.finish_and_clear();
        println!("{} {message}", self.green.apply_to("■"));
    }

    /// Pretty JSON under a heading.
    pub fn dump<T: Serialize>(&self, heading: &str, value: &T) {
        println!();
        println!("{}", self.yellow.apply_to(format!("─── {heading} ───")));
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}
