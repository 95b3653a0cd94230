//! Operator console stream.
//!
//! The console shows the step/batch/host/action hierarchy while the
//! per-host files under `.hades/logs/` carry raw command output. Glyphs:
//! squares for targets, diamonds for jobs, circles for actions.

use std::time::Duration;

use colored::Colorize;

#[derive(Debug, Clone, Copy, Default)]
pub struct Console;

impl Console {
    pub fn new() -> Self {
        Console
    }

    pub fn plan_started(&self, plan: &str, run_id: &str) {
        println!("{}", "=".repeat(40));
        println!("Plan: {}", plan.bold());
        println!("{}", "=".repeat(40));
        println!("Run ID: {run_id}\n");
    }

    pub fn plan_completed(&self, duration: Duration) {
        println!(
            "\n{} Plan completed in {}",
            "✓".green(),
            format_duration(duration)
        );
    }

    pub fn plan_failed(&self, step: &str, host: &str) {
        eprintln!("\n{} Plan failed at step {step:?} on host {host:?}", "✗".red());
    }

    pub fn step_progress(&self, index: usize, total: usize, name: &str, job: &str, targets: &str) {
        println!("Step {}/{}: {}", index, total, name.bold());
        println!("  Job: {job}");
        println!("  Targets: {targets}");
    }

    pub fn step_completed(&self, name: &str, targets: &str, hosts: usize) {
        println!("\n{} Step completed: {name}", "✓".green());
        println!("  Targets: {targets} ({hosts} hosts)\n");
    }

    pub fn step_skipped(&self, name: &str) {
        println!("{} Step skipped: {name} (no targets selected)", "○".blue());
    }

    pub fn artifact_loaded(&self, name: &str, path: &str) {
        println!("  Loaded artifact: {name} from {path}");
    }

    pub fn target_started(&self, name: &str, hosts: usize) {
        println!("\n{} Target {name:?}: started ({hosts} hosts)", "□".yellow());
    }

    pub fn target_completed(&self, name: &str, hosts: usize) {
        println!("{} Target {name:?}: completed ({hosts} hosts)", "■".green());
    }

    pub fn target_failed(&self, name: &str) {
        eprintln!("{} Target {name:?}: failed", "■".red());
    }

    pub fn batch_started(&self, index: usize, total: usize, hosts: usize) {
        if total > 1 {
            println!("  Batch {index}/{total} ({hosts} hosts)");
        }
    }

    pub fn batch_completed(&self, index: usize, total: usize) {
        if total > 1 {
            println!("  {} Batch {index}/{total} completed", "✓".green());
        }
    }

    pub fn job_starting(&self, host: &str, job: &str) {
        println!("[{host}] {} Job {job:?}: starting", "◇".yellow());
    }

    pub fn job_completed(&self, host: &str, job: &str) {
        println!("[{host}] {} Job {job:?}: completed", "◆".green());
    }

    pub fn job_skipped(&self, host: &str, job: &str) {
        println!("[{host}] {} Job {job:?}: skipped (guard failed)", "◇".blue());
    }

    pub fn job_failed(&self, host: &str, job: &str, error: &str) {
        eprintln!("[{host}] {} Job {job:?}: failed - {error}", "◆".red());
    }

    pub fn action_started(&self, host: &str, label: &str) {
        println!("[{host}] {} Action {label}: in progress", "◌".yellow());
    }

    pub fn action_completed(&self, host: &str, label: &str) {
        println!("[{host}] {} Action {label}: completed", "●".green());
    }

    pub fn action_skipped(&self, host: &str, label: &str, reason: &str) {
        println!("[{host}] {} Action {label}: skipped ({reason})", "○".blue());
    }

    pub fn action_failed(&self, host: &str, label: &str, error: &str) {
        eprintln!("[{host}] {} Action {label}: failed - {error}", "●".red());
    }

    pub fn dry_run_header(&self, plan: &str) {
        println!("{}", "=".repeat(40));
        println!("Dry run: {}", plan.bold());
        println!("{}", "=".repeat(40));
        println!();
    }

    pub fn dry_run_host(&self, host: &str) {
        println!("\n  [{host}]");
    }

    pub fn dry_run_action(&self, description: &str) {
        println!("    - {description}");
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m{}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_format_for_operators() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(75)), "1m15s");
    }
}
