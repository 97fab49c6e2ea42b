//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::json;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{DocumentHasher, ValidationResult};
use crate::planner::{
    Action, AttributeChange, ExecutionPlan, ExecutionReport, OperationOutcome, PlanOperation,
};
use crate::reconciler::ReconciliationResult;
use crate::state::{LockInfo, StateSnapshot};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan operation row for table display.
#[derive(Tabled)]
struct PlanOperationRow {
    #[tabled(rename = "Wave")]
    wave: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Operation result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
}

/// State entry row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Deposed")]
    deposed: usize,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats an execution plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ExecutionPlan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &ExecutionPlan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "✓".green()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nExecution Plan");
        let _ = write!(
            output,
            "   Document hash: {}\n\n",
            DocumentHasher::new().short_hash(&plan.document_hash)
        );

        let rows: Vec<PlanOperationRow> = plan
            .waves
            .iter()
            .enumerate()
            .flat_map(|(wave, ops)| ops.iter().map(move |&i| (wave, i)))
            .map(|(wave, i)| {
                let op = &plan.operations[i];
                PlanOperationRow {
                    wave: wave + 1,
                    action: Self::format_action(op),
                    resource: op.id.to_string(),
                    reason: op.reason.to_string(),
                }
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for (_, op) in plan.scheduled().filter(|(_, op)| !op.changes.is_empty()) {
                let _ = writeln!(output, "\n  {}", op.description().bold());
                for change in &op.changes {
                    let _ = writeln!(output, "    {}", Self::format_change(change));
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy\n",
            plan.count(Action::Create).to_string().green(),
            plan.count(Action::Update).to_string().yellow(),
            plan.count(Action::Destroy).to_string().red()
        );

        output
    }

    /// Formats one attribute change.
    fn format_change(change: &AttributeChange) -> String {
        let before = change
            .before
            .as_ref()
            .map_or_else(|| String::from("(none)"), ToString::to_string);
        let line = format!("~ {}: {before} -> {}", change.name, change.after);
        if change.forces_replacement {
            format!("{line} {}", "(forces replacement)".red())
        } else {
            line
        }
    }

    /// Formats the result of an apply or destroy run.
    #[must_use]
    pub fn format_result(&self, result: &ReconciliationResult) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(result).unwrap_or_default(),
            OutputFormat::Text => {
                let status = if result.success {
                    format!("{} Reconciliation successful", "✓".green())
                } else {
                    format!("{} Reconciliation failed", "✗".red())
                };

                let mut output = format!("{status}\n\n");
                output.push_str(&Self::format_report_text(&result.report));
                if result.attempts > 1 {
                    let _ = writeln!(output, "   Plan attempts: {}", result.attempts);
                }
                output
            }
        }
    }

    /// Formats an execution report as text.
    fn format_report_text(report: &ExecutionReport) -> String {
        let rows: Vec<ResultRow> = report
            .results
            .iter()
            .filter(|r| r.outcome != OperationOutcome::Unchanged)
            .map(|r| ResultRow {
                resource: r.id.to_string(),
                action: r.action.to_string(),
                outcome: Self::format_outcome(&r.outcome),
                attempts: r.attempts,
            })
            .collect();

        let mut output = String::new();
        if !rows.is_empty() {
            output.push_str(&Table::new(rows).to_string());
            output.push_str("\n\n");
        }
        let _ = writeln!(output, "   Succeeded: {}", report.succeeded);
        let _ = writeln!(output, "   Unchanged: {}", report.unchanged);
        let _ = writeln!(output, "   Failed: {}", report.failed);
        let _ = writeln!(output, "   Skipped: {}", report.skipped);
        let _ = writeln!(output, "   Cancelled: {}", report.cancelled);
        output
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(
        &self,
        snapshot: &StateSnapshot,
        lock: Option<&LockInfo>,
        document_hash: &str,
    ) -> String {
        let in_sync = snapshot
            .history
            .last()
            .is_some_and(|h| DocumentHasher::hashes_match(&h.document_hash, document_hash));

        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "state": snapshot,
                "lock": lock,
                "document_matches_last_run": in_sync,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(output, "\nState (lineage {})\n\n", snapshot.lineage);
                let _ = writeln!(output, "   Serial: {}", snapshot.serial);
                let _ = writeln!(output, "   Resources: {}", snapshot.resources.len());
                let _ = writeln!(
                    output,
                    "   Document matches last run: {}",
                    if in_sync { "yes".green() } else { "no".yellow() }
                );
                if let Some(lock) = lock {
                    let _ = writeln!(
                        output,
                        "   Locked by {} for {} ({}s left, id {})",
                        lock.holder,
                        lock.operation,
                        lock.remaining_secs(),
                        lock.lock_id
                    );
                }

                if !snapshot.is_empty() {
                    let rows: Vec<StateRow> = snapshot
                        .entries()
                        .map(|e| StateRow {
                            resource: e.id.to_string(),
                            provider_id: e.provider_id.clone(),
                            version: e.version,
                            updated: e.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                            deposed: e.deposed.len(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !snapshot.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", snapshot.history.len());
                    for entry in snapshot.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats validation findings.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
            }))
            .unwrap_or_default(),
            OutputFormat::Text => {
                let mut output = if result.is_valid() {
                    format!("{} Document is valid\n", "✓".green())
                } else {
                    format!("{} Document has {} error(s)\n", "✗".red(), result.error_count())
                };
                for error in &result.errors {
                    let _ = writeln!(output, "   - {error}");
                }
                if show_warnings && !result.warnings.is_empty() {
                    let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
                    for warning in &result.warnings {
                        let _ = writeln!(output, "   - {warning}");
                    }
                }
                output
            }
        }
    }

    /// Formats a status message.
    #[must_use]
    pub fn format_message(&self, success: bool, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                let status = if success { "success" } else { "error" };
                serde_json::to_string_pretty(&json!({ "status": status, "message": message }))
                    .unwrap_or_default()
            }
            OutputFormat::Text if success => format!("{} {message}", "✓".green()),
            OutputFormat::Text => format!("{} {message}", "✗".red()),
        }
    }

    /// Formats an action with color.
    fn format_action(op: &PlanOperation) -> String {
        match op.action {
            Action::Create => "+create".green().to_string(),
            Action::Update => "~update".yellow().to_string(),
            Action::Destroy if op.is_deposed_destroy() => "-destroy (deposed)".red().to_string(),
            Action::Destroy => "-destroy".red().to_string(),
            Action::NoOp => "noop".dimmed().to_string(),
        }
    }

    /// Formats an outcome with color.
    fn format_outcome(outcome: &OperationOutcome) -> String {
        match outcome {
            OperationOutcome::Succeeded { .. } => outcome.to_string().green().to_string(),
            OperationOutcome::Unchanged => outcome.to_string().dimmed().to_string(),
            OperationOutcome::Failed { .. } => Self::truncate(&outcome.to_string(), 60).red().to_string(),
            OperationOutcome::SkippedDependencyFailed { .. } | OperationOutcome::Cancelled => {
                outcome.to_string().yellow().to_string()
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
