//! CLI output formatting

use crate::{
    core::{ExecutionStatus, GateDecision, JobState, RunPlan},
    execution::{ExecutionEvent, InstanceResult},
    persistence::RunSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Progress bar counting finished job instances
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    progress.set_style(style);
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a job state for display
pub fn format_job_state(state: &JobState) -> String {
    match state {
        JobState::Pending => style("PENDING").dim().to_string(),
        JobState::Running { .. } => style("RUNNING").yellow().to_string(),
        JobState::Succeeded { .. } => style("SUCCEEDED").green().to_string(),
        JobState::Failed { .. } => style("FAILED").red().to_string(),
        JobState::Skipped { .. } => style("SKIPPED").dim().to_string(),
        JobState::Cancelled { .. } => style("CANCELLED").yellow().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
        ExecutionStatus::NotTriggered => style("NOT TRIGGERED").dim().to_string(),
    }
}

/// One history line
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
        _ => INFO,
    };
    let run_id = summary.run_id.to_string();

    format!(
        "{} {} - {} - {} {} - {} (release {})",
        status_icon,
        style(&run_id[..8]).dim(),
        style(&summary.workflow_name).bold(),
        summary.event,
        style(&summary.git_ref).cyan(),
        format_status(summary.status),
        summary.release
    )
}

/// Format an execution event for display
///
/// Returns `None` for events that only feed the progress bar.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name,
            event,
            git_ref,
        } => format!(
            "{} Starting {} for {} {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            event,
            style(git_ref).cyan(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::NotTriggered { pipeline_name, event } => format!(
            "{} {} does not run on {} events",
            SKIP,
            style(pipeline_name).bold(),
            event
        ),
        ExecutionEvent::JobStarted { name, instances, .. } => format!(
            "{} {} ({} {})",
            SPINNER,
            style(name).bold(),
            instances,
            if *instances == 1 { "instance" } else { "instances" }
        ),
        ExecutionEvent::InstanceFinished { instance, result, .. } => match result {
            InstanceResult::Succeeded => format!("  {} {}", CHECK, style(instance).green()),
            InstanceResult::Failed { step, kind, error } => format!(
                "  {} {} failed at '{}' ({}): {}",
                CROSS,
                style(instance).red(),
                step,
                kind,
                style(error).dim()
            ),
            InstanceResult::Cancelled { reason } => {
                format!("  {} {} cancelled ({})", WARN, style(instance).yellow(), reason)
            }
        },
        ExecutionEvent::StepFinished {
            instance,
            step,
            error: Some(error),
            ..
        } => format!(
            "    {} {} / {}: {}",
            CROSS,
            style(instance).dim(),
            style(step).red(),
            style(error).dim()
        ),
        ExecutionEvent::JobFinished { job_id, state } => match state {
            JobState::Skipped { reason } => format!("{} {} skipped: {}", SKIP, style(job_id).dim(), reason),
            _ => format!("{} {} {}", INFO, style(job_id).bold(), format_job_state(state)),
        },
        ExecutionEvent::ReleaseGated { job_id, decision } => match decision {
            GateDecision::Run => format!("{} {} gate open", INFO, style(job_id).bold()),
            GateDecision::Skip(_) => return None,
        },
        ExecutionEvent::PipelineFinished { run_id, status } => format!(
            "{} Run {} {}",
            INFO,
            style(&run_id.to_string()[..8]).dim(),
            format_status(*status)
        ),
        ExecutionEvent::InstanceStarted { .. }
        | ExecutionEvent::StepStarted { .. }
        | ExecutionEvent::StepOutput { .. }
        | ExecutionEvent::StepFinished { error: None, .. } => return None,
    };
    Some(line)
}

/// Dry-run report
pub fn format_plan(workflow: &str, plan: &RunPlan) -> String {
    if !plan.triggered {
        return format!("{} {} would not run for this event", SKIP, style(workflow).bold());
    }

    let mut lines = vec![format!("{} {} would run:", INFO, style(workflow).bold())];
    lines.push(format!(
        "  {} (at most {} at once)",
        style("Test").bold(),
        style(plan.max_parallel).cyan()
    ));
    for instance in &plan.test_instances {
        lines.push(format!("    - {}", instance));
    }
    if plan.release_eligible {
        lines.push(format!("  {} if every test instance succeeds", style("Release").bold()));
    } else {
        lines.push(format!("  {} skipped: ref is not releasable", style("Release").dim()));
    }
    lines.join("\n")
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
