use anyhow::{Context, Result};
use release_pipeline::cli::commands::{HistoryCommand, ListCommand, PlanCommand, RunCommand, ValidateCommand};
use release_pipeline::cli::output::*;
use release_pipeline::cli::terminal_output::TerminalOutput;
use release_pipeline::cli::{Cli, Command};
use release_pipeline::core::config::WorkflowConfig;
use release_pipeline::core::{EventKind, ExecutionStatus, JobState, TriggerEvent};
use release_pipeline::execution::{
    detect_trigger, ExecutionEngine, ExecutionEvent, ProcessRunner,
};
use release_pipeline::persistence::{create_summary, InMemoryPersistence, PersistenceBackend, RunSummary};
use release_pipeline::release::Credential;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Exit code after Ctrl-C
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_workflow(cmd, &cli).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Plan(cmd) => plan_workflow(cmd)?,
        Command::List(cmd) => list_workflows(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

/// Run history store; in-memory when built without SQLite
async fn open_store() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = release_pipeline::persistence::SqliteRunStore::with_default_path()
            .await
            .context("Failed to open run history")?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        tracing::warn!("Built without the sqlite feature, history is not kept between runs");
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

async fn run_workflow(cmd: &RunCommand, cli: &Cli) -> Result<()> {
    let config = WorkflowConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load workflow config from {}", cmd.file))?;

    println!("{} Loaded workflow: {}", INFO, style(&config.name).bold());

    let mut pipeline = config.to_pipeline()?;
    let runner = Arc::new(ProcessRunner::new());

    let kind = cmd.event.unwrap_or(EventKind::Push);
    let mut event = match &cmd.git_ref {
        Some(git_ref) => TriggerEvent::new(kind, git_ref.as_str()),
        None => detect_trigger(runner.as_ref(), &pipeline.repository, kind)
            .await
            .context("Failed to detect the current ref, pass --ref")?,
    };
    if let Some(sha) = &cmd.sha {
        event = event.with_sha(sha.as_str());
    }

    for (key, value) in &cmd.variable {
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let publish = &config.jobs.release.publish;
    let credential = Credential::from_env(&publish.password_env);
    let plan = pipeline.plan(&event);
    if plan.release_eligible && credential.is_none() {
        println!(
            "{} ${} is not set, publishing will fail",
            WARN,
            style(&publish.password_env).yellow()
        );
    }

    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        open_store().await?
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n{} Cancelling, waiting for running commands to stop", WARN);
                cancel.cancel();
            }
        });
    }

    let strategy = cmd.strategy.to_strategy(cmd.max_parallel);
    let engine = ExecutionEngine::with_options(runner, strategy, cancel, cmd.keep_workspaces)
        .with_variables(cmd.variable.iter().cloned().collect());

    let total = plan.test_instances.len() + usize::from(plan.release_eligible);
    let progress = create_progress_bar(total);
    let terminal = Arc::new(TerminalOutput::new());
    {
        let progress = progress.clone();
        let stream = cli.stream;
        engine
            .add_event_handler(move |event| {
                match &event {
                    ExecutionEvent::InstanceStarted { instance, .. } => progress.set_message(instance.clone()),
                    ExecutionEvent::InstanceFinished { .. } => progress.inc(1),
                    _ => {}
                }
                if stream {
                    progress.suspend(|| terminal.on_event(&event));
                }
                if let Some(line) = format_execution_event(&event) {
                    progress.println(line);
                }
            })
            .await;
    }

    println!();
    let result = engine.execute(&mut pipeline, &event, credential).await;
    progress.finish_and_clear();
    let status = result?;

    if !cmd.no_history {
        let summary = create_summary(&pipeline, &event);
        store.save_run(&summary).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&summary.run_id.to_string()[..8]).dim()
        );
    }

    match status {
        ExecutionStatus::Completed => println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        ),
        ExecutionStatus::NotTriggered => println!(
            "\n{} {} not triggered by {} events",
            SKIP,
            style(&pipeline.name).bold(),
            event.kind
        ),
        ExecutionStatus::Cancelled => {
            println!("\n{} {} {}", WARN, style(&pipeline.name).bold(), style("cancelled").yellow());
            std::process::exit(EXIT_CANCELLED);
        }
        _ => {
            println!("\n{} {} {}", CROSS, style(&pipeline.name).bold(), style("failed").red());
            for instance in pipeline.test.instances.iter().chain(&pipeline.release.instances) {
                if let JobState::Failed { error, .. } = &instance.state {
                    error!("{}: {}", instance.label(), error);
                }
            }
            std::process::exit(1);
        }
    }

    Ok(())
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating workflow...", INFO);

    match WorkflowConfig::from_file(&cmd.file) {
        Ok(config) => {
            let test = &config.jobs.test;
            let versions: Vec<String> = test.matrix.python_version.iter().map(|v| v.to_string()).collect();
            let triggers: Vec<&str> = config.triggers.iter().map(|t| t.as_str()).collect();

            println!("{} Workflow configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Triggers: {}", style(triggers.join(", ")).cyan());
            println!("  Matrix: {}", style(versions.join(", ")).cyan());
            println!("  Max parallel: {}", style(test.max_parallel).cyan());
            println!("  Test steps: {}", style(test.steps.len()).cyan());
            println!("  Release gate: {}", style(&config.jobs.release.gate.pattern).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

fn plan_workflow(cmd: &PlanCommand) -> Result<()> {
    let config = WorkflowConfig::from_file(&cmd.file)
        .with_context(|| format!("Failed to load workflow config from {}", cmd.file))?;
    let pipeline = config.to_pipeline()?;
    let event = TriggerEvent::new(cmd.event, cmd.git_ref.as_str());
    let plan = pipeline.plan(&event);

    if cmd.json {
        let data = serde_json::json!({
            "workflow": pipeline.name,
            "event": event.kind,
            "ref": event.git_ref.as_str(),
            "triggered": plan.triggered,
            "test_instances": plan.test_instances,
            "max_parallel": plan.max_parallel,
            "release_eligible": plan.release_eligible,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{}", format_plan(&pipeline.name, &plan));
    }

    Ok(())
}

async fn list_workflows(cmd: &ListCommand) -> Result<()> {
    let store = open_store().await?;
    let workflows = store.list_workflows().await?;

    if workflows.is_empty() {
        println!("{} No workflows found in history", INFO);
        return Ok(());
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for workflow in &workflows {
            let runs = store.list_runs(workflow).await?;
            json_data.push(serde_json::json!({
                "name": workflow,
                "run_count": runs.len(),
            }));
        }
        let data = serde_json::json!({ "workflows": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Workflows in history:", INFO);

    for workflow in &workflows {
        if cmd.with_counts {
            let runs = store.list_runs(workflow).await?;
            let completed = runs.iter().filter(|r| r.status == ExecutionStatus::Completed).count();
            let failed = runs.iter().filter(|r| r.status == ExecutionStatus::Failed).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(workflow).bold(),
                style(runs.len()).cyan(),
                style(completed).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(workflow).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = open_store().await?;

    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) => print_run_details(&summary, cmd.verbose)?,
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    let mut runs = match &cmd.workflow {
        Some(workflow) => store.list_runs(workflow).await?,
        None => {
            let mut all_runs = Vec::new();
            for workflow in store.list_workflows().await? {
                all_runs.extend(store.list_runs(&workflow).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

fn print_run_details(summary: &RunSummary, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Workflow: {}", style(&summary.workflow_name).bold());
    println!("  Event: {} {}", summary.event, style(&summary.git_ref).cyan());
    if let Some(sha) = &summary.sha {
        println!("  Commit: {}", style(sha).dim());
    }
    println!("  Status: {}", format_status(summary.status));
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
    }
    if let Some(duration) = summary.duration().and_then(|d| d.to_std().ok()) {
        println!("  Duration: {}", style(format_duration(duration)).dim());
    }

    println!("  Instances:");
    for instance in &summary.instances {
        let state = match instance.state.as_str() {
            "succeeded" => style(&instance.state).green(),
            "failed" => style(&instance.state).red(),
            _ => style(&instance.state).dim(),
        };
        match &instance.detail {
            Some(detail) if verbose || instance.state == "failed" => {
                println!("    {} {} ({})", instance.label, state, style(detail).dim())
            }
            _ => println!("    {} {}", instance.label, state),
        }
    }

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
