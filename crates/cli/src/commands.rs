//! Subcommand implementations.
//!
//! Each command builds only the infrastructure it needs, so `validate`,
//! `generate` and dry runs work without tracker credentials.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use jira::JiraTracker;
use llm::{FallbackGenerator, LocalEndpointGenerator, OpenAiConfig, OpenAiGenerator};
use nodes::{
    BacklogWorkflow, CommitReport, PlannedBacklog, ReviewGate, SyncEngine, SyncOutcome,
    SyncReport, WorkflowError, WorkflowSettings,
};
use pipeline::{
    validate_with, MappedIssue, Mapper, SchemaError, SyncRecord, SyncRecordStore, SyncStatus,
    TaskBacklog,
};
use serde::Serialize;
use serde_json::{json, Value};
use store::JsonFileStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::args::{Command, Secrets};
use crate::config::AppConfig;

/// Exit status when a backlog fails validation.
const EXIT_INVALID: u8 = 2;

/// Everything a command needs besides its own arguments.
pub struct Invocation {
    pub config: AppConfig,
    pub secrets: Secrets,
    pub json: bool,
    pub cancel: CancellationToken,
}

pub async fn run(command: Command, inv: &Invocation) -> anyhow::Result<ExitCode> {
    match command {
        Command::Generate { description } => generate(inv, &description).await,
        Command::Validate { file } => validate(inv, &file),
        Command::Sync { file, dry_run } => sync(inv, &file, dry_run).await,
        Command::Plan {
            description,
            dry_run,
        } => plan(inv, &description, dry_run).await,
        Command::Records => records(inv).await,
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn generate(inv: &Invocation, description: &str) -> anyhow::Result<ExitCode> {
    let workflow = workflow(inv)?;
    match workflow.plan(description, &inv.cancel).await {
        Ok(planned) => {
            // The backlog is the output, text mode included, so it can be piped
            // straight into `tasksmith sync`.
            print_json(&planned.backlog)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(WorkflowError::Schema { source, .. }) => Ok(report_invalid(inv, &source)),
        Err(err) => Err(err).context("backlog generation failed"),
    }
}

fn validate(inv: &Invocation, file: &Path) -> anyhow::Result<ExitCode> {
    let raw = read_backlog(file)?;
    match validate_with(&raw, &inv.config.limits()) {
        Ok(backlog) => {
            if inv.json {
                print_json(&json!({ "valid": true, "backlog": backlog }))?;
            } else {
                println!("{} is valid: {} task(s)", file.display(), backlog.len());
                print_backlog(&backlog);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => Ok(report_invalid(inv, &err)),
    }
}

async fn sync(inv: &Invocation, file: &Path, dry_run: bool) -> anyhow::Result<ExitCode> {
    let raw = read_backlog(file)?;
    let backlog = match validate_with(&raw, &inv.config.limits()) {
        Ok(backlog) => backlog,
        Err(err) => return Ok(report_invalid(inv, &err)),
    };
    let issues = mapper(inv)?
        .map(&backlog)
        .context("backlog could not be mapped to tracker issues")?;
    let store = open_store(inv).await?;

    if dry_run {
        return preview(inv, store.as_ref(), &issues).await;
    }

    let engine = engine(inv, store)?;
    let report = engine
        .synchronize(issues, &inv.cancel)
        .await
        .context("synchronization aborted")?;
    print_sync(inv, &report)?;
    Ok(exit_for(&report))
}

async fn plan(inv: &Invocation, description: &str, dry_run: bool) -> anyhow::Result<ExitCode> {
    let mut workflow = workflow(inv)?;
    let store = open_store(inv).await?;
    if !dry_run {
        workflow = workflow.with_engine(engine(inv, store.clone())?);
    }
    let review = inv.config.coordinator_settings();
    debug!(
        policy = ?review.policy,
        handshake_timeout = ?review.handshake_timeout,
        "No collaboration transport; review runs single-user"
    );

    let planned: PlannedBacklog = match workflow.plan(description, &inv.cancel).await {
        Ok(planned) => planned,
        Err(WorkflowError::Schema { source, .. }) => return Ok(report_invalid(inv, &source)),
        Err(err) => return Err(err).context("backlog generation failed"),
    };

    if dry_run {
        return preview(inv, store.as_ref(), &planned.issues).await;
    }

    let report = workflow
        .commit(planned, &inv.cancel)
        .await
        .context("commit failed")?;
    print_commit(inv, &report)?;
    Ok(exit_for(&report.sync))
}

async fn records(inv: &Invocation) -> anyhow::Result<ExitCode> {
    let store = open_store(inv).await?;
    let records = store.list().await.context("failed to read sync records")?;

    if inv.json {
        print_json(&records)?;
    } else if records.is_empty() {
        println!("no sync records in {}", store.path().display());
    } else {
        for record in &records {
            println!("{}", record_line(record));
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn mapper(inv: &Invocation) -> anyhow::Result<Mapper> {
    Ok(Mapper::new(inv.config.mapper_config()?)?)
}

/// A workflow whose generation bound covers a full pass over the provider chain.
fn workflow(inv: &Invocation) -> anyhow::Result<BacklogWorkflow> {
    let chain = generator(inv)?;
    let settings = generation_settings(inv.config.workflow_settings(), &chain);
    Ok(BacklogWorkflow::new(Arc::new(chain), mapper(inv)?, settings))
}

fn generation_settings(settings: WorkflowSettings, chain: &FallbackGenerator) -> WorkflowSettings {
    WorkflowSettings {
        generation_timeout: chain
            .chain_timeout()
            .unwrap_or(settings.generation_timeout),
        ..settings
    }
}

fn generator(inv: &Invocation) -> anyhow::Result<FallbackGenerator> {
    let settings = &inv.config.generator;
    let timeout = Duration::from_secs(settings.timeout_secs);
    let mut chain = FallbackGenerator::new().with_provider_timeout(timeout);

    if let Some(endpoint) = &settings.local_endpoint {
        chain = chain.then(Arc::new(LocalEndpointGenerator::new(endpoint, timeout)?));
    }
    if let Some(key) = inv.secrets.openai_key.as_deref().filter(|k| !k.trim().is_empty()) {
        chain = chain.then(Arc::new(OpenAiGenerator::new(OpenAiConfig {
            api_key: key.to_string(),
            model: settings.model.clone(),
            project: settings.openai_project.clone(),
            base_url: settings.openai_base_url.clone(),
            timeout,
        })?));
    }
    if chain.is_empty() {
        bail!("no generative service configured: set generator.local_endpoint or OPENAI_API_KEY");
    }
    info!(providers = ?chain.provider_names(), "Generator chain ready");
    Ok(chain)
}

async fn open_store(inv: &Invocation) -> anyhow::Result<Arc<JsonFileStore>> {
    let path = &inv.config.sync.records_path;
    let store = JsonFileStore::open(path)
        .await
        .with_context(|| format!("failed to open sync records at {}", path.display()))?;
    Ok(Arc::new(store))
}

fn engine(inv: &Invocation, store: Arc<JsonFileStore>) -> anyhow::Result<SyncEngine> {
    let config = inv.config.jira_config(inv.secrets.jira_token.as_deref())?;
    let tracker = JiraTracker::new(config).context("failed to set up the Jira client")?;
    Ok(SyncEngine::new(
        Arc::new(tracker),
        store,
        inv.config.sync_settings(),
    ))
}

// ---------------------------------------------------------------------------
// Dry runs
// ---------------------------------------------------------------------------

/// What a sync would do for `issue`, judged from the stored record alone.
fn planned_action(record: Option<&SyncRecord>, issue: &MappedIssue) -> &'static str {
    match record {
        Some(record) if record.status == SyncStatus::Created && record.remote_id.is_some() => {
            if record.is_current(&issue.content_hash) {
                "skip"
            } else {
                "update"
            }
        }
        _ => "create",
    }
}

#[derive(Serialize)]
struct PreviewEntry<'a> {
    action: &'static str,
    fingerprint: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_key: Option<String>,
    payload: &'a pipeline::IssuePayload,
}

async fn preview(
    inv: &Invocation,
    store: &dyn SyncRecordStore,
    issues: &[MappedIssue],
) -> anyhow::Result<ExitCode> {
    let mut entries = Vec::with_capacity(issues.len());
    for issue in issues {
        let record = store
            .get(&issue.fingerprint)
            .await
            .context("failed to read sync records")?;
        entries.push(PreviewEntry {
            action: planned_action(record.as_ref(), issue),
            fingerprint: issue.fingerprint.as_str(),
            remote_key: record
                .and_then(|r| r.remote_key)
                .map(|key| key.to_string()),
            payload: &issue.payload,
        });
    }

    if inv.json {
        print_json(&entries)?;
    } else {
        for (entry, issue) in entries.iter().zip(issues) {
            println!(
                "{:<7} {:<10} {}  [{}] {}",
                entry.action,
                entry.remote_key.as_deref().unwrap_or("-"),
                issue.fingerprint.short(),
                issue.payload.issue_type,
                issue.payload.summary
            );
        }
        println!("dry run: nothing was sent to the tracker");
    }
    Ok(ExitCode::SUCCESS)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn read_backlog(file: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", file.display()))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report_invalid(inv: &Invocation, err: &SchemaError) -> ExitCode {
    if inv.json {
        let body = json!({ "valid": false, "violations": err.violations });
        println!("{body:#}");
    } else {
        eprintln!("backlog is invalid ({} violation(s)):", err.violations.len());
        for violation in &err.violations {
            eprintln!("  {violation}");
        }
    }
    ExitCode::from(EXIT_INVALID)
}

fn print_backlog(backlog: &TaskBacklog) {
    for task in backlog.tasks() {
        let priority = task.priority().map_or("-", |p| p.as_str());
        println!(
            "  {:<5} {:<7} {}",
            task.effective_type().as_str(),
            priority,
            task.title()
        );
    }
}

fn outcome_line(entry: &nodes::IssueReport) -> String {
    let (label, remote) = match &entry.outcome {
        SyncOutcome::Created { remote } => ("created", remote.to_string()),
        SyncOutcome::Updated { remote } => ("updated", remote.to_string()),
        SyncOutcome::Skipped { remote } => ("skipped", remote.to_string()),
        SyncOutcome::Failed { .. } => ("failed", "-".to_string()),
        SyncOutcome::Cancelled => ("cancelled", "-".to_string()),
    };
    let mut line = format!(
        "{label:<9} {remote:<10} {}  {}",
        entry.fingerprint.short(),
        entry.summary
    );
    if let SyncOutcome::Failed { error } = &entry.outcome {
        line.push_str(&format!("\n          error: {error}"));
    }
    line
}

fn print_sync(inv: &Invocation, report: &SyncReport) -> anyhow::Result<()> {
    if inv.json {
        return print_json(report);
    }
    for entry in &report.entries {
        println!("{}", outcome_line(entry));
    }
    println!(
        "run {}: {} created, {} updated, {} skipped, {} failed, {} cancelled",
        report.run_id,
        report.created(),
        report.updated(),
        report.skipped(),
        report.failed(),
        report.cancelled()
    );
    Ok(())
}

fn print_commit(inv: &Invocation, report: &CommitReport) -> anyhow::Result<()> {
    if inv.json {
        return print_json(report);
    }
    match report.gate {
        ReviewGate::Unrestricted => {}
        ReviewGate::Reviewed => println!("review: {} entries rejected", report.rejected.len()),
        ReviewGate::SessionEnded(reason) => {
            println!("review: session ended ({reason}); committed as single user");
        }
    }
    print_sync(inv, &report.sync)
}

fn record_line(record: &SyncRecord) -> String {
    let status = match record.status {
        SyncStatus::Pending => "pending",
        SyncStatus::Created => "created",
        SyncStatus::Failed => "failed",
    };
    let remote = record
        .remote_key
        .as_ref()
        .map(ToString::to_string)
        .or_else(|| record.remote_id.as_ref().map(|id| format!("#{id}")))
        .unwrap_or_else(|| "-".to_string());
    let mut line = format!(
        "{status:<8} {remote:<10} {}  {}  {}",
        record.fingerprint.short(),
        record.updated_at,
        record.summary
    );
    if let Some(error) = &record.last_error {
        line.push_str(&format!("\n         error: {error}"));
    }
    line
}

fn exit_for(report: &SyncReport) -> ExitCode {
    if report.is_complete_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use pipeline::{validate, ContentHash, MapperConfig, ProjectKey};
    use serde_json::json;

    use super::*;

    fn mapped(raw: Value) -> Vec<MappedIssue> {
        let config = MapperConfig::canonical(ProjectKey::new("PROJ").unwrap());
        let mapper = Mapper::new(config).unwrap();
        mapper.map(&validate(&raw).unwrap()).unwrap()
    }

    fn created(issue: &MappedIssue, hash: ContentHash) -> SyncRecord {
        SyncRecord::pending(issue.fingerprint.clone(), issue.payload.summary.clone()).created(
            pipeline::RemoteIssueId::new("10001").unwrap(),
            pipeline::IssueKey::new("PROJ-1"),
            hash,
            None,
        )
    }

    #[test]
    fn generation_bound_covers_the_whole_chain() {
        let config = AppConfig::parse(
            "[generator]\nlocal_endpoint = \"http://localhost:8080/generate\"\ntimeout_secs = 20\n",
        )
        .unwrap();
        let inv = Invocation {
            config,
            secrets: Secrets {
                jira_token: None,
                openai_key: Some("sk-test".into()),
            },
            json: false,
            cancel: CancellationToken::new(),
        };

        let chain = generator(&inv).unwrap();
        assert_eq!(chain.provider_names(), ["local", "openai"]);
        let settings = generation_settings(inv.config.workflow_settings(), &chain);
        assert_eq!(settings.generation_timeout, Duration::from_secs(40));
        assert_eq!(settings.max_reprompts, inv.config.generator.max_reprompts);
    }

    #[test]
    fn dry_run_actions_follow_the_stored_record() {
        let issue = &mapped(json!({ "tasks": [{ "title": "Fix bug" }] }))[0];
        let other = &mapped(json!({ "tasks": [{ "title": "Fix bug", "description": "v2" }] }))[0];

        assert_eq!(planned_action(None, issue), "create");

        let pending = SyncRecord::pending(issue.fingerprint.clone(), "Fix bug");
        assert_eq!(planned_action(Some(&pending), issue), "create");

        let current = created(issue, issue.content_hash.clone());
        assert_eq!(planned_action(Some(&current), issue), "skip");

        let stale = created(issue, other.content_hash.clone());
        assert_eq!(planned_action(Some(&stale), issue), "update");

        let failed = pending.failed("tracker rejected the request (400)");
        assert_eq!(planned_action(Some(&failed), issue), "create");
    }

    #[test]
    fn failed_records_show_their_error() {
        let record = SyncRecord::pending(
            pipeline::Fingerprint::derive(None, "Fix bug", "Task"),
            "Fix bug",
        )
        .failed("tracker rejected the request (400)");
        let line = record_line(&record);
        assert!(line.starts_with("failed"));
        assert!(line.contains("error: tracker rejected the request (400)"));
    }
}
