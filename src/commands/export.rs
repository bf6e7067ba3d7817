use anyhow::{Result, anyhow};

use crate::commands::{CommandReport, RunContext, audited, parse_project};
use crate::dumper::exporter::export_all;
use crate::dumper::keys::load_keys;
use crate::dumper::lock::RunLock;
use crate::dumper::model::{IssueKey, ProjectKey};
use crate::dumper::session::Session;
use crate::dumper::state;
use crate::dumper::util::now_epoch_secs;

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub project: String,
    /// Explicit keys; when empty the planned identifier list is used.
    pub keys: Vec<String>,
    pub retry_failed: bool,
}

fn select_keys(ctx: &RunContext, project: &ProjectKey, opts: &ExportOptions) -> Result<Vec<IssueKey>> {
    if !opts.keys.is_empty() {
        return opts
            .keys
            .iter()
            .map(|raw| IssueKey::parse(raw).map_err(|err| anyhow!(err)))
            .collect();
    }
    if opts.retry_failed {
        let state = state::load(&ctx.paths)?;
        return Ok(state
            .project(project)
            .map(|p| p.failed_keys.clone())
            .unwrap_or_default());
    }
    load_keys(&ctx.paths, project)
}

pub fn run(ctx: &RunContext, opts: &ExportOptions) -> Result<CommandReport> {
    let project = parse_project(&opts.project)?;
    let _lock = RunLock::acquire(&ctx.paths, "export")?;
    let result = select_keys(ctx, &project, opts).and_then(|keys| {
        let session = ctx.session()?;
        execute(ctx, &session, &project, &keys)
    });
    audited(&ctx.paths, "export", Some(&project), result)
}

pub fn execute(
    ctx: &RunContext,
    session: &dyn Session,
    project: &ProjectKey,
    keys: &[IssueKey],
) -> Result<CommandReport> {
    let mut report = CommandReport::new("export");
    report.detail(format!("project={project}"));
    if keys.is_empty() {
        report.detail("records_exported=0 (nothing to export)");
        return Ok(report);
    }

    let pool = ctx.pool()?;
    let outcome = export_all(session, &ctx.paths, keys, ctx.retry(), &pool)?;

    let failed_keys: Vec<IssueKey> = outcome.failed.iter().map(|f| f.key.clone()).collect();
    let not_found = outcome.not_found.clone();
    let exported = outcome.exported.len();
    let now = now_epoch_secs()?;
    state::update(&ctx.paths, project, |p| {
        p.last_export_epoch_secs = Some(now);
        p.exported_count = exported;
        p.not_found_keys = not_found;
        p.failed_keys = failed_keys;
    })?;

    report.detail(format!("records_requested={}", keys.len()));
    report.detail(format!("records_exported={exported}"));
    report.detail(format!("records_not_found={}", outcome.not_found.len()));
    report.detail(format!("records_failed={}", outcome.failed.len()));
    report.detail(format!("attachments_listed={}", outcome.attachments_listed));
    for key in &outcome.not_found {
        report.detail(format!("not_found={key}"));
    }
    for failed in &outcome.failed {
        report.issue(format!(
            "failed_key={} code={} error={}",
            failed.key, failed.code, failed.error
        ));
    }
    if !outcome.failed.is_empty() {
        report.detail(format!(
            "retry=jira-dumper export --project {project} --retry-failed"
        ));
    }

    tracing::info!(
        %project,
        exported,
        not_found = outcome.not_found.len(),
        failed = outcome.failed.len(),
        "export finished"
    );
    Ok(report)
}
