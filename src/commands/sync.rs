use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use crate::commands::{CommandReport, RunContext, audited, parse_project};
use crate::dumper::attachments::{AttachmentAction, SyncOptions, sync_all};
use crate::dumper::lock::RunLock;
use crate::dumper::model::ProjectKey;
use crate::dumper::paths::DumperPaths;
use crate::dumper::session::Session;
use crate::dumper::state;
use crate::dumper::util::now_epoch_secs;

#[derive(Debug, Clone, Default)]
pub struct SyncCommandOptions {
    pub project: Option<String>,
    pub documents: Vec<PathBuf>,
    pub dry_run: bool,
    pub force: bool,
}

/// Every `*.xml` export directly under the project directory.
pub fn project_documents(paths: &DumperPaths, project: &ProjectKey) -> Result<Vec<PathBuf>> {
    let dir = paths.project_dir(project);
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("xml") {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn collect_documents(
    paths: &DumperPaths,
    project: Option<&ProjectKey>,
    explicit: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let mut docs: BTreeSet<PathBuf> = explicit.iter().cloned().collect();
    if let Some(project) = project {
        docs.extend(project_documents(paths, project)?);
    }
    Ok(docs.into_iter().collect())
}

pub fn run(ctx: &RunContext, opts: &SyncCommandOptions) -> Result<CommandReport> {
    let project = opts.project.as_deref().map(parse_project).transpose()?;
    if project.is_none() && opts.documents.is_empty() {
        anyhow::bail!("nothing to sync: pass export document paths or --project");
    }
    let documents = collect_documents(&ctx.paths, project.as_ref(), &opts.documents)?;
    let sync_opts = SyncOptions {
        dry_run: opts.dry_run,
        force: opts.force,
    };

    // A dry run must leave the output tree untouched, bookkeeping included.
    if opts.dry_run {
        let session = ctx.session()?;
        return execute(ctx, &session, project.as_ref(), &documents, sync_opts);
    }

    let _lock = RunLock::acquire(&ctx.paths, "sync")?;
    let result = ctx
        .session()
        .and_then(|session| execute(ctx, &session, project.as_ref(), &documents, sync_opts));
    audited(&ctx.paths, "sync", project.as_ref(), result)
}

pub fn execute(
    ctx: &RunContext,
    session: &dyn Session,
    project: Option<&ProjectKey>,
    documents: &[PathBuf],
    opts: SyncOptions,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("sync");
    report.detail(format!("documents={}", documents.len()));
    if opts.dry_run {
        report.detail("dry_run=true");
    }

    let pool = ctx.pool()?;
    let outcome = sync_all(session, &ctx.paths, documents, opts, ctx.retry(), &pool)?;
    let counts = outcome.counts();

    for result in &outcome.results {
        let path = result
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match result.action {
            AttachmentAction::WouldDownload | AttachmentAction::WouldRefresh => {
                let verb = if result.action == AttachmentAction::WouldDownload {
                    "would_download"
                } else {
                    "would_refresh"
                };
                report.detail(format!(
                    "{verb} key={} id={} path={path} source={}",
                    result.key,
                    result.id,
                    result.source.as_deref().unwrap_or("")
                ));
            }
            AttachmentAction::Failed => report.issue(format!(
                "failed_attachment key={} id={} error={}",
                result.key,
                result.id,
                result.error.as_deref().unwrap_or("unknown")
            )),
            _ => {}
        }
    }
    for failed in &outcome.failed_documents {
        report.issue(format!(
            "failed_document={} error={}",
            failed.path.display(),
            failed.error
        ));
    }

    report.detail(format!("attachments_downloaded={}", counts.downloaded));
    report.detail(format!("attachments_refreshed={}", counts.refreshed));
    report.detail(format!("attachments_skipped={}", counts.skipped));
    report.detail(format!("attachments_failed={}", counts.failed));
    report.detail(format!("bytes_downloaded={}", counts.bytes_downloaded));
    if opts.dry_run {
        report.detail(format!("attachments_planned={}", counts.planned));
        report.detail(format!("bytes_planned={}", counts.bytes_planned));
    } else if let Some(project) = project {
        let now = now_epoch_secs()?;
        state::update(&ctx.paths, project, |p| {
            p.last_sync_epoch_secs = Some(now);
            p.last_sync = counts;
        })?;
    }

    tracing::info!(
        documents = documents.len(),
        downloaded = counts.downloaded,
        refreshed = counts.refreshed,
        skipped = counts.skipped,
        failed = counts.failed,
        bytes_downloaded = counts.bytes_downloaded,
        dry_run = opts.dry_run,
        "sync finished"
    );
    Ok(report)
}
