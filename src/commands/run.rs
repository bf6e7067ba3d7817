use anyhow::Result;

use crate::commands::{CommandReport, RunContext, audited, export, parse_projects, plan, sync};
use crate::dumper::attachments::SyncOptions;
use crate::dumper::date_range::DateRange;
use crate::dumper::keys::load_keys;
use crate::dumper::lock::RunLock;
use crate::dumper::model::ProjectKey;
use crate::dumper::session::Session;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub projects: Vec<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub force: bool,
}

/// Plan, export and sync each project in turn under a single run lock.
pub fn run(ctx: &RunContext, opts: &RunOptions) -> Result<CommandReport> {
    let projects = parse_projects(&opts.projects)?;
    let range = plan::resolve_range(opts.since.as_deref(), opts.until.as_deref())?;
    let _lock = RunLock::acquire(&ctx.paths, "run")?;
    let session = match ctx.session() {
        Ok(session) => session,
        Err(err) => return audited(&ctx.paths, "run", None, Err(err)),
    };

    let mut report = CommandReport::new("run");
    for project in &projects {
        let result = execute(ctx, &session, project, range, opts.force);
        report.merge(audited(&ctx.paths, "run", Some(project), result)?);
    }
    Ok(report)
}

pub fn execute(
    ctx: &RunContext,
    session: &dyn Session,
    project: &ProjectKey,
    range: DateRange,
    force: bool,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("run");

    report.merge(plan::execute(ctx, session, project, range)?);

    let keys = load_keys(&ctx.paths, project)?;
    report.merge(export::execute(ctx, session, project, &keys)?);

    let documents = sync::project_documents(&ctx.paths, project)?;
    let opts = SyncOptions {
        dry_run: false,
        force,
    };
    report.merge(sync::execute(ctx, session, Some(project), &documents, opts)?);

    Ok(report)
}
