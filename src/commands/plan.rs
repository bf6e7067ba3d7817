use anyhow::{Result, anyhow};
use chrono::{Days, NaiveDate};

use crate::commands::{CommandReport, RunContext, audited, parse_projects};
use crate::dumper::date_range::{DateRange, parse_day};
use crate::dumper::keys;
use crate::dumper::lock::RunLock;
use crate::dumper::model::ProjectKey;
use crate::dumper::planner::{Planner, PlannerSettings};
use crate::dumper::session::Session;
use crate::dumper::state;
use crate::dumper::util::now_epoch_secs;

/// How far back planning reaches when `--since` is omitted.
pub const DEFAULT_LOOKBACK_DAYS: u64 = 730;

#[derive(Debug, Clone)]
pub struct PlanOptions {
    pub projects: Vec<String>,
    /// Defaults to `DEFAULT_LOOKBACK_DAYS` before `until`'s default.
    pub since: Option<String>,
    /// Defaults to today (UTC).
    pub until: Option<String>,
}

fn resolve_range_at(
    today: NaiveDate,
    since: Option<&str>,
    until: Option<&str>,
) -> Result<DateRange> {
    let start = match since {
        Some(raw) => parse_day(raw).map_err(|err| anyhow!(err))?,
        None => today
            .checked_sub_days(Days::new(DEFAULT_LOOKBACK_DAYS))
            .unwrap_or(today),
    };
    let end = match until {
        Some(raw) => parse_day(raw).map_err(|err| anyhow!(err))?,
        None => today,
    };
    Ok(DateRange::new(start, end))
}

pub fn resolve_range(since: Option<&str>, until: Option<&str>) -> Result<DateRange> {
    resolve_range_at(chrono::Utc::now().date_naive(), since, until)
}

/// Plan each project in turn under one lock and one session.
///
/// A rejected session aborts the remaining projects; every attempted project
/// gets its own audit event.
pub fn run(ctx: &RunContext, opts: &PlanOptions) -> Result<CommandReport> {
    let projects = parse_projects(&opts.projects)?;
    let range = resolve_range(opts.since.as_deref(), opts.until.as_deref())?;
    let _lock = RunLock::acquire(&ctx.paths, "plan")?;
    let session = match ctx.session() {
        Ok(session) => session,
        Err(err) => return audited(&ctx.paths, "plan", None, Err(err)),
    };

    let mut report = CommandReport::new("plan");
    for project in &projects {
        let result = execute(ctx, &session, project, range);
        report.merge(audited(&ctx.paths, "plan", Some(project), result)?);
    }
    Ok(report)
}

pub fn execute(
    ctx: &RunContext,
    session: &dyn Session,
    project: &ProjectKey,
    range: DateRange,
) -> Result<CommandReport> {
    let mut report = CommandReport::new("plan");
    let planner = Planner::new(
        session,
        PlannerSettings {
            result_ceiling: ctx.config.planner.result_ceiling,
            page_size: ctx.config.planner.page_size,
            retry: ctx.retry(),
        },
    );
    let pool = ctx.pool()?;
    let outcome = pool.install(|| planner.plan(project, range))?;

    let saved = keys::save_plan(&ctx.paths, project, outcome.rows())?;
    let failed_ranges: Vec<String> = outcome
        .failed_ranges
        .iter()
        .map(|f| f.range.to_string())
        .collect();
    let now = now_epoch_secs()?;
    state::update(&ctx.paths, project, |p| {
        p.last_plan_epoch_secs = Some(now);
        p.last_plan_range = Some(range.to_string());
        p.planned_count = saved.total;
        p.plan_queries = outcome.queries;
        p.failed_ranges = failed_ranges;
    })?;

    report.detail(format!("project={project}"));
    report.detail(format!("range={range}"));
    report.detail(format!("queries={}", outcome.queries));
    report.detail(format!("records_planned={}", outcome.issues.len()));
    report.detail(format!("keys_total={}", saved.total));
    report.detail(format!("keys_new={}", saved.added));
    report.detail(format!("keys_file={}", saved.path.display()));
    for failed in &outcome.failed_ranges {
        report.issue(format!(
            "failed_range={} error={} (re-run plan for this range)",
            failed.range, failed.error
        ));
    }

    tracing::info!(
        %project,
        %range,
        planned = outcome.issues.len(),
        new = saved.added,
        failed_ranges = outcome.failed_ranges.len(),
        "plan finished"
    );
    Ok(report)
}
