use anyhow::Result;
use std::env;
use std::fs;
use std::path::Path;

use crate::commands::{CommandReport, RunContext};
use crate::dumper::config::unknown_env_keys;
use crate::dumper::lock;
use crate::dumper::model::ProjectKey;
use crate::dumper::naming::parse_target_name;
use crate::dumper::state;

/// Files under `{root}/{KEY}/` that carry the `ID-{id}__` prefix.
fn mirrored_attachments(root: &Path) -> usize {
    let Ok(issue_dirs) = fs::read_dir(root) else {
        return 0;
    };
    issue_dirs
        .flatten()
        .filter_map(|dir| fs::read_dir(dir.path()).ok())
        .flat_map(|entries| entries.flatten())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(parse_target_name)
                .is_some()
        })
        .count()
}

pub fn run(ctx: &RunContext) -> Result<CommandReport> {
    let mut report = CommandReport::new("status");
    let paths = &ctx.paths;

    report.detail(format!("build_uuid={}", env!("BUILD_UUID")));
    report.detail(format!("output_dir={}", paths.output_dir.display()));
    report.detail(format!("state_file={}", paths.state_file().display()));

    match ctx.config.base_url() {
        Ok(base) => report.detail(format!("base_url={base}")),
        Err(_) => report.issue("missing tracker base URL (JIRA_BASE_URL or --base-url)"),
    }

    let has_token = ctx.config.tracker.api_token.is_some();
    let has_auth_state = paths.auth_state_file.is_file();
    report.detail(format!(
        "auth_state={} ({})",
        if has_auth_state { "found" } else { "missing" },
        paths.auth_state_file.display()
    ));
    report.detail(format!("api_token={}", if has_token { "set" } else { "unset" }));
    if !has_auth_state && !has_token {
        report.issue("no credentials: provide an auth state file or JIRA_API_TOKEN");
    }

    report.detail(format!(
        "planner.result_ceiling={} planner.page_size={}",
        ctx.config.planner.result_ceiling, ctx.config.planner.page_size
    ));
    report.detail(format!(
        "http.concurrency={} http.retries={} http.timeout_secs={}",
        ctx.config.http.concurrency, ctx.config.http.retries, ctx.config.http.timeout_secs
    ));

    if lock::is_held(paths)? {
        let holder = lock::read_payload(&paths.lock_file())?
            .map(|p| format!(" pid={} command={}", p.pid, p.command))
            .unwrap_or_default();
        report.detail(format!("run_lock=held{holder}"));
    } else {
        report.detail("run_lock=free");
    }

    let saved = state::load(paths)?;
    for (name, project) in &saved.projects {
        report.detail(format!(
            "project.{name}.planned={} project.{name}.last_plan_range={}",
            project.planned_count,
            project.last_plan_range.as_deref().unwrap_or("none")
        ));
        report.detail(format!(
            "project.{name}.exported={} project.{name}.not_found={} project.{name}.failed_keys={}",
            project.exported_count,
            project.not_found_keys.len(),
            project.failed_keys.len()
        ));
        report.detail(format!(
            "project.{name}.attachments_downloaded={} project.{name}.attachments_skipped={} project.{name}.attachments_failed={}",
            project.last_sync.downloaded + project.last_sync.refreshed,
            project.last_sync.skipped,
            project.last_sync.failed
        ));
        report.detail(format!(
            "project.{name}.attachments_bytes_downloaded={}",
            project.last_sync.bytes_downloaded
        ));
        if let Ok(key) = ProjectKey::parse(name) {
            report.detail(format!(
                "project.{name}.attachments_on_disk={}",
                mirrored_attachments(&paths.attachments_root(&key))
            ));
        }
        if !project.failed_ranges.is_empty() {
            report.issue(format!(
                "project.{name}.failed_ranges={}",
                project.failed_ranges.join(",")
            ));
        }
        if !project.failed_keys.is_empty() {
            report.issue(format!(
                "project.{name} has {} failed exports (jira-dumper export --project {name} --retry-failed)",
                project.failed_keys.len()
            ));
        }
    }

    for key in unknown_env_keys(env::vars_os().filter_map(|(k, _)| k.into_string().ok())) {
        report.issue(format!("unknown env var {key} (ignored by this build)"));
    }

    Ok(report)
}
