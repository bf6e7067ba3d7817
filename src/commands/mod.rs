pub mod export;
pub mod plan;
pub mod run;
pub mod status;
pub mod sync;

use crate::dumper::audit;
use crate::dumper::config::{DumperConfig, load_config};
use crate::dumper::model::ProjectKey;
use crate::dumper::paths::{DumperPaths, resolve_paths};
use crate::dumper::retry::RetryPolicy;
use crate::dumper::session::CookieSession;
use crate::dumper::util::worker_pool;
use anyhow::{Result, anyhow};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn merge(&mut self, mut other: CommandReport) {
        self.ok &= other.ok;
        self.details.append(&mut other.details);
        self.issues.append(&mut other.issues);
    }
}

/// Resolved paths and configuration shared by every command.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub paths: DumperPaths,
    pub config: DumperConfig,
}

impl RunContext {
    pub fn load(output_dir: Option<&Path>, base_url: Option<&str>) -> Result<Self> {
        Ok(Self {
            paths: resolve_paths(output_dir)?,
            config: load_config(base_url)?,
        })
    }

    pub fn session(&self) -> Result<CookieSession> {
        CookieSession::new(
            self.config.base_url()?,
            &self.paths.auth_state_file,
            self.config.tracker.api_token.clone(),
            self.config.http.timeout_secs,
        )
    }

    pub fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.http.retries, self.config.http.retry_delay_ms)
    }

    pub fn pool(&self) -> Result<rayon::ThreadPool> {
        worker_pool(self.config.http.concurrency)
    }
}

pub fn parse_project(raw: &str) -> Result<ProjectKey> {
    ProjectKey::parse(raw).map_err(|err| anyhow!(err))
}

/// Parse repeated `--project` values, dropping repeats and keeping first-seen order.
pub fn parse_projects(raw: &[String]) -> Result<Vec<ProjectKey>> {
    let mut out: Vec<ProjectKey> = Vec::new();
    for value in raw {
        let project = parse_project(value)?;
        if !out.contains(&project) {
            out.push(project);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("at least one --project is required"));
    }
    Ok(out)
}

/// Append one audit event describing `result`, then hand `result` back.
pub fn audited(
    paths: &DumperPaths,
    command: &str,
    project: Option<&ProjectKey>,
    result: Result<CommandReport>,
) -> Result<CommandReport> {
    let (status, message) = match &result {
        Ok(report) if report.ok => ("ok", report.details.join("; ")),
        Ok(report) => ("issues", report.issues.join("; ")),
        Err(err) => ("failed", format!("{err:#}")),
    };
    if let Err(err) = audit::append_event(
        paths,
        command,
        project.map(ProjectKey::as_str),
        status,
        &message,
    ) {
        tracing::warn!(error = %err, "failed to append audit event");
    }
    result
}
