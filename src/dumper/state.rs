use crate::dumper::attachments::SyncCounts;
use crate::dumper::model::{IssueKey, ProjectKey};
use crate::dumper::paths::DumperPaths;
use crate::dumper::util::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectState {
    pub last_plan_epoch_secs: Option<u64>,
    pub last_plan_range: Option<String>,
    pub planned_count: usize,
    pub plan_queries: usize,
    pub failed_ranges: Vec<String>,
    pub last_export_epoch_secs: Option<u64>,
    pub exported_count: usize,
    pub not_found_keys: Vec<IssueKey>,
    /// Input for `export --retry-failed`.
    pub failed_keys: Vec<IssueKey>,
    pub last_sync_epoch_secs: Option<u64>,
    pub last_sync: SyncCounts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DumperState {
    pub schema_version: u32,
    pub projects: BTreeMap<String, ProjectState>,
}

impl Default for DumperState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            projects: BTreeMap::new(),
        }
    }
}

impl DumperState {
    pub fn project(&self, project: &ProjectKey) -> Option<&ProjectState> {
        self.projects.get(project.as_str())
    }

    pub fn project_mut(&mut self, project: &ProjectKey) -> &mut ProjectState {
        self.projects.entry(project.as_str().to_string()).or_default()
    }
}

pub fn load(paths: &DumperPaths) -> Result<DumperState> {
    let file = paths.state_file();
    if !file.exists() {
        return Ok(DumperState::default());
    }

    let raw =
        fs::read_to_string(&file).with_context(|| format!("failed to read {}", file.display()))?;
    let parsed: DumperState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", file.display()))?;
    Ok(parsed)
}

pub fn save(paths: &DumperPaths, state: &DumperState) -> Result<PathBuf> {
    let file = paths.state_file();
    let data = serde_json::to_string_pretty(state)?;
    write_atomic(&file, format!("{data}\n").as_bytes(), None)?;
    Ok(file)
}

/// Load, apply `f` to the project's entry, and save.
pub fn update(
    paths: &DumperPaths,
    project: &ProjectKey,
    f: impl FnOnce(&mut ProjectState),
) -> Result<PathBuf> {
    let mut state = load(paths)?;
    f(state.project_mut(project));
    save(paths, &state)
}
