use crate::dumper::model::{IssueKey, IssueRow, ProjectKey};
use crate::dumper::paths::DumperPaths;
use crate::dumper::util::write_atomic;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct KeysWriteOutcome {
    pub path: PathBuf,
    pub total: usize,
    pub added: usize,
}

fn parse_line(line: &str) -> Result<IssueRow> {
    if line.starts_with('{') {
        return Ok(serde_json::from_str(line)?);
    }
    // Hand-written lists may carry bare keys.
    let key = IssueKey::parse(line).map_err(|err| anyhow::anyhow!(err))?;
    Ok(IssueRow {
        id: String::new(),
        key,
        summary: String::new(),
        url: String::new(),
    })
}

pub fn read_rows(path: &Path) -> Result<Vec<IssueRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let row = parse_line(trimmed)
            .with_context(|| format!("failed to parse line {} of {}", idx + 1, path.display()))?;
        out.push(row);
    }
    Ok(out)
}

/// Union `fresh` into `existing` by key; fresh rows win. Returns the sorted
/// rows and how many keys were not present before.
pub fn merge_rows(existing: Vec<IssueRow>, fresh: Vec<IssueRow>) -> (Vec<IssueRow>, usize) {
    let mut by_key: BTreeMap<IssueKey, IssueRow> = existing
        .into_iter()
        .map(|row| (row.key.clone(), row))
        .collect();
    let mut added = 0usize;
    for row in fresh {
        if by_key.insert(row.key.clone(), row).is_none() {
            added += 1;
        }
    }
    let mut rows: Vec<IssueRow> = by_key.into_values().collect();
    rows.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()).then_with(|| a.key.cmp(&b.key)));
    (rows, added)
}

fn render_rows(rows: &[IssueRow]) -> Result<String> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn save_plan(
    paths: &DumperPaths,
    project: &ProjectKey,
    fresh: Vec<IssueRow>,
) -> Result<KeysWriteOutcome> {
    let path = paths.keys_file(project);
    let existing = read_rows(&path)?;
    let (rows, added) = merge_rows(existing, fresh);
    let body = render_rows(&rows)?;
    write_atomic(&path, body.as_bytes(), None)?;
    Ok(KeysWriteOutcome {
        path,
        total: rows.len(),
        added,
    })
}

pub fn load_keys(paths: &DumperPaths, project: &ProjectKey) -> Result<Vec<IssueKey>> {
    let path = paths.keys_file(project);
    if !path.exists() {
        anyhow::bail!(
            "no identifier list at {} (run `jira-dumper plan --project {}` first)",
            path.display(),
            project
        );
    }
    Ok(read_rows(&path)?.into_iter().map(|row| row.key).collect())
}
