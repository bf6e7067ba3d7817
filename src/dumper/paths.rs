use crate::dumper::model::{IssueKey, ProjectKey};
use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

/// On-disk layout of one archive root.
///
/// ```text
/// {output_dir}/{PROJECT}.jsonl                              identifier list
/// {output_dir}/{PROJECT}/{KEY}.xml                          export documents
/// {output_dir}/{PROJECT}/attachments/{KEY}/ID-{id}__{name}  attachment mirror
/// {output_dir}/.jira-dumper/{state.json,run.lock,logs/}     bookkeeping
/// ```
#[derive(Debug, Clone)]
pub struct DumperPaths {
    pub output_dir: PathBuf,
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub auth_state_file: PathBuf,
}

impl DumperPaths {
    pub fn under(output_dir: &Path) -> Self {
        let state_dir = output_dir.join(".jira-dumper");
        Self {
            output_dir: output_dir.to_path_buf(),
            logs_dir: state_dir.join("logs"),
            auth_state_file: state_dir.join("auth_state.json"),
            state_dir,
        }
    }

    pub fn keys_file(&self, project: &ProjectKey) -> PathBuf {
        self.output_dir.join(format!("{}.jsonl", project.as_str()))
    }

    pub fn project_dir(&self, project: &ProjectKey) -> PathBuf {
        self.output_dir.join(project.as_str())
    }

    pub fn document_path(&self, project: &ProjectKey, key: &IssueKey) -> PathBuf {
        self.project_dir(project).join(format!("{}.xml", key.as_str()))
    }

    pub fn attachments_root(&self, project: &ProjectKey) -> PathBuf {
        self.project_dir(project).join("attachments")
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("run.lock")
    }
}

fn env_path(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

pub fn resolve_paths(output_override: Option<&Path>) -> Result<DumperPaths> {
    let output_dir = match output_override {
        Some(dir) => dir.to_path_buf(),
        None => env_path("JIRA_DUMPER_OUTPUT_DIR").ok_or_else(|| {
            anyhow::anyhow!("JIRA_DUMPER_OUTPUT_DIR is not set (or pass --output-dir)")
        })?,
    };

    let mut paths = DumperPaths::under(&output_dir);
    if let Some(auth_state) = env_path("JIRA_DUMPER_AUTH_STATE") {
        paths.auth_state_file = auth_state;
    }
    Ok(paths)
}
