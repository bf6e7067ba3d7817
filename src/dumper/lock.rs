use crate::dumper::paths::DumperPaths;
use crate::dumper::util::now_epoch_secs;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockPayload {
    pub pid: u32,
    pub command: String,
    pub build_uuid: String,
    pub started_at_epoch_secs: u64,
}

/// Exclusive hold on `{output}/.jira-dumper/run.lock`, released on drop.
#[derive(Debug)]
pub struct RunLock {
    file: File,
}

impl RunLock {
    pub fn acquire(paths: &DumperPaths, command: &str) -> Result<Self> {
        fs::create_dir_all(&paths.state_dir)
            .with_context(|| format!("failed to create {}", paths.state_dir.display()))?;
        let path = paths.lock_file();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            let holder = read_payload(&path)
                .ok()
                .flatten()
                .map(|p| format!(" (pid {} running `{}`)", p.pid, p.command))
                .unwrap_or_default();
            anyhow::bail!(
                "another jira-dumper run holds {}{holder}",
                path.display()
            );
        }

        let payload = LockPayload {
            pid: std::process::id(),
            command: command.to_string(),
            build_uuid: env!("BUILD_UUID").to_string(),
            started_at_epoch_secs: now_epoch_secs()?,
        };
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serde_json::to_string(&payload)?.as_bytes())?;
        file.sync_all()?;
        tracing::debug!(path = %path.display(), command, "run lock acquired");
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = FileExt::unlock(&self.file);
    }
}

/// Last payload written to the lock file; `None` when absent or released.
pub fn read_payload(path: &Path) -> Result<Option<LockPayload>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let payload = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(payload))
}

/// True when some process currently holds the run lock.
pub fn is_held(paths: &DumperPaths) -> Result<bool> {
    let path = paths.lock_file();
    if !path.exists() {
        return Ok(false);
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    if file.try_lock_exclusive().is_ok() {
        let _ = FileExt::unlock(&file);
        return Ok(false);
    }
    Ok(true)
}
