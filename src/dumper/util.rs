use crate::error::DumperError;
use anyhow::Result;
use filetime::FileTime;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Return the current Unix epoch in seconds.
pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Bounded pool shared by the export and sync stages; `threads` caps in-flight requests.
pub fn worker_pool(threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|idx| format!("jira-dumper-{idx}"))
        .build()
        .map_err(|err| anyhow::anyhow!("failed to build worker pool: {err}"))
}

/// Modification time of `path` in whole Unix seconds, `None` when it does not exist.
pub fn modified_epoch_secs(path: &Path) -> Result<Option<i64>, DumperError> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(
            FileTime::from_last_modification_time(&meta).unix_seconds(),
        )),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(DumperError::persistence(path, err)),
    }
}

/// Write `bytes` to `dest` through a temporary sibling file and an atomic rename.
///
/// When `mtime_epoch_secs` is given it is stamped on the temporary file before
/// the rename, so the final path never exists with a wrong timestamp.
pub fn write_atomic(
    dest: &Path,
    bytes: &[u8],
    mtime_epoch_secs: Option<i64>,
) -> Result<(), DumperError> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| DumperError::persistence(parent, err))?;

    let mut builder = tempfile::Builder::new();
    builder.prefix(".partial-");
    // Same mode a plain create would get; tempfile defaults to 0600.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder
        .tempfile_in(parent)
        .map_err(|err| DumperError::persistence(parent, err))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| DumperError::persistence(tmp.path(), err))?;

    if let Some(secs) = mtime_epoch_secs {
        filetime::set_file_mtime(tmp.path(), FileTime::from_unix_time(secs, 0))
            .map_err(|err| DumperError::persistence(tmp.path(), err))?;
    }

    tmp.persist(dest)
        .map_err(|err| DumperError::persistence(dest, err.error))?;
    Ok(())
}
