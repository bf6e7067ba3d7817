use crate::dumper::document::parse_document;
use crate::dumper::model::{ExportDocument, IssueKey};
use crate::dumper::paths::DumperPaths;
use crate::dumper::retry::RetryPolicy;
use crate::dumper::session::{Session, fetch};
use crate::dumper::util::write_atomic;
use crate::dumper::warn::{self, WarnEvent};
use crate::error::DumperError;
use rayon::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub const EXPORT_PATH: &str = "/si/jira.issueviews:issue-xml";

pub fn export_url(base_url: &str, key: &IssueKey) -> String {
    format!("{base_url}{EXPORT_PATH}/{key}/{key}.xml")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Exported {
        path: PathBuf,
        document: ExportDocument,
    },
    NotFound,
}

/// Fetch the XML issue view for `key` and store it verbatim.
///
/// The body must parse as an export document for the same key before it is
/// written, so a login page served with 200 never replaces a good export.
pub fn export_one(
    session: &dyn Session,
    paths: &DumperPaths,
    key: &IssueKey,
    retry: RetryPolicy,
) -> Result<ExportStatus, DumperError> {
    let url = export_url(session.base_url(), key);
    let body = match fetch(session, &url, retry) {
        Ok(body) => body,
        Err(DumperError::NotFound(_)) => return Ok(ExportStatus::NotFound),
        Err(err) => return Err(err),
    };

    let doc = parse_document(&body).map_err(|err| match err {
        DumperError::InvalidDocument(msg) => {
            DumperError::upstream(format!("export of {key} is not an issue document: {msg}"))
        }
        other => other,
    })?;
    if doc.key != *key {
        return Err(DumperError::upstream(format!(
            "export of {key} returned document for {}",
            doc.key
        )));
    }

    let dest = paths.document_path(&key.project(), key);
    write_atomic(&dest, &body, None)?;
    Ok(ExportStatus::Exported {
        path: dest,
        document: doc,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedKey {
    pub key: IssueKey,
    pub code: &'static str,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct ExportOutcome {
    pub exported: Vec<IssueKey>,
    pub not_found: Vec<IssueKey>,
    pub failed: Vec<FailedKey>,
    /// Attachments listed across the exported documents.
    pub attachments_listed: usize,
}

impl ExportOutcome {
    fn sort(&mut self) {
        self.exported.sort();
        self.not_found.sort();
        self.failed.sort_by(|a, b| a.key.cmp(&b.key));
    }
}

/// Export every key on `pool`. A session rejection stops new work from
/// starting; it is returned once in-flight keys have finished.
pub fn export_all(
    session: &dyn Session,
    paths: &DumperPaths,
    keys: &[IssueKey],
    retry: RetryPolicy,
    pool: &rayon::ThreadPool,
) -> Result<ExportOutcome, DumperError> {
    let session_lost = AtomicBool::new(false);
    let session_error: Mutex<Option<DumperError>> = Mutex::new(None);
    let unattempted = AtomicUsize::new(0);
    let outcome = Mutex::new(ExportOutcome::default());

    pool.install(|| {
        keys.par_iter().for_each(|key| {
            if session_lost.load(Ordering::SeqCst) {
                unattempted.fetch_add(1, Ordering::SeqCst);
                return;
            }

            let result = export_one(session, paths, key, retry);
            let Ok(mut out) = outcome.lock() else {
                return;
            };
            match result {
                Ok(ExportStatus::Exported { path, document }) => {
                    tracing::debug!(
                        %key,
                        path = %path.display(),
                        summary = document.summary.as_deref().unwrap_or(""),
                        attachments = document.attachments.len(),
                        "exported"
                    );
                    out.attachments_listed += document.attachments.len();
                    out.exported.push(key.clone());
                }
                Ok(ExportStatus::NotFound) => {
                    tracing::info!(%key, "issue not found, skipping");
                    out.not_found.push(key.clone());
                }
                Err(err) if err.is_session() => {
                    session_lost.store(true, Ordering::SeqCst);
                    unattempted.fetch_add(1, Ordering::SeqCst);
                    if let Ok(mut slot) = session_error.lock() {
                        slot.get_or_insert(err);
                    }
                }
                Err(err) => {
                    let reason = err.to_string();
                    let project = key.project();
                    warn::emit(WarnEvent {
                        code: err.code().as_str(),
                        stage: "export",
                        action: "skip-key",
                        project: project.as_str(),
                        key: key.as_str(),
                        retry: "export --retry-failed",
                        reason: "export failed",
                        err: &reason,
                    });
                    out.failed.push(FailedKey {
                        key: key.clone(),
                        code: err.code().as_str(),
                        error: reason,
                    });
                }
            }
        });
    });

    if let Some(err) = session_error.into_inner().ok().flatten() {
        tracing::warn!(
            unattempted = unattempted.into_inner(),
            total = keys.len(),
            "session rejected; remaining keys were not exported"
        );
        return Err(err);
    }
    let mut outcome = outcome
        .into_inner()
        .map_err(|_| DumperError::upstream("export worker panicked"))?;
    outcome.sort();
    Ok(outcome)
}
