//! Attachment synchronizer.
//!
//! Reconciles the attachments listed in one export document against
//! `{attachments_root}/{KEY}/`. A file whose modification time is not older
//! than the attachment's `created` timestamp is considered current and never
//! fetched again; downloads are stamped with `created` so the next run can
//! make the same decision without touching the network.

use crate::dumper::document::read_document;
use crate::dumper::model::{AttachmentDescriptor, ExportDocument, IssueKey};
use crate::dumper::naming::target_name;
use crate::dumper::paths::DumperPaths;
use crate::dumper::retry::RetryPolicy;
use crate::dumper::session::{Session, ensure_authenticated, fetch};
use crate::dumper::util::{modified_epoch_secs, write_atomic};
use crate::dumper::warn::{self, WarnEvent};
use crate::error::DumperError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Download,
    Refresh,
    Skip,
}

/// `existing_mtime` and `created` are whole Unix seconds.
pub fn decide(existing_mtime: Option<i64>, created: i64, force: bool) -> Decision {
    match existing_mtime {
        None => Decision::Download,
        Some(_) if force => Decision::Refresh,
        Some(mtime) if mtime >= created => Decision::Skip,
        Some(_) => Decision::Refresh,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentAction {
    Downloaded,
    Refreshed,
    Skipped,
    WouldDownload,
    WouldRefresh,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttachmentResult {
    pub key: IssueKey,
    pub id: String,
    pub path: Option<PathBuf>,
    pub source: Option<String>,
    pub action: AttachmentAction,
    /// Bytes written, or the declared size for a planned download.
    pub bytes: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncCounts {
    pub downloaded: usize,
    pub refreshed: usize,
    pub skipped: usize,
    pub planned: usize,
    pub failed: usize,
    pub bytes_planned: u64,
    pub bytes_downloaded: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedDocument {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub results: Vec<AttachmentResult>,
    pub failed_documents: Vec<FailedDocument>,
}

impl SyncReport {
    pub fn counts(&self) -> SyncCounts {
        let mut counts = SyncCounts::default();
        for result in &self.results {
            match result.action {
                AttachmentAction::Downloaded => counts.downloaded += 1,
                AttachmentAction::Refreshed => counts.refreshed += 1,
                AttachmentAction::Skipped => counts.skipped += 1,
                AttachmentAction::WouldDownload | AttachmentAction::WouldRefresh => {
                    counts.planned += 1;
                    counts.bytes_planned += result.bytes;
                }
                AttachmentAction::Failed => counts.failed += 1,
            }
            if matches!(
                result.action,
                AttachmentAction::Downloaded | AttachmentAction::Refreshed
            ) {
                counts.bytes_downloaded += result.bytes;
            }
        }
        counts.failed += self.failed_documents.len();
        counts
    }

    fn merge(&mut self, other: SyncReport) {
        self.results.extend(other.results);
        self.failed_documents.extend(other.failed_documents);
    }

    fn sort(&mut self) {
        self.results.sort_by(|a, b| {
            a.key
                .cmp(&b.key)
                .then_with(|| a.id.len().cmp(&b.id.len()))
                .then_with(|| a.id.cmp(&b.id))
        });
        self.failed_documents.sort_by(|a, b| a.path.cmp(&b.path));
    }
}

/// `{base}/secure/attachment/{id}/{filename}` with each segment percent-encoded.
pub fn attachment_url(base_url: &str, id: &str, filename: &str) -> Result<String, DumperError> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|err| DumperError::upstream(format!("invalid base url {base_url}: {err}")))?;
    url.path_segments_mut()
        .map_err(|_| DumperError::upstream(format!("base url {base_url} cannot carry a path")))?
        .pop_if_empty()
        .extend(["secure", "attachment", id, filename]);
    Ok(url.to_string())
}

fn download(
    session: &dyn Session,
    key: &IssueKey,
    att: &AttachmentDescriptor,
    source: &str,
    dest: &Path,
    retry: RetryPolicy,
) -> Result<u64, DumperError> {
    ensure_authenticated(session)?;
    let body = fetch(session, source, retry)?;
    if att.size > 0 && body.len() as u64 != att.size {
        tracing::warn!(
            %key,
            id = %att.id,
            expected = att.size,
            actual = body.len(),
            "attachment size differs from export document"
        );
    }
    write_atomic(dest, &body, Some(att.created_epoch_secs()))?;
    Ok(body.len() as u64)
}

fn failed(key: &IssueKey, id: &str, path: Option<PathBuf>, err: &DumperError) -> AttachmentResult {
    let reason = err.to_string();
    let project = key.project();
    warn::emit(WarnEvent {
        code: err.code().as_str(),
        stage: "sync",
        action: "skip-attachment",
        project: project.as_str(),
        key: key.as_str(),
        retry: "sync",
        reason: id,
        err: &reason,
    });
    AttachmentResult {
        key: key.clone(),
        id: id.to_string(),
        path,
        source: None,
        action: AttachmentAction::Failed,
        bytes: 0,
        error: Some(reason),
    }
}

fn sync_one(
    doc: &ExportDocument,
    dir: &Path,
    att: &AttachmentDescriptor,
    opts: SyncOptions,
    session: &dyn Session,
    retry: RetryPolicy,
) -> Result<AttachmentResult, DumperError> {
    let key = &doc.key;
    let path = dir.join(target_name(&att.id, &att.filename));
    let source = match attachment_url(session.base_url(), &att.id, &att.filename) {
        Ok(url) => url,
        Err(err) => return Ok(failed(key, &att.id, Some(path), &err)),
    };
    let existing = match modified_epoch_secs(&path) {
        Ok(mtime) => mtime,
        Err(err) => return Ok(failed(key, &att.id, Some(path), &err)),
    };

    let decision = decide(existing, att.created_epoch_secs(), opts.force);
    let (action, bytes) = match (decision, opts.dry_run) {
        (Decision::Skip, _) => (AttachmentAction::Skipped, 0),
        (Decision::Download, true) => (AttachmentAction::WouldDownload, att.size),
        (Decision::Refresh, true) => (AttachmentAction::WouldRefresh, att.size),
        (Decision::Download | Decision::Refresh, false) => {
            match download(session, key, att, &source, &path, retry) {
                Ok(n) if decision == Decision::Download => (AttachmentAction::Downloaded, n),
                Ok(n) => (AttachmentAction::Refreshed, n),
                Err(err) if err.is_session() => return Err(err),
                Err(err) => return Ok(failed(key, &att.id, Some(path), &err)),
            }
        }
    };
    tracing::debug!(%key, id = %att.id, ?action, path = %path.display(), "attachment reconciled");

    Ok(AttachmentResult {
        key: key.clone(),
        id: att.id.clone(),
        path: Some(path),
        source: Some(source),
        action,
        bytes,
        error: None,
    })
}

/// Reconcile every attachment of `doc` under `attachments_root/{KEY}/`.
///
/// Individual failures are recorded and processing continues; only a session
/// rejection aborts. With `dry_run` nothing is fetched or written.
pub fn sync_document(
    doc: &ExportDocument,
    attachments_root: &Path,
    opts: SyncOptions,
    session: &dyn Session,
    retry: RetryPolicy,
) -> Result<SyncReport, DumperError> {
    let dir = attachments_root.join(doc.key.as_str());
    let mut report = SyncReport::default();

    for reason in &doc.rejected_attachments {
        let err = DumperError::InvalidDocument(reason.clone());
        report.results.push(failed(&doc.key, "", None, &err));
    }

    let mut seen_ids = BTreeSet::new();
    let mut seen_names = BTreeSet::new();
    for att in &doc.attachments {
        if !seen_ids.insert(att.id.as_str()) {
            let err = DumperError::InvalidDocument(format!("duplicate attachment id {}", att.id));
            report.results.push(failed(&doc.key, &att.id, None, &err));
            continue;
        }
        let name = target_name(&att.id, &att.filename);
        if !seen_names.insert(name.clone()) {
            let err = DumperError::InvalidDocument(format!(
                "attachment {} maps to {name}, already used by another attachment",
                att.id
            ));
            report.results.push(failed(&doc.key, &att.id, Some(dir.join(name)), &err));
            continue;
        }
        report
            .results
            .push(sync_one(doc, &dir, att, opts, session, retry)?);
    }
    Ok(report)
}

/// Sync a batch of export documents on `pool`, one document per task.
pub fn sync_all(
    session: &dyn Session,
    paths: &DumperPaths,
    documents: &[PathBuf],
    opts: SyncOptions,
    retry: RetryPolicy,
    pool: &rayon::ThreadPool,
) -> Result<SyncReport, DumperError> {
    let session_lost = AtomicBool::new(false);
    let session_error: Mutex<Option<DumperError>> = Mutex::new(None);
    let report = Mutex::new(SyncReport::default());

    pool.install(|| {
        documents.par_iter().for_each(|doc_path| {
            if session_lost.load(Ordering::SeqCst) {
                return;
            }
            let partial = match read_document(doc_path) {
                Ok(doc) => {
                    let root = paths.attachments_root(&doc.key.project());
                    sync_document(&doc, &root, opts, session, retry)
                }
                Err(err) => {
                    tracing::warn!(path = %doc_path.display(), error = %err, "unreadable export document");
                    Ok(SyncReport {
                        results: Vec::new(),
                        failed_documents: vec![FailedDocument {
                            path: doc_path.clone(),
                            error: err.to_string(),
                        }],
                    })
                }
            };
            match partial {
                Ok(partial) => {
                    if let Ok(mut out) = report.lock() {
                        out.merge(partial);
                    }
                }
                Err(err) => {
                    session_lost.store(true, Ordering::SeqCst);
                    if let Ok(mut slot) = session_error.lock() {
                        slot.get_or_insert(err);
                    }
                }
            }
        });
    });

    if let Some(err) = session_error.into_inner().ok().flatten() {
        return Err(err);
    }
    let mut report = report
        .into_inner()
        .map_err(|_| DumperError::upstream("sync worker panicked"))?;
    report.sort();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dumper::document::fixtures::issue_xml;
    use crate::dumper::document::parse_document;
    use crate::dumper::session::testing::{FakeSession, ok, status};
    use crate::dumper::util::worker_pool;
    use filetime::FileTime;
    use std::fs;
    use tempfile::tempdir;

    const HALLOWEEN_1984: i64 = 468_028_800;
    const HALLOWEEN_1984_RFC2822: &str = "Wed, 31 Oct 1984 00:00:00 +0000";

    fn doc(key: &str, attachments: &[(&str, &str, &str)]) -> ExportDocument {
        parse_document(issue_xml(key, attachments).as_bytes()).expect("doc")
    }

    fn list_files(dir: &Path) -> Vec<String> {
        let mut out: Vec<String> = match fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        out.sort();
        out
    }

    fn set_mtime(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).expect("mtime");
    }

    #[test]
    fn decide_covers_every_branch() {
        assert_eq!(decide(None, 10, false), Decision::Download);
        assert_eq!(decide(None, 10, true), Decision::Download);
        assert_eq!(decide(Some(10), 10, false), Decision::Skip);
        assert_eq!(decide(Some(11), 10, false), Decision::Skip);
        assert_eq!(decide(Some(9), 10, false), Decision::Refresh);
        assert_eq!(decide(Some(11), 10, true), Decision::Refresh);
    }

    #[test]
    fn attachment_url_percent_encodes_filename() {
        let url = attachment_url("https://jira.test/jira/", "42", "a b#1?.txt").expect("url");
        assert_eq!(url, "https://jira.test/jira/secure/attachment/42/a%20b%231%3F.txt");
    }

    #[test]
    fn usa_1984_scenario() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("USA/attachments");
        let document = doc(
            "USA-1984",
            &[("18113", "the-a-team.png", HALLOWEEN_1984_RFC2822)],
        );
        let session = FakeSession::new(|_| ok("vans!"));
        let opts = SyncOptions::default();

        let first =
            sync_document(&document, &root, opts, &session, RetryPolicy::none()).expect("sync");
        let target = root.join("USA-1984/ID-18113__the-a-team.png");
        assert_eq!(first.results[0].action, AttachmentAction::Downloaded);
        assert_eq!(fs::read(&target).expect("read"), b"vans!");
        assert_eq!(
            modified_epoch_secs(&target).expect("stat"),
            Some(HALLOWEEN_1984)
        );
        assert_eq!(
            session.requests(),
            vec!["https://jira.test/secure/attachment/18113/the-a-team.png".to_string()]
        );

        let second =
            sync_document(&document, &root, opts, &session, RetryPolicy::none()).expect("sync");
        assert_eq!(second.results[0].action, AttachmentAction::Skipped);
        assert_eq!(session.requests().len(), 1);
    }

    #[test]
    fn older_file_is_refreshed_and_restamped() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc("USA-1984", &[("18113", "plan.txt", HALLOWEEN_1984_RFC2822)]);
        let target = root.join("USA-1984/ID-18113__plan.txt");
        fs::create_dir_all(target.parent().expect("parent")).expect("mkdir");
        fs::write(&target, "stale").expect("seed");
        set_mtime(&target, HALLOWEEN_1984 - 1);

        let session = FakeSession::new(|_| ok("fresh"));
        let report = sync_document(
            &document,
            &root,
            SyncOptions::default(),
            &session,
            RetryPolicy::none(),
        )
        .expect("sync");

        assert_eq!(report.results[0].action, AttachmentAction::Refreshed);
        assert_eq!(fs::read_to_string(&target).expect("read"), "fresh");
        assert_eq!(
            modified_epoch_secs(&target).expect("stat"),
            Some(HALLOWEEN_1984)
        );
    }

    #[test]
    fn force_downloads_current_files() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc("OPS-1", &[("1", "a.txt", HALLOWEEN_1984_RFC2822)]);
        let session = FakeSession::new(|_| ok("body"));

        sync_document(&document, &root, SyncOptions::default(), &session, RetryPolicy::none())
            .expect("first");
        let forced = SyncOptions {
            force: true,
            ..SyncOptions::default()
        };
        let report =
            sync_document(&document, &root, forced, &session, RetryPolicy::none()).expect("force");
        assert_eq!(report.results[0].action, AttachmentAction::Refreshed);
        assert_eq!(session.requests().len(), 2);
    }

    #[test]
    fn shared_filenames_land_in_distinct_files() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc(
            "OPS-2",
            &[
                ("10", "log.txt", HALLOWEEN_1984_RFC2822),
                ("11", "log.txt", HALLOWEEN_1984_RFC2822),
            ],
        );
        let session = FakeSession::new(|url| ok(url.to_string()));

        let report = sync_document(
            &document,
            &root,
            SyncOptions::default(),
            &session,
            RetryPolicy::none(),
        )
        .expect("sync");
        assert_eq!(report.counts().downloaded, 2);
        assert_eq!(
            list_files(&root.join("OPS-2")),
            vec!["ID-10__log.txt".to_string(), "ID-11__log.txt".to_string()]
        );
        let first = fs::read_to_string(root.join("OPS-2/ID-10__log.txt")).expect("read");
        assert!(first.ends_with("/attachment/10/log.txt"));
    }

    #[test]
    fn dry_run_touches_nothing() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc(
            "OPS-3",
            &[
                ("1", "one.bin", HALLOWEEN_1984_RFC2822),
                ("2", "two.bin", HALLOWEEN_1984_RFC2822),
            ],
        );
        let session = FakeSession::new(|_| ok("never"));
        let opts = SyncOptions {
            dry_run: true,
            force: true,
        };

        let report = sync_document(&document, &root, opts, &session, RetryPolicy::none())
            .expect("dry run");
        assert_eq!(report.counts().planned, 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.action == AttachmentAction::WouldDownload));
        assert!(session.requests().is_empty());
        assert!(!root.exists());
    }

    #[test]
    fn dry_run_leaves_stale_files_untouched() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc("OPS-3", &[("1", "a.txt", HALLOWEEN_1984_RFC2822)]);
        let target = root.join("OPS-3/ID-1__a.txt");
        fs::create_dir_all(target.parent().expect("parent")).expect("mkdir");
        fs::write(&target, "stale bytes").expect("seed");
        set_mtime(&target, HALLOWEEN_1984 - 3600);

        let session = FakeSession::new(|_| ok("fresh"));
        let opts = SyncOptions {
            dry_run: true,
            force: false,
        };
        let report = sync_document(&document, &root, opts, &session, RetryPolicy::none())
            .expect("dry run");

        assert_eq!(report.results[0].action, AttachmentAction::WouldRefresh);
        assert_eq!(report.counts().bytes_planned, 5);
        assert_eq!(fs::read_to_string(&target).expect("read"), "stale bytes");
        assert_eq!(
            modified_epoch_secs(&target).expect("stat"),
            Some(HALLOWEEN_1984 - 3600)
        );
        assert!(session.requests().is_empty());
        assert_eq!(list_files(&root.join("OPS-3")), vec!["ID-1__a.txt".to_string()]);
    }

    #[test]
    fn ids_differing_in_punctuation_are_both_downloaded() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc(
            "OPS-7",
            &[
                ("a.b", "log.txt", HALLOWEEN_1984_RFC2822),
                ("a-b", "log.txt", HALLOWEEN_1984_RFC2822),
            ],
        );
        let session = FakeSession::new(|url| ok(url.to_string()));

        let report = sync_document(
            &document,
            &root,
            SyncOptions::default(),
            &session,
            RetryPolicy::none(),
        )
        .expect("sync");
        assert!(report
            .results
            .iter()
            .all(|r| r.action == AttachmentAction::Downloaded));
        assert_eq!(
            list_files(&root.join("OPS-7")),
            vec!["ID-a%2Db__log.txt".to_string(), "ID-a%2Eb__log.txt".to_string()]
        );
    }

    #[test]
    fn downloaded_bytes_are_totalled() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc(
            "OPS-8",
            &[
                ("1", "a.txt", HALLOWEEN_1984_RFC2822),
                ("2", "b.txt", HALLOWEEN_1984_RFC2822),
            ],
        );
        let session = FakeSession::new(|_| ok("12345678"));

        let report = sync_document(
            &document,
            &root,
            SyncOptions::default(),
            &session,
            RetryPolicy::none(),
        )
        .expect("sync");
        let counts = report.counts();
        assert_eq!((counts.bytes_downloaded, counts.bytes_planned), (16, 0));
    }

    #[test]
    fn failed_download_does_not_stop_siblings() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc(
            "OPS-4",
            &[
                ("1", "gone.txt", HALLOWEEN_1984_RFC2822),
                ("2", "flaky.txt", HALLOWEEN_1984_RFC2822),
                ("3", "fine.txt", HALLOWEEN_1984_RFC2822),
            ],
        );
        let session = FakeSession::new(|url| {
            if url.contains("/1/") {
                status(404)
            } else if url.contains("/2/") {
                status(503)
            } else {
                ok("ok")
            }
        });

        let report = sync_document(
            &document,
            &root,
            SyncOptions::default(),
            &session,
            RetryPolicy::none(),
        )
        .expect("sync");
        let counts = report.counts();
        assert_eq!((counts.downloaded, counts.failed), (1, 2));
        assert_eq!(list_files(&root.join("OPS-4")), vec!["ID-3__fine.txt".to_string()]);
    }

    #[test]
    fn session_rejection_aborts() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc("OPS-5", &[("1", "a.txt", HALLOWEEN_1984_RFC2822)]);
        let session = FakeSession::new(|_| status(401));

        let err = sync_document(
            &document,
            &root,
            SyncOptions::default(),
            &session,
            RetryPolicy::none(),
        )
        .expect_err("session");
        assert!(err.is_session());
        assert!(!root.join("OPS-5/ID-1__a.txt").exists());
    }

    #[test]
    fn rejected_descriptors_count_as_failed() {
        let tmp = tempdir().expect("tempdir");
        let root = tmp.path().join("attachments");
        let document = doc(
            "OPS-6",
            &[
                ("1", "ok.txt", HALLOWEEN_1984_RFC2822),
                ("2", "bad.txt", "someday"),
            ],
        );
        let session = FakeSession::new(|_| ok("x"));

        let report = sync_document(
            &document,
            &root,
            SyncOptions::default(),
            &session,
            RetryPolicy::none(),
        )
        .expect("sync");
        let counts = report.counts();
        assert_eq!((counts.downloaded, counts.failed), (1, 1));
    }

    #[test]
    fn batch_sync_reads_documents_and_reports_unreadable_ones() {
        let tmp = tempdir().expect("tempdir");
        let paths = DumperPaths::under(tmp.path());
        let good = tmp.path().join("USA/USA-1984.xml");
        fs::create_dir_all(good.parent().expect("parent")).expect("mkdir");
        fs::write(
            &good,
            issue_xml("USA-1984", &[("18113", "the-a-team.png", HALLOWEEN_1984_RFC2822)]),
        )
        .expect("write");
        let bad = tmp.path().join("USA/broken.xml");
        fs::write(&bad, "<html/>").expect("write");

        let session = FakeSession::new(|_| ok("vans!"));
        let pool = worker_pool(2).expect("pool");
        let report = sync_all(
            &session,
            &paths,
            &[good, bad.clone()],
            SyncOptions::default(),
            RetryPolicy::none(),
            &pool,
        )
        .expect("sync");

        assert_eq!(report.counts().downloaded, 1);
        assert_eq!(report.failed_documents.len(), 1);
        assert_eq!(report.failed_documents[0].path, bad);
        assert!(
            tmp.path()
                .join("USA/attachments/USA-1984/ID-18113__the-a-team.png")
                .exists()
        );
    }
}
