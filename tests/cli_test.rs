use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tempfile::tempdir;

const HALLOWEEN_1984: u64 = 468_028_800;

fn issue_xml(key: &str, attachments: &[(&str, &str)]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"0.92\"><channel>\n");
    out.push_str(&format!(
        "<item><key id=\"1\">{key}</key><summary>Archive me</summary><attachments>\n"
    ));
    for (id, name) in attachments {
        out.push_str(&format!(
            "<attachment id=\"{id}\" name=\"{name}\" size=\"5\" author=\"hannibal\" created=\"Wed, 31 Oct 1984 00:00:00 +0000\"/>\n"
        ));
    }
    out.push_str("</attachments></item></channel></rss>\n");
    out
}

fn dumper(workdir: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("jira-dumper");
    cmd.current_dir(workdir)
        .env("JIRA_DUMPER_HOME", workdir)
        .env("JIRA_DUMPER_CONFIG_PATH", workdir.join("no-config.toml"))
        .env("JIRA_DUMPER_LOG", "warn")
        .env_remove("JIRA_DUMPER_OUTPUT_DIR")
        .env_remove("JIRA_DUMPER_AUTH_STATE")
        .env_remove("JIRA_BASE_URL")
        .env_remove("JIRA_API_TOKEN");
    cmd
}

fn mtime_secs(path: &Path) -> u64 {
    fs::metadata(path)
        .expect("metadata")
        .modified()
        .expect("mtime")
        .duration_since(UNIX_EPOCH)
        .expect("after epoch")
        .as_secs()
}

#[test]
fn status_without_output_dir_is_a_hard_error() {
    let tmp = tempdir().expect("tempdir");
    dumper(tmp.path())
        .arg("status")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("JIRA_DUMPER_OUTPUT_DIR"));
}

#[test]
fn status_flags_missing_credentials() {
    let tmp = tempdir().expect("tempdir");
    let out = tmp.path().join("archive");
    dumper(tmp.path())
        .env("JIRA_DUMPER_OUTPUT_DIR", &out)
        .args(["status", "--base-url", "https://jira.example.com/"])
        .assert()
        .code(2)
        .stdout(predicate::str::contains("base_url=https://jira.example.com\n"))
        .stdout(predicate::str::contains("run_lock=free"))
        .stdout(predicate::str::contains("issue: no credentials"));
}

#[test]
fn plan_without_base_url_fails_before_any_request() {
    let tmp = tempdir().expect("tempdir");
    let out = tmp.path().join("archive");
    dumper(tmp.path())
        .args(["plan", "--project", "USA", "--since", "1984-01-01", "--until", "1984-12-31"])
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("base URL is not set"));
    assert!(!out.join("USA.jsonl").exists());
}

#[test]
fn sync_dry_run_reports_plan_and_writes_nothing() {
    let tmp = tempdir().expect("tempdir");
    let out = tmp.path().join("archive");
    let project_dir = out.join("USA");
    fs::create_dir_all(&project_dir).expect("mkdir");
    fs::write(
        project_dir.join("USA-1984.xml"),
        issue_xml("USA-1984", &[("18113", "the a-team.png"), ("18114", "the a-team.png")]),
    )
    .expect("write doc");

    dumper(tmp.path())
        .args(["sync", "--dry-run", "--project", "usa"])
        .args(["--base-url", "https://jira.invalid"])
        .arg("--output-dir")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("would_download key=USA-1984 id=18113"))
        .stdout(predicate::str::contains(
            "source=https://jira.invalid/secure/attachment/18114/the%20a-team.png",
        ))
        .stdout(predicate::str::contains("attachments_planned=2"))
        .stdout(predicate::str::contains("bytes_planned=10"));

    assert!(!project_dir.join("attachments").exists());
    assert!(!out.join(".jira-dumper").exists());
}

#[test]
fn sync_requires_documents_or_project() {
    let tmp = tempdir().expect("tempdir");
    dumper(tmp.path())
        .args(["sync", "--base-url", "https://jira.invalid"])
        .arg("--output-dir")
        .arg(tmp.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nothing to sync"));
}

#[test]
fn json_flag_prints_machine_readable_report() {
    let tmp = tempdir().expect("tempdir");
    let assert = dumper(tmp.path())
        .args(["--json", "status", "--base-url", "https://jira.example.com"])
        .env("JIRA_API_TOKEN", "secret")
        .arg("--output-dir")
        .arg(tmp.path())
        .assert()
        .success();
    let report: serde_json::Value =
        serde_json::from_slice(&assert.get_output().stdout).expect("json report");
    assert_eq!(report["command"], "status");
    assert_eq!(report["ok"], true);
}

mod end_to_end {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn tracker() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/api/2/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "startAt": 0,
                "maxResults": 50,
                "total": 2,
                "issues": [
                    {"id": "10001", "key": "USA-1984", "fields": {"summary": "Archive me"}},
                    {"id": "10002", "key": "USA-1985", "fields": {"summary": "Deleted"}}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/si/jira.issueviews:issue-xml/USA-1984/USA-1984.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(issue_xml("USA-1984", &[("18113", "the-a-team.png")])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/si/jira.issueviews:issue-xml/USA-1985/USA-1985.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/secure/attachment/18113/the-a-team.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"vans!".to_vec()))
            .mount(&server)
            .await;
        server
    }

    async fn attachment_requests(server: &MockServer) -> usize {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|req| req.url.path().starts_with("/secure/attachment/"))
            .count()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn run_archives_project_and_second_sync_skips() {
        let server = tracker().await;
        let tmp = tempdir().expect("tempdir");
        let out = tmp.path().join("archive");

        dumper(tmp.path())
            .env("JIRA_API_TOKEN", "token")
            .env("JIRA_DUMPER_OUTPUT_DIR", &out)
            .args(["run", "--project", "USA", "--since", "1984-10-01", "--until", "1984-11-30"])
            .args(["--base-url", &server.uri()])
            .assert()
            .success()
            .stdout(predicate::str::contains("records_planned=2"))
            .stdout(predicate::str::contains("records_exported=1"))
            .stdout(predicate::str::contains("not_found=USA-1985"))
            .stdout(predicate::str::contains("attachments_downloaded=1"))
            .stdout(predicate::str::contains("bytes_downloaded=5"));

        let keys = fs::read_to_string(out.join("USA.jsonl")).expect("keys");
        assert_eq!(keys.lines().count(), 2);
        assert!(out.join("USA/USA-1984.xml").is_file());
        assert!(!out.join("USA/USA-1985.xml").exists());

        let attachment = out.join("USA/attachments/USA-1984/ID-18113__the-a-team.png");
        assert_eq!(fs::read(&attachment).expect("attachment"), b"vans!");
        assert_eq!(mtime_secs(&attachment), HALLOWEEN_1984);
        assert_eq!(attachment_requests(&server).await, 1);

        let audit = fs::read_to_string(out.join(".jira-dumper/logs/audit.log")).expect("audit");
        assert!(audit.contains("\"command\":\"run\""));

        dumper(tmp.path())
            .env("JIRA_API_TOKEN", "token")
            .env("JIRA_DUMPER_OUTPUT_DIR", &out)
            .args(["sync", "--project", "USA", "--base-url", &server.uri()])
            .assert()
            .success()
            .stdout(predicate::str::contains("attachments_skipped=1"))
            .stdout(predicate::str::contains("attachments_downloaded=0"));
        assert_eq!(attachment_requests(&server).await, 1);

        let state = fs::read_to_string(out.join(".jira-dumper/state.json")).expect("state");
        let state: serde_json::Value = serde_json::from_str(&state).expect("state json");
        assert_eq!(state["projects"]["USA"]["planned_count"], 2);
        assert_eq!(state["projects"]["USA"]["last_sync"]["skipped"], 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_session_exits_with_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let tmp = tempdir().expect("tempdir");
        let out = tmp.path().join("archive");

        dumper(tmp.path())
            .env("JIRA_API_TOKEN", "expired")
            .env("JIRA_DUMPER_OUTPUT_DIR", &out)
            .args(["plan", "--project", "USA", "--since", "1984-10-01", "--until", "1984-10-31"])
            .args(["--base-url", &server.uri()])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("renew auth state"));

        assert!(!out.join("USA.jsonl").exists());
        let audit = fs::read_to_string(out.join(".jira-dumper/logs/audit.log")).expect("audit");
        assert!(audit.contains("\"status\":\"failed\""));
    }
}
