//! Range query planner.
//!
//! Jira's search endpoint reports a `total` next to each page of results, but
//! deep pagination over large result sets is capped or very slow. The planner
//! asks for the first page of `(project, range)`; when `total` exceeds the
//! configured ceiling the range is bisected and both halves are planned
//! recursively, otherwise the range is paginated to the end. A single day that
//! still exceeds the ceiling is paginated regardless.

use crate::dumper::date_range::DateRange;
use crate::dumper::model::{IssueKey, IssueRow, ProjectKey};
use crate::dumper::retry::RetryPolicy;
use crate::dumper::session::{Session, ensure_authenticated, fetch};
use crate::error::DumperError;
use serde::Deserialize;
use std::collections::BTreeMap;

pub const SEARCH_PATH: &str = "/rest/api/2/search";

#[derive(Debug, Clone, Copy)]
pub struct PlannerSettings {
    pub result_ceiling: u64,
    pub page_size: u64,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone)]
pub struct FailedRange {
    pub range: DateRange,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct PlanOutcome {
    pub issues: BTreeMap<IssueKey, IssueRow>,
    pub failed_ranges: Vec<FailedRange>,
    pub queries: usize,
}

impl PlanOutcome {
    fn failed(range: DateRange, err: &DumperError, queries: usize) -> Self {
        Self {
            issues: BTreeMap::new(),
            failed_ranges: vec![FailedRange {
                range,
                error: err.to_string(),
            }],
            queries,
        }
    }

    fn merge(mut self, other: PlanOutcome) -> Self {
        self.issues.extend(other.issues);
        self.failed_ranges.extend(other.failed_ranges);
        self.queries += other.queries;
        self
    }

    pub fn rows(&self) -> Vec<IssueRow> {
        self.issues.values().cloned().collect()
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    issues: Vec<SearchIssue>,
}

#[derive(Debug, Deserialize)]
struct SearchIssue {
    id: String,
    key: String,
    #[serde(default)]
    fields: SearchFields,
}

#[derive(Debug, Default, Deserialize)]
struct SearchFields {
    #[serde(default)]
    summary: Option<String>,
}

#[derive(Debug)]
struct SearchPage {
    total: u64,
    rows: Vec<IssueRow>,
}

pub fn build_jql(project: &ProjectKey, range: &DateRange) -> String {
    format!(
        "project = \"{}\" AND created >= \"{}\" AND created < \"{}\" ORDER BY created ASC, key ASC",
        project,
        range.start().format("%Y-%m-%d"),
        range.end_exclusive().format("%Y-%m-%d"),
    )
}

pub fn search_url(
    base_url: &str,
    jql: &str,
    start_at: u64,
    max_results: u64,
) -> Result<String, DumperError> {
    let start_at = start_at.to_string();
    let max_results = max_results.to_string();
    let url = reqwest::Url::parse_with_params(
        &format!("{base_url}{SEARCH_PATH}"),
        &[
            ("jql", jql),
            ("startAt", start_at.as_str()),
            ("maxResults", max_results.as_str()),
            ("fields", "summary"),
        ],
    )
    .map_err(|err| DumperError::upstream(format!("cannot build search url: {err}")))?;
    Ok(url.to_string())
}

fn parse_search_page(base_url: &str, body: &[u8]) -> Result<SearchPage, DumperError> {
    let parsed: SearchResponse = serde_json::from_slice(body)
        .map_err(|err| DumperError::upstream(format!("malformed search response: {err}")))?;
    let mut rows = Vec::with_capacity(parsed.issues.len());
    for issue in parsed.issues {
        let key = IssueKey::parse(&issue.key)
            .map_err(|err| DumperError::upstream(format!("malformed search response: {err}")))?;
        rows.push(IssueRow {
            url: format!("{base_url}/browse/{key}"),
            id: issue.id,
            key,
            summary: issue.fields.summary.unwrap_or_default(),
        });
    }
    Ok(SearchPage {
        total: parsed.total,
        rows,
    })
}

pub struct Planner<'a> {
    session: &'a dyn Session,
    settings: PlannerSettings,
}

impl<'a> Planner<'a> {
    pub fn new(session: &'a dyn Session, settings: PlannerSettings) -> Self {
        Self { session, settings }
    }

    /// Every issue of `project` created within `range`.
    ///
    /// Only a session failure aborts planning; any other failure is confined
    /// to the sub-range that produced it and reported in `failed_ranges`.
    pub fn plan(&self, project: &ProjectKey, range: DateRange) -> Result<PlanOutcome, DumperError> {
        ensure_authenticated(self.session)?;
        self.plan_range(project, range)
    }

    fn plan_range(&self, project: &ProjectKey, range: DateRange) -> Result<PlanOutcome, DumperError> {
        let first = match self.search(project, &range, 0) {
            Ok(page) => page,
            Err(err) if err.is_session() => return Err(err),
            Err(err) => {
                tracing::warn!(%project, %range, error = %err, "search failed for range");
                return Ok(PlanOutcome::failed(range, &err, 1));
            }
        };

        if first.total > self.settings.result_ceiling {
            if let Some((left, right)) = range.bisect() {
                tracing::debug!(
                    %project,
                    %range,
                    total = first.total,
                    "range exceeds result ceiling, bisecting"
                );
                let (left_out, right_out) = rayon::join(
                    || self.plan_range(project, left),
                    || self.plan_range(project, right),
                );
                let mut out = left_out?.merge(right_out?);
                out.queries += 1;
                return Ok(out);
            }
            tracing::warn!(
                %project,
                %range,
                total = first.total,
                ceiling = self.settings.result_ceiling,
                "single day exceeds result ceiling, paginating fully"
            );
        }

        self.paginate(project, range, first)
    }

    fn paginate(
        &self,
        project: &ProjectKey,
        range: DateRange,
        first: SearchPage,
    ) -> Result<PlanOutcome, DumperError> {
        let mut out = PlanOutcome {
            queries: 1,
            ..PlanOutcome::default()
        };
        let total = first.total;
        let mut start_at = first.rows.len() as u64;
        let mut last_page_len = first.rows.len();
        for row in first.rows {
            out.issues.insert(row.key.clone(), row);
        }

        while start_at < total && last_page_len > 0 {
            let page = match self.search(project, &range, start_at) {
                Ok(page) => page,
                Err(err) if err.is_session() => return Err(err),
                Err(err) => {
                    tracing::warn!(%project, %range, start_at, error = %err, "page fetch failed");
                    out.queries += 1;
                    out.failed_ranges.push(FailedRange {
                        range,
                        error: format!("at startAt={start_at}: {err}"),
                    });
                    break;
                }
            };
            out.queries += 1;
            last_page_len = page.rows.len();
            start_at += last_page_len as u64;
            for row in page.rows {
                out.issues.insert(row.key.clone(), row);
            }
        }

        tracing::debug!(%project, %range, total, collected = out.issues.len(), "range enumerated");
        Ok(out)
    }

    fn search(
        &self,
        project: &ProjectKey,
        range: &DateRange,
        start_at: u64,
    ) -> Result<SearchPage, DumperError> {
        let jql = build_jql(project, range);
        let url = search_url(self.session.base_url(), &jql, start_at, self.settings.page_size)?;
        let body = fetch(self.session, &url, self.settings.retry)?;
        parse_search_page(self.session.base_url(), &body)
    }
}
