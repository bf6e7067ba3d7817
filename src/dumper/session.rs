use crate::dumper::retry::{RetryPolicy, with_retry};
use crate::error::DumperError;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Authenticated access to the tracker. Passed explicitly to every stage.
pub trait Session: Sync {
    fn base_url(&self) -> &str;
    /// Cheap local check; the tracker has the final word on each request.
    fn is_authenticated(&self) -> bool;
    fn get(&self, url: &str) -> Result<HttpResponse, DumperError>;
}

pub fn ensure_authenticated(session: &dyn Session) -> Result<(), DumperError> {
    if session.is_authenticated() {
        return Ok(());
    }
    Err(DumperError::Session(
        "no usable credentials (missing or expired auth state, no API token)".to_string(),
    ))
}

pub fn classify_response(url: &str, response: HttpResponse) -> Result<Vec<u8>, DumperError> {
    match response.status {
        200..=299 => Ok(response.body),
        300..=399 => Err(DumperError::Session(format!(
            "HTTP {} redirect to login for {url}",
            response.status
        ))),
        401 | 403 => Err(DumperError::Session(format!(
            "HTTP {} for {url}",
            response.status
        ))),
        404 => Err(DumperError::NotFound(url.to_string())),
        408 | 429 | 500..=599 => Err(DumperError::transient(format!(
            "HTTP {} for {url}",
            response.status
        ))),
        status => Err(DumperError::upstream(format!("HTTP {status} for {url}"))),
    }
}

/// GET `url` and return the body of a successful response.
pub fn fetch(session: &dyn Session, url: &str, policy: RetryPolicy) -> Result<Vec<u8>, DumperError> {
    with_retry(policy, url, || {
        let response = session.get(url)?;
        classify_response(url, response)
    })
}

#[derive(Debug, Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<StoredCookie>,
}

#[derive(Debug, Deserialize)]
struct StoredCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: String,
    /// Unix seconds; `-1` marks a session cookie.
    #[serde(default)]
    expires: Option<f64>,
}

fn cookie_matches_host(domain: &str, host: &str) -> bool {
    let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    if domain.is_empty() {
        return true;
    }
    let host = host.to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

fn cookie_header_from_state(raw: &str, host: &str, now_epoch_secs: f64) -> Result<Option<String>> {
    let state: StorageState = serde_json::from_str(raw).context("invalid auth state json")?;
    let pairs = state
        .cookies
        .iter()
        .filter(|c| cookie_matches_host(&c.domain, host))
        .filter(|c| match c.expires {
            Some(exp) if exp > 0.0 => exp > now_epoch_secs,
            _ => true,
        })
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>();
    if pairs.is_empty() {
        Ok(None)
    } else {
        Ok(Some(pairs.join("; ")))
    }
}

fn login_aware_redirects() -> Policy {
    Policy::custom(|attempt| {
        if attempt.url().path().to_ascii_lowercase().contains("login") {
            attempt.stop()
        } else if attempt.previous().len() >= 10 {
            attempt.error("too many redirects")
        } else {
            attempt.follow()
        }
    })
}

/// Session backed by cookies from a browser storage-state file and/or an API token.
pub struct CookieSession {
    client: Client,
    base_url: String,
    cookie_header: Option<String>,
    api_token: Option<String>,
}

impl CookieSession {
    pub fn new(
        base_url: &str,
        auth_state_file: &Path,
        api_token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let host = reqwest::Url::parse(base_url)
            .with_context(|| format!("invalid tracker base URL {base_url}"))?
            .host_str()
            .map(ToOwned::to_owned)
            .unwrap_or_default();

        let cookie_header = if auth_state_file.is_file() {
            let raw = fs::read_to_string(auth_state_file)
                .with_context(|| format!("failed to read {}", auth_state_file.display()))?;
            let now = chrono::Utc::now().timestamp() as f64;
            cookie_header_from_state(&raw, &host, now)
                .with_context(|| format!("failed to parse {}", auth_state_file.display()))?
        } else {
            tracing::debug!(path = %auth_state_file.display(), "no auth state file");
            None
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .redirect(login_aware_redirects())
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie_header,
            api_token: api_token.filter(|t| !t.trim().is_empty()),
        })
    }
}

impl Session for CookieSession {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn is_authenticated(&self) -> bool {
        self.cookie_header.is_some() || self.api_token.is_some()
    }

    fn get(&self, url: &str) -> Result<HttpResponse, DumperError> {
        let mut request = self.client.get(url);
        if let Some(cookies) = &self.cookie_header {
            request = request.header(reqwest::header::COOKIE, cookies);
        }
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|err| {
            if err.is_builder() {
                DumperError::upstream(format!("GET {url}: {err}"))
            } else {
                DumperError::transient(format!("GET {url}: {err}"))
            }
        })?;

        // Jira answers some unauthenticated requests with 200 plus this header.
        let login_failed = response
            .headers()
            .get("X-Seraph-LoginReason")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("FAILED") || v.contains("DENIED"));
        let status = if login_failed {
            401
        } else {
            response.status().as_u16()
        };

        let body = response
            .bytes()
            .map_err(|err| DumperError::transient(format!("GET {url}: reading body: {err}")))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}
