use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrackerConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Largest `total` a single search may report before the range is bisected.
    pub result_ceiling: u64,
    pub page_size: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            result_ceiling: 500,
            page_size: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub concurrency: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            retries: 2,
            retry_delay_ms: 500,
            concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DumperConfig {
    pub tracker: TrackerConfig,
    pub planner: PlannerConfig,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialDumperConfig {
    tracker: Option<TrackerConfig>,
    planner: Option<PlannerConfig>,
    http: Option<HttpConfig>,
}

impl DumperConfig {
    pub fn base_url(&self) -> Result<&str> {
        self.tracker
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow!("tracker base URL is not set (JIRA_BASE_URL or --base-url)"))
    }
}

const ENV_PREFIX: &str = "JIRA_DUMPER_";

include!(concat!(env!("OUT_DIR"), "/jira_dumper_env_allowlist.rs"));

/// Names from `vars` that carry the tool's prefix but are never read by this build.
pub fn unknown_env_keys(vars: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut unknown: Vec<String> = vars
        .into_iter()
        .filter(|key| key.starts_with(ENV_PREFIX))
        .filter(|key| !GENERATED_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

fn lookup_u64(lookup: &impl Fn(&str) -> Option<String>, var: &str, fallback: u64) -> u64 {
    match lookup(var) {
        Some(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        None => fallback,
    }
}

fn lookup_string(lookup: &impl Fn(&str) -> Option<String>, var: &str) -> Option<String> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn validate(cfg: &DumperConfig) -> Result<()> {
    if let Some(base) = cfg.tracker.base_url.as_deref() {
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(anyhow!(
                "invalid tracker base URL `{base}`: must start with http:// or https://"
            ));
        }
    }
    if cfg.planner.result_ceiling == 0 {
        return Err(anyhow!("invalid planner result ceiling: must be >= 1"));
    }
    if cfg.planner.page_size == 0 {
        return Err(anyhow!("invalid planner page size: must be >= 1"));
    }
    if cfg.http.timeout_secs == 0 {
        return Err(anyhow!("invalid http timeout: must be >= 1 second"));
    }
    if cfg.http.concurrency == 0 {
        return Err(anyhow!("invalid http concurrency: must be >= 1"));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("JIRA_DUMPER_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".config").join("jira-dumper").join("config.toml"))
}

fn merge_toml(base: &mut DumperConfig, raw: &str) -> Result<()> {
    let parsed: PartialDumperConfig = toml::from_str(raw)?;
    if let Some(tracker) = parsed.tracker {
        base.tracker = tracker;
    }
    if let Some(planner) = parsed.planner {
        base.planner = planner;
    }
    if let Some(http) = parsed.http {
        base.http = http;
    }
    Ok(())
}

fn merge_file_config(base: &mut DumperConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse dumper config {}: {err}", path.display()))
}

fn apply_env_overrides(cfg: &mut DumperConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(base) = lookup_string(&lookup, "JIRA_BASE_URL") {
        cfg.tracker.base_url = Some(base);
    }
    if let Some(token) = lookup_string(&lookup, "JIRA_API_TOKEN") {
        cfg.tracker.api_token = Some(token);
    }
    cfg.planner.result_ceiling = lookup_u64(
        &lookup,
        "JIRA_DUMPER_RESULT_CEILING",
        cfg.planner.result_ceiling,
    );
    cfg.planner.page_size = lookup_u64(&lookup, "JIRA_DUMPER_PAGE_SIZE", cfg.planner.page_size);
    cfg.http.timeout_secs = lookup_u64(&lookup, "JIRA_DUMPER_TIMEOUT_SECS", cfg.http.timeout_secs);
    cfg.http.retries =
        lookup_u64(&lookup, "JIRA_DUMPER_RETRIES", u64::from(cfg.http.retries)) as u32;
    cfg.http.retry_delay_ms =
        lookup_u64(&lookup, "JIRA_DUMPER_RETRY_DELAY_MS", cfg.http.retry_delay_ms);
    cfg.http.concurrency =
        lookup_u64(&lookup, "JIRA_DUMPER_CONCURRENCY", cfg.http.concurrency as u64) as usize;
}

fn finalize(cfg: &mut DumperConfig, base_url_flag: Option<&str>) -> Result<()> {
    if let Some(flag) = base_url_flag.filter(|v| !v.trim().is_empty()) {
        cfg.tracker.base_url = Some(flag.to_string());
    }
    cfg.tracker.base_url = cfg.tracker.base_url.as_deref().map(normalize_base_url);
    validate(cfg)
}

pub fn load_config(base_url_flag: Option<&str>) -> Result<DumperConfig> {
    let mut cfg = DumperConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env_overrides(&mut cfg, |var| env::var(var).ok());
    finalize(&mut cfg, base_url_flag)?;
    Ok(cfg)
}
