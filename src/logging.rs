use std::env;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info";

fn resolve_filter(dumper_log: Option<String>) -> EnvFilter {
    if let Some(raw) = dumper_log.filter(|v| !v.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(raw.trim()) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the stderr subscriber. Stdout stays reserved for command reports.
pub fn init() {
    let filter = resolve_filter(env::var("JIRA_DUMPER_LOG").ok());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
