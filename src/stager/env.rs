//! Staging environment
//!
//! Precedence, lowest first: platform variables, `staging_env`, `env`. The running
//! environment never reaches staging.

use crate::app::AppConfig;
use crate::config::{parse_memory_mb, StagerConfig};
use serde_json::json;
use std::collections::BTreeMap;

pub const MEMORY_LIMIT: &str = "MEMORY_LIMIT";

/// Builds the environment the staging script runs with and `app/env` records.
pub fn staging_env(app: &AppConfig, config: &StagerConfig) -> serde_json::Result<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();
    env.insert("CF_STACK".to_string(), config.stack_name.clone());
    env.insert("LANG".to_string(), "en_US.UTF-8".to_string());
    env.insert(MEMORY_LIMIT.to_string(), config.memory_limit.clone());
    env.insert(
        "VCAP_SERVICES".to_string(),
        serde_json::to_string(&app.services)?,
    );

    env.extend(app.staging_env.clone());
    env.extend(app.env.clone());

    // Reflect the effective limit, which may come from either user mapping
    let memory_mb = env
        .get(MEMORY_LIMIT)
        .and_then(|limit| parse_memory_mb(limit))
        .or_else(|| parse_memory_mb(&config.memory_limit));
    let application = json!({
        "application_name": app.name,
        "name": app.name,
        "space_name": "local",
        "limits": { "mem": memory_mb },
    });
    env.entry("VCAP_APPLICATION".to_string())
        .or_insert(serde_json::to_string(&application)?);

    Ok(env)
}

/// `KEY=VALUE` pairs as handed to the container runtime
pub fn to_pairs(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
}

/// Contents of `app/env`: one `KEY=VALUE` line per entry, ascending by key
pub fn render_env_file(env: &BTreeMap<String, String>) -> String {
    env.iter().map(|(k, v)| format!("{}={}\n", k, v)).collect()
}
