//! API-key discovery.
//!
//! Checks in order:
//! 1. `--api-key` / `WANDB_API_KEY`
//! 2. the `~/.netrc` entry for the API host (where `wandb login` stores it)

use crate::error::{ToolError, ToolResult};
use std::path::PathBuf;
use tracing::debug;

pub fn resolve_api_key(explicit: Option<&str>, base_url: &str) -> ToolResult<String> {
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    let host = reqwest::Url::parse(base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .ok_or_else(|| ToolError::config(format!("invalid base url '{base_url}'")))?;

    if let Some(path) = netrc_path() {
        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Some(key) = netrc_password(&contents, &host) {
                debug!(path = %path.display(), host, "using API key from netrc");
                return Ok(key);
            }
        }
    }

    Err(ToolError::config(format!(
        "no API key: pass --api-key, set WANDB_API_KEY, or run `wandb login` for {host}"
    )))
}

fn netrc_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("NETRC") {
        if !p.is_empty() {
            return Some(PathBuf::from(p));
        }
    }
    dirs::home_dir().map(|h| h.join(".netrc"))
}

/// Password for `host`, falling back to a `default` entry.
pub fn netrc_password(contents: &str, host: &str) -> Option<String> {
    let mut tokens = contents.split_whitespace();
    let mut current: Option<String> = None;
    let mut fallback = None;

    while let Some(tok) = tokens.next() {
        match tok {
            "machine" => current = tokens.next().map(str::to_string),
            "default" => current = Some(String::new()),
            "password" => {
                let Some(pw) = tokens.next() else { break };
                match current.as_deref() {
                    Some(m) if m == host => return Some(pw.to_string()),
                    Some("") => fallback = Some(pw.to_string()),
                    _ => {}
                }
            }
            _ => {}
        }
    }
    fallback
}
