//! Branch name generation.
//!
//! Expands the configured pattern (`{username}`, `{date}`, `{message}`,
//! `{scope}`) and sanitizes the result into a valid git ref short-name:
//! characters outside `[A-Za-z0-9_/.-]` become `-`, runs of `-` collapse,
//! leading/trailing `-`, `/` and `.` are trimmed, a conventional-commit
//! prefix is stripped from the message component, and the final name is
//! capped at 234 bytes (trimming a trailing `-` the cap may produce).

use regex::Regex;
use std::sync::OnceLock;

use crate::errors::{Error, Result};

/// Byte cap on generated branch names; git itself allows longer names but
/// common forges and filesystems do not.
const MAX_BRANCH_NAME_BYTES: usize = 234;

fn conventional_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(feat|fix|chore|docs|style|refactor|perf|test|build|ci)(\([^)]+\))?:\s*")
            .expect("conventional prefix regex is valid")
    })
}

/// Inputs for pattern expansion.
#[derive(Debug, Clone, Default)]
pub struct NameParts<'a> {
    pub username: Option<&'a str>,
    /// YYYY-MM-DD; today when not supplied.
    pub date: Option<&'a str>,
    pub message: &'a str,
    pub scope: Option<&'a str>,
}

/// Generate a branch name from the configured pattern.
pub fn generate_branch_name(pattern: &str, parts: &NameParts) -> Result<String> {
    if parts.message.trim().is_empty() {
        return Err(Error::Other(anyhow::anyhow!(
            "a commit message is required to generate a branch name"
        )));
    }

    let message = conventional_prefix_re().replace(parts.message.lines().next().unwrap_or(""), "");

    let date = match parts.date {
        Some(d) => d.to_string(),
        None => chrono::Local::now().format("%Y-%m-%d").to_string(),
    };

    let expanded = pattern
        .replace("{username}", &sanitize_component(parts.username.unwrap_or("")))
        .replace("{date}", &date)
        .replace("{message}", &sanitize_component(&message))
        .replace("{scope}", &sanitize_component(parts.scope.unwrap_or("")));

    let name = sanitize_branch_name(&expanded);
    if name.is_empty() {
        return Err(Error::Other(anyhow::anyhow!(
            "branch name pattern '{}' produced an empty name",
            pattern
        )));
    }
    Ok(name)
}

/// Sanitize one pattern component: no separators survive inside a component.
fn sanitize_component(s: &str) -> String {
    let mapped: String = s
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    collapse_dashes(&mapped)
}

/// Sanitize a fully expanded name, keeping `/` separators from the pattern.
pub fn sanitize_branch_name(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '/' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut name = collapse_dashes(&mapped);
    name = name
        .trim_matches(|c| c == '-' || c == '/' || c == '.')
        .to_string();

    if name.len() > MAX_BRANCH_NAME_BYTES {
        let mut cut = MAX_BRANCH_NAME_BYTES;
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        name.truncate(cut);
        name = name
            .trim_end_matches(|c| c == '-' || c == '/' || c == '.')
            .to_string();
    }
    name
}

fn collapse_dashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_dash = false;
    for c in s.chars() {
        if c == '-' {
            if !prev_dash {
                out.push(c);
            }
            prev_dash = true;
        } else {
            out.push(c);
            prev_dash = false;
        }
    }
    out
}
