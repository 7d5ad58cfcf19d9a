//! Canonicalisation of git remote URLs.
//!
//! Repos are keyed by canonical origin so that `git@github.com:org/repo.git`,
//! `https://github.com/org/repo`, and `ssh://git@github.com/org/repo.git` all
//! resolve to the same row.

use crate::error::{Error, Result};

/// Normalise a git origin to `host/path` form: scheme and userinfo stripped,
/// host lowercased, `.git` suffix and trailing slashes removed.
pub fn canonicalize(origin: &str) -> Result<String> {
    let raw = origin.trim();
    if raw.is_empty() {
        return Err(Error::Validation("repo origin must not be empty".into()));
    }

    // scp-like syntax: user@host:path
    let rest = if let Some((head, path)) = split_scp_like(raw) {
        format!("{}/{}", head, path)
    } else {
        let no_scheme = raw
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(raw);
        no_scheme.to_string()
    };

    // Drop userinfo.
    let rest = rest.rsplit_once('@').map(|(_, r)| r).unwrap_or(&rest);

    let (host, path) = rest
        .split_once('/')
        .ok_or_else(|| Error::Validation(format!("origin {origin:?} has no path component")))?;

    // Drop a port if present.
    let host = host.split_once(':').map(|(h, _)| h).unwrap_or(host);

    let path = path
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .trim_end_matches('/');
    if host.is_empty() || path.is_empty() {
        return Err(Error::Validation(format!("origin {origin:?} is not a git remote")));
    }

    Ok(format!("{}/{}", host.to_ascii_lowercase(), path))
}

/// Detect `user@host:path` (no scheme, single colon before the first slash).
fn split_scp_like(raw: &str) -> Option<(&str, &str)> {
    if raw.contains("://") {
        return None;
    }
    let (head, tail) = raw.split_once(':')?;
    if head.contains('/') || tail.starts_with("//") {
        return None;
    }
    // A purely numeric tail head would be a port, not a path.
    Some((head, tail.trim_start_matches('/')))
}
