//! Scope vocabulary and scope-set arithmetic.

use serde::Serialize;
use utoipa::ToSchema;

pub const SCOPE_OPENID: &str = "openid";
pub const SCOPE_PROFILE: &str = "profile";
pub const SCOPE_EMAIL: &str = "email";
/// Modify profile fields through the JSON API
pub const SCOPE_PROFILE_WRITE: &str = "profile:write";
/// Read the caller's own download history
pub const SCOPE_DOWNLOADS_READ: &str = "downloads:read";

/// Every scope this server understands, in discovery order.
pub const SUPPORTED_SCOPES: &[&str] = &[
    SCOPE_OPENID,
    SCOPE_PROFILE,
    SCOPE_EMAIL,
    SCOPE_PROFILE_WRITE,
    SCOPE_DOWNLOADS_READ,
];

/// Human-readable scope information for the consent screen.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScopeInfo {
    pub scope: String,
    pub name: String,
    pub description: String,
}

pub fn scope_info(scope: &str) -> ScopeInfo {
    let (name, description) = match scope {
        SCOPE_OPENID => ("OpenID", "Verify your identity".to_string()),
        SCOPE_PROFILE => ("Profile", "Access your name, username and avatar".to_string()),
        SCOPE_EMAIL => ("Email", "Access your email address".to_string()),
        SCOPE_PROFILE_WRITE => ("Edit profile", "Update your public profile".to_string()),
        SCOPE_DOWNLOADS_READ => ("Downloads", "See which files you downloaded".to_string()),
        other => (other, format!("Access to {other}")),
    };
    ScopeInfo {
        scope: scope.to_string(),
        name: name.to_string(),
        description,
    }
}

/// Split a space-delimited scope string, dropping duplicates but keeping order.
pub fn parse(scope: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for s in scope.split_whitespace() {
        if !out.iter().any(|existing| existing == s) {
            out.push(s.to_string());
        }
    }
    out
}

/// True when every scope in `requested` also appears in `granted`.
pub fn is_subset(requested: &str, granted: &str) -> bool {
    let granted = parse(granted);
    requested
        .split_whitespace()
        .all(|s| granted.iter().any(|g| g == s))
}

/// Union of two scope strings, preserving the order of first appearance.
pub fn union(a: &str, b: &str) -> String {
    parse(&format!("{a} {b}")).join(" ")
}

/// Narrow a requested scope string to what a client may receive.
///
/// An absent or blank request yields the client's full scope set. Returns `None`
/// when none of the requested scopes are allowed.
pub fn negotiate(requested: Option<&str>, allowed: &[String]) -> Option<String> {
    let requested = requested.map(str::trim).filter(|s| !s.is_empty());
    match requested {
        None => {
            if allowed.is_empty() {
                None
            } else {
                Some(allowed.join(" "))
            }
        }
        Some(requested) => {
            let granted: Vec<String> = parse(requested)
                .into_iter()
                .filter(|s| allowed.iter().any(|a| a == s))
                .collect();
            if granted.is_empty() {
                None
            } else {
                Some(granted.join(" "))
            }
        }
    }
}
