use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

const UNKNOWN_ADDR: &str = "unknown";

/// Partition key for every piece of per-caller coordination state.
///
/// Always `user:<id>` or `ip:<address>`; never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn user(id: &str) -> Self {
        Self(format!("user:{}", id.trim()))
    }

    pub fn ip(addr: &str) -> Self {
        let addr = addr.trim();
        if addr.is_empty() {
            return Self(format!("ip:{UNKNOWN_ADDR}"));
        }
        Self(format!("ip:{addr}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_user(&self) -> bool {
        self.0.starts_with("user:")
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IdentityKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Case-insensitive read access to inbound request headers.
pub trait HeaderLookup {
    fn header(&self, name: &str) -> Option<&str>;
}

impl HeaderLookup for http::HeaderMap {
    fn header(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.to_str().ok())
    }
}

impl<S: BuildHasher> HeaderLookup for HashMap<String, String, S> {
    fn header(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    #[serde(default)]
    sub: Option<String>,
}

/// Reads the `sub` claim out of a bearer JWT **without verifying it**.
///
/// The signature is not checked here; token verification belongs to the
/// identity provider in front of this gateway. The result is only good enough
/// to partition quota state and must never be used to authorize anything.
pub fn unverified_bearer_subject(authorization: &str) -> Option<String> {
    let token = authorization.strip_prefix("Bearer ")?.trim();
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;

    let normalized: String = payload
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let decoded = URL_SAFE_NO_PAD.decode(normalized.as_bytes()).ok()?;
    let claims: UnverifiedClaims = serde_json::from_slice(&decoded).ok()?;

    claims
        .sub
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn first_listed(value: &str) -> Option<&str> {
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|v| !v.is_empty())
}

/// Best-effort client address from the proxy chain, then the socket peer.
pub fn client_address<H: HeaderLookup + ?Sized>(headers: &H, peer_addr: Option<&str>) -> String {
    headers
        .header("x-forwarded-for")
        .and_then(first_listed)
        .or_else(|| headers.header("x-real-ip").and_then(non_empty))
        .or_else(|| headers.header("cf-connecting-ip").and_then(non_empty))
        .or_else(|| headers.header("x-vercel-forwarded-for").and_then(first_listed))
        .or_else(|| peer_addr.and_then(non_empty))
        .unwrap_or(UNKNOWN_ADDR)
        .to_string()
}

pub fn resolve_identity_key<H: HeaderLookup + ?Sized>(
    headers: &H,
    explicit_user_id: Option<&str>,
    peer_addr: Option<&str>,
) -> IdentityKey {
    let explicit = explicit_user_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string);
    let user_id = explicit.or_else(|| {
        headers
            .header("authorization")
            .and_then(unverified_bearer_subject)
    });

    match user_id {
        Some(id) => IdentityKey::user(&id),
        None => IdentityKey::ip(&client_address(headers, peer_addr)),
    }
}
