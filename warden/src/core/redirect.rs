//! Redirect target decision logic.
//!
//! Pure half of the resolver: percent-decoding with raw fallback, restricted
//! host matching, and the home-page override. Store access and priming
//! side effects live in [`crate::redirect`].

use percent_encoding::percent_decode_str;
use url::Url;

/// Outcome of the target decision for a candidate URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetDecision {
    /// Host is not restricted: navigate to the candidate unchanged.
    PassThrough(String),
    /// Host is restricted: navigate to that host's home page with a
    /// cache-busting timestamp instead. Redirecting back into a restricted
    /// deep link would immediately re-trigger the block.
    HomeOverride { url: String, host: String },
}

impl TargetDecision {
    pub fn url(&self) -> &str {
        match self {
            TargetDecision::PassThrough(url) => url,
            TargetDecision::HomeOverride { url, .. } => url,
        }
    }

    pub fn is_restricted(&self) -> bool {
        matches!(self, TargetDecision::HomeOverride { .. })
    }
}

/// Percent-decode an original-URL parameter. Malformed encodings fall back
/// to the raw input; decode failures never surface to the caller.
pub fn decode_url(encoded: &str) -> String {
    match percent_decode_str(encoded).decode_utf8() {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => encoded.to_string(),
    }
}

/// Whether `host` matches the restricted domain set (exact or subdomain).
pub fn host_is_restricted(host: &str, domains: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    domains.iter().any(|domain| {
        let domain = domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

/// Decide the navigation target for a decoded candidate URL.
///
/// A candidate that does not parse has no host, cannot match the restricted
/// set, and passes through unchanged.
pub fn decide_target(candidate: &str, domains: &[String], now_ms: i64) -> TargetDecision {
    let Ok(url) = Url::parse(candidate) else {
        return TargetDecision::PassThrough(candidate.to_string());
    };
    let Some(host) = url.host_str() else {
        return TargetDecision::PassThrough(candidate.to_string());
    };
    if !host_is_restricted(host, domains) {
        return TargetDecision::PassThrough(candidate.to_string());
    }

    let host = host.to_string();
    let mut home = url;
    home.set_path("/");
    home.set_query(Some(&format!("ts={now_ms}")));
    home.set_fragment(None);
    TargetDecision::HomeOverride {
        url: home.to_string(),
        host,
    }
}
