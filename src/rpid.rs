//! Default origin-verification policy.
//!
//! Full TrustedFacets / eTLD+1 resolution belongs to the embedding
//! application; these functions implement the same-site checks a
//! standalone client needs and define the seam callers can replace.

use anyhow::{anyhow, Result};

/// Decides whether `origin` may act for the given identifier. Clients
/// hold one of these; tests and embedders substitute their own policy.
pub type OriginVerifier = fn(&str, &str) -> Result<bool>;

fn origin_host(origin: &str) -> Result<&str> {
    let rest = origin
        .strip_prefix("https://")
        .ok_or_else(|| anyhow!("origin is not https: {}", origin))?;
    let host = rest.split('/').next().unwrap_or(rest);
    let host = host.split(':').next().unwrap_or(host);
    if host.is_empty() {
        return Err(anyhow!("origin has no host: {}", origin));
    }
    Ok(host)
}

/// Checks a CTAP2 relying-party id against the caller origin: the
/// origin host must equal the RP id or be a subdomain of it.
pub fn verify_rp_id(rp_id: &str, origin: &str) -> Result<bool> {
    if rp_id.is_empty() {
        return Ok(false);
    }
    let host = origin_host(origin)?;
    Ok(host == rp_id || host.ends_with(&format!(".{}", rp_id)))
}

/// Checks a CTAP1 app-id (a URL) against the caller origin: same host,
/// or the app-id host is a registrable suffix of the origin host.
pub fn verify_app_id(app_id: &str, origin: &str) -> Result<bool> {
    if app_id == origin {
        return Ok(true);
    }
    let app_host = origin_host(app_id)?;
    verify_rp_id(app_host, origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rp_id_exact_match() {
        assert!(verify_rp_id("example.com", "https://example.com").unwrap());
        assert!(verify_rp_id("example.com", "https://example.com:8443").unwrap());
    }

    #[test]
    fn test_rp_id_subdomain() {
        assert!(verify_rp_id("example.com", "https://login.example.com").unwrap());
        assert!(!verify_rp_id("example.com", "https://badexample.com").unwrap());
    }

    #[test]
    fn test_rp_id_rejects_http() {
        assert!(verify_rp_id("example.com", "http://example.com").is_err());
    }

    #[test]
    fn test_app_id_same_origin() {
        assert!(verify_app_id("https://example.com", "https://example.com").unwrap());
        assert!(verify_app_id("https://example.com/app-id.json", "https://example.com").unwrap());
        assert!(!verify_app_id("https://other.com", "https://example.com").unwrap());
    }
}
