//! Connpoint (`tcp://host:port`) validation and formatting.
//!
//! Endpoint strings cross trust boundaries twice: catalogues compose them
//! from transport metadata, and peers receive them from catalogues. Both
//! sides funnel through here, so a malformed or hostile string never reaches
//! a socket `connect`.

use crate::error::{Result, RhizomeError};

/// Scheme prefix of every connpoint in the substrate.
pub const TCP_SCHEME: &str = "tcp://";

/// Compose a connpoint from a host and port, bracketing IPv6 literals.
///
/// # Examples
///
/// ```
/// use rhizome_core::connpoint;
///
/// assert_eq!(connpoint::format("203.0.113.5", 60847), "tcp://203.0.113.5:60847");
/// assert_eq!(connpoint::format("::1", 60847), "tcp://[::1]:60847");
/// ```
#[must_use]
pub fn format(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("tcp://[{host}]:{port}")
    } else {
        format!("tcp://{host}:{port}")
    }
}

/// Validate a connpoint string.
///
/// Requirements: `tcp://` scheme, non-empty host, numeric port in
/// `0..=65535`. A host containing `:` must be a bracketed IPv6 literal.
///
/// # Errors
///
/// Returns [`RhizomeError::InvalidConnpoint`] naming the offending part.
pub fn validate(connpoint: &str) -> Result<()> {
    let rest = connpoint
        .strip_prefix(TCP_SCHEME)
        .ok_or_else(|| RhizomeError::invalid_connpoint(format!("missing tcp:// scheme: {connpoint}")))?;
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| RhizomeError::invalid_connpoint(format!("missing port: {connpoint}")))?;
    if host.is_empty() {
        return Err(RhizomeError::invalid_connpoint(format!("empty host: {connpoint}")));
    }
    if host.contains(':') {
        let inner = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .ok_or_else(|| {
                RhizomeError::invalid_connpoint(format!("unbracketed IPv6 host: {connpoint}"))
            })?;
        if inner.is_empty() {
            return Err(RhizomeError::invalid_connpoint(format!("empty host: {connpoint}")));
        }
    }
    port.parse::<u16>()
        .map_err(|_| RhizomeError::invalid_connpoint(format!("bad port: {connpoint}")))?;
    Ok(())
}
