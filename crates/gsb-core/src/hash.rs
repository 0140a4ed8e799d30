//! Host key and prefix derivation
//!
//! Every lookup hashes a small, fixed set of URL expressions with SHA-256:
//!
//! - **Host keys** index local storage. A host with more than two labels
//!   yields two keys (last three labels, last two labels), anything else a
//!   single key. Each key is the expression with a trailing `/`.
//! - **Prefix variants** are the host-suffix × path-prefix combinations a
//!   list entry may have been computed from, capped at 30.
//!
//! Only the leading bytes of each digest are compared locally; full digests
//! are used for remote confirmation.

use sha2::{Digest, Sha256};

use crate::types::{FullHash, HostKey};
use crate::url::CanonicalForm;

/// Upper bound on host suffix candidates, exact host included.
const MAX_HOST_VARIANTS: usize = 5;

/// Number of leading path components combined into path candidates.
const MAX_PATH_COMPONENTS: usize = 4;

/// Upper bound on prefix variants per URL.
pub const MAX_PREFIX_VARIANTS: usize = 30;

/// SHA-256 of a URL expression.
#[inline]
pub fn sha256(data: &[u8]) -> FullHash {
    Sha256::digest(data).into()
}

// =============================================================================
// Host Keys
// =============================================================================

/// A host key candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostKeyVariant {
    /// Expression that was hashed, e.g. `b.c.com/`
    pub variant: String,
    pub full_hash: FullHash,
    /// First four bytes of `full_hash`
    pub key: HostKey,
}

impl HostKeyVariant {
    fn new(variant: String) -> Self {
        let full_hash = sha256(variant.as_bytes());
        let key = HostKey([full_hash[0], full_hash[1], full_hash[2], full_hash[3]]);
        Self { variant, full_hash, key }
    }
}

/// Derive the host keys for a canonical host.
pub fn host_keys(host: &str, is_ip: bool) -> Vec<HostKeyVariant> {
    let labels: Vec<&str> = host.split('.').collect();
    if is_ip || labels.len() <= 2 {
        return vec![HostKeyVariant::new(format!("{host}/"))];
    }

    let n = labels.len();
    [3, 2]
        .iter()
        .map(|&k| HostKeyVariant::new(format!("{}/", labels[n - k..].join("."))))
        .collect()
}

// =============================================================================
// Prefix Variants
// =============================================================================

/// A URL expression a list entry may have been computed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixVariant {
    /// Expression that was hashed, e.g. `a.b.c/1/`
    pub original: String,
    pub full_hash: FullHash,
}

impl PrefixVariant {
    fn new(original: String) -> Self {
        let full_hash = sha256(original.as_bytes());
        Self { original, full_hash }
    }

    /// Leading `len` bytes of the full hash. Clamped to 32.
    #[inline]
    pub fn prefix(&self, len: usize) -> &[u8] {
        &self.full_hash[..len.min(self.full_hash.len())]
    }

    /// Whether a stored prefix was computed from this expression.
    #[inline]
    pub fn matches(&self, prefix: &[u8]) -> bool {
        !prefix.is_empty() && self.full_hash.starts_with(prefix)
    }
}

/// Derive prefix variants from canonical components.
pub fn prefixes(host: &str, path: &str, query: Option<&str>, is_ip: bool) -> Vec<PrefixVariant> {
    let hosts = host_candidates(host, is_ip);
    let paths = path_candidates(path, query);

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for h in &hosts {
        for p in &paths {
            let expr = format!("{h}{p}");
            if seen.insert(expr.clone()) {
                out.push(PrefixVariant::new(expr));
                if out.len() == MAX_PREFIX_VARIANTS {
                    return out;
                }
            }
        }
    }
    out
}

/// Derive prefix variants for a canonical form.
pub fn url_prefixes(form: &CanonicalForm) -> Vec<PrefixVariant> {
    prefixes(&form.host, &form.path, form.query.as_deref(), form.is_ip)
}

fn host_candidates(host: &str, is_ip: bool) -> Vec<String> {
    let mut out = vec![host.to_string()];
    if is_ip {
        return out;
    }

    let labels: Vec<&str> = host.split('.').collect();
    let n = labels.len();
    for k in (2..=n.min(MAX_HOST_VARIANTS)).rev() {
        let suffix = labels[n - k..].join(".");
        if !out.contains(&suffix) {
            out.push(suffix);
        }
    }
    out
}

fn path_candidates(path: &str, query: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    let mut push = |candidate: String| {
        if !out.contains(&candidate) {
            out.push(candidate);
        }
    };

    if let Some(q) = query {
        push(format!("{path}?{q}"));
    }
    push(path.to_string());

    let parts: Vec<&str> = path.split('/').collect();
    let mut acc = String::new();
    for (i, part) in parts.iter().enumerate().take(MAX_PATH_COMPONENTS) {
        acc.push_str(part);
        if i + 1 < parts.len() {
            acc.push('/');
        }
        push(acc.clone());
    }
    out
}
