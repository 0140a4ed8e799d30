//! Lookup engine
//!
//! Answers whether a URL is listed:
//!
//! 1. Canonicalize the URL and derive its host keys.
//! 2. Fetch committed add entries filed under each host key, per list.
//! 3. Drop entries a sub chunk cancelled. Host-level entries escalate the
//!    host key itself; prefix entries escalate every prefix variant of the
//!    URL they match.
//! 4. Answer from the full-hash cache where possible, otherwise send one
//!    batched full-hash request per prefix length and cache what comes back.
//!
//! Cancellation is always evaluated before anything is sent, and nothing
//! is sent at all when no stored prefix matches.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::backoff::Backoff;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::fullhash::{self, FullHashRecord};
use crate::hash::{host_keys, url_prefixes, PrefixVariant};
use crate::remote::{Request, Transport};
use crate::storage::{retry_once, CachedFullHash, Storage};
use crate::types::{FullHash, ListMatch, RequestKind, Verdict};
use crate::url::{canonicalize, CanonicalForm};

static SYSTEM_CLOCK: SystemClock = SystemClock;

/// What `is_listed` reports when a lookup cannot be confirmed either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailPolicy {
    /// Treat as not listed
    #[default]
    Open,
    /// Treat as listed
    Closed,
}

/// A local prefix hit awaiting confirmation.
#[derive(Debug, Clone)]
struct MatchCandidate {
    list: String,
    add_chunk: u32,
    prefix: Vec<u8>,
    full_hash: FullHash,
}

impl MatchCandidate {
    fn to_match(&self) -> ListMatch {
        ListMatch {
            list: self.list.clone(),
            add_chunk: self.add_chunk,
            full_hash: self.full_hash,
        }
    }
}

/// The lookup engine.
pub struct Matcher<'a> {
    storage: &'a dyn Storage,
    transport: &'a dyn Transport,
    config: &'a ClientConfig,
    clock: &'a dyn Clock,
}

impl<'a> Matcher<'a> {
    pub fn new(storage: &'a dyn Storage, transport: &'a dyn Transport, config: &'a ClientConfig) -> Self {
        Self {
            storage,
            transport,
            config,
            clock: &SYSTEM_CLOCK,
        }
    }

    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Look a URL up. Confirmation failures come back as
    /// [`Error::Indeterminate`]; storage failures as [`Error::Storage`].
    pub fn lookup(&self, url: &str) -> Result<Verdict> {
        self.lookup_form(&canonicalize(url))
    }

    /// Look up an already canonicalized URL.
    pub fn lookup_form(&self, form: &CanonicalForm) -> Result<Verdict> {
        let candidates = self.collect_candidates(form)?;
        if candidates.is_empty() {
            return Ok(Verdict::NotListed);
        }
        debug!("{} candidate prefix(es) for {}", candidates.len(), form.matching_form());
        self.confirm(&candidates)
    }

    /// Look a URL up, resolving indeterminate outcomes with `policy`.
    pub fn is_listed(&self, url: &str, policy: FailPolicy) -> Result<bool> {
        match self.lookup(url) {
            Ok(verdict) => Ok(verdict.is_listed()),
            Err(e) if e.is_indeterminate() => {
                warn!("Lookup for {url} indeterminate ({e}), failing {policy:?}");
                Ok(policy == FailPolicy::Closed)
            }
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Local Matching
    // =========================================================================

    fn collect_candidates(&self, form: &CanonicalForm) -> Result<Vec<MatchCandidate>> {
        let keys = host_keys(&form.host, form.is_ip);
        let mut variants: Option<Vec<PrefixVariant>> = None;
        let mut candidates = Vec::new();

        for list in &self.config.lists {
            for key in &keys {
                let hits = retry_once("add entry lookup", || self.storage.add_hits(list, key.key))?;
                for hit in hits {
                    if hit.prefixes.is_empty() {
                        if retry_once("host cancel check", || self.storage.host_cancelled(list, key.key, hit.add_chunk))? {
                            debug!("Host {} in {list} add chunk {} cancelled", key.variant, hit.add_chunk);
                            continue;
                        }
                        candidates.push(MatchCandidate {
                            list: list.clone(),
                            add_chunk: hit.add_chunk,
                            prefix: key.key.as_bytes().to_vec(),
                            full_hash: key.full_hash,
                        });
                        continue;
                    }

                    let variants = variants.get_or_insert_with(|| url_prefixes(form));
                    for prefix in &hit.prefixes {
                        let matching: Vec<&PrefixVariant> = variants.iter().filter(|v| v.matches(prefix)).collect();
                        if matching.is_empty() {
                            continue;
                        }
                        if retry_once("prefix cancel check", || {
                            self.storage.prefix_cancelled(list, key.key, hit.add_chunk, prefix)
                        })? {
                            debug!("Prefix under {} in {list} add chunk {} cancelled", key.variant, hit.add_chunk);
                            continue;
                        }
                        for v in matching {
                            candidates.push(MatchCandidate {
                                list: list.clone(),
                                add_chunk: hit.add_chunk,
                                prefix: prefix.clone(),
                                full_hash: v.full_hash,
                            });
                        }
                    }
                }
            }
        }

        Ok(candidates)
    }

    // =========================================================================
    // Confirmation
    // =========================================================================

    fn confirm(&self, candidates: &[MatchCandidate]) -> Result<Verdict> {
        let now = self.clock.now();
        let ttl = self.config.full_hash_ttl_secs;
        let mut unresolved = Vec::new();

        for c in candidates {
            let cached = retry_once("full-hash cache read", || {
                self.storage.cached_full_hashes(&c.list, c.add_chunk, &c.prefix)
            })?;
            let fresh: Vec<CachedFullHash> = cached
                .into_iter()
                .filter(|h| now.saturating_sub(h.cached_at) < ttl)
                .collect();
            if fresh.is_empty() {
                unresolved.push(c);
            } else if fresh.iter().any(|h| h.full_hash == c.full_hash) {
                debug!("Cached full hash confirms {} add chunk {}", c.list, c.add_chunk);
                return Ok(Verdict::Listed(c.to_match()));
            }
        }

        if unresolved.is_empty() {
            return Ok(Verdict::NotListed);
        }

        let records = self.request_full_hashes(&unresolved)?;
        let mut verdict = Verdict::NotListed;
        for record in &records {
            let related: Vec<&&MatchCandidate> = unresolved
                .iter()
                .filter(|c| c.list == record.list && c.add_chunk == record.add_chunk && record.hash.starts_with(&c.prefix))
                .collect();
            if related.is_empty() {
                continue;
            }

            let entry = CachedFullHash {
                list: record.list.clone(),
                add_chunk: record.add_chunk,
                full_hash: record.hash,
                cached_at: now,
            };
            if let Err(e) = retry_once("full-hash cache write", || self.storage.cache_full_hash(&entry)) {
                warn!("Failed to cache full hash for {}: {e}", record.list);
            }

            if !verdict.is_listed() {
                if let Some(c) = related.iter().find(|c| c.full_hash == record.hash) {
                    verdict = Verdict::Listed(c.to_match());
                }
            }
        }

        Ok(verdict)
    }

    fn request_full_hashes(&self, candidates: &[&MatchCandidate]) -> Result<Vec<FullHashRecord>> {
        let now = self.clock.now();
        let backoff = Backoff::new(self.storage, RequestKind::Lookup);
        if let Some(remaining) = backoff.remaining(now)? {
            return Err(Error::indeterminate(Error::Backoff { remaining }));
        }

        let mut by_len: BTreeMap<usize, Vec<&[u8]>> = BTreeMap::new();
        for c in candidates {
            let group = by_len.entry(c.prefix.len()).or_default();
            if !group.contains(&c.prefix.as_slice()) {
                group.push(&c.prefix);
            }
        }

        let mut records = Vec::new();
        for (len, prefixes) in &by_len {
            let body = fullhash::encode_request(*len, prefixes)?;
            match self.fetch_full_hashes(&body) {
                Ok(batch) => records.extend(batch),
                Err(e) => {
                    backoff.record_failure(now)?;
                    return Err(Error::indeterminate(e));
                }
            }
        }

        backoff.clear_failures()?;
        Ok(records)
    }

    fn fetch_full_hashes(&self, body: &[u8]) -> Result<Vec<FullHashRecord>> {
        let response = self.transport.send(&Request::FullHash { body })?;
        match response.status {
            200 => Ok(fullhash::parse_response(&response.body)?),
            204 => Ok(Vec::new()),
            status => Err(Error::Remote { status }),
        }
    }
}
