//! Update orchestrator
//!
//! One `run_update` call performs a full synchronization cycle:
//!
//! ```text
//! CheckTimeout -> SetupMAC -> RequestRanges -> RequestData -> ProcessDirectives -> Commit | Rollback
//! ```
//!
//! A whole downloads response is applied in a single storage transaction.
//! Any decode, authentication or storage failure rolls it back, records a
//! failure for backoff and ends the run. A reset or rekey request restarts
//! the cycle, at most [`RESTART_LIMIT`] times per run.

use std::collections::HashSet;

use log::{debug, error, info, warn};

use gsb_core::backoff::Backoff;
use gsb_core::chunk::parse_chunk_stream;
use gsb_core::clock::{Clock, SystemClock};
use gsb_core::storage::{retry_once, SaveOutcome, Storage};
use gsb_core::{ChunkKind, ChunkKinds, ClientConfig, Error, Request, RequestKind, Transport};

use crate::builder::build_data_request;
use crate::error::UpdateError;
use crate::mac::MacKeys;
use crate::parser::{parse_directives, parse_key_response, Directive};

/// Maximum cycles per run.
pub const RESTART_LIMIT: usize = 3;

static SYSTEM_CLOCK: SystemClock = SystemClock;

/// Result of an update run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The previous run asked us to wait (or we are backing off)
    Blocked { remaining: u64 },
    /// A response was applied and committed
    Completed { saved: usize, next_update_in: u64 },
    /// Every cycle ended in a reset or rekey request
    RestartLimit,
}

/// What a cycle asks the run to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Done { next_in: Option<u64> },
    Reset,
    Rekey,
}

type ChunkId = (String, ChunkKind, u32);

/// Chunks already applied during this run.
#[derive(Debug, Default)]
struct Session {
    processed: HashSet<ChunkId>,
    saved: usize,
}

/// Chunks applied by the open transaction.
#[derive(Debug, Default)]
struct Pending {
    applied: HashSet<ChunkId>,
    saved: usize,
}

/// The update orchestrator.
pub struct Updater<'a> {
    storage: &'a dyn Storage,
    transport: &'a dyn Transport,
    config: &'a ClientConfig,
    clock: &'a dyn Clock,
}

impl<'a> Updater<'a> {
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

    /// Run one update. A no-op while the persisted data timeout is pending.
    pub fn run_update(&self) -> Result<UpdateOutcome, UpdateError> {
        let backoff = Backoff::new(self.storage, RequestKind::Data);
        if let Some(remaining) = backoff.remaining(self.clock.now())? {
            info!("Next update allowed in {remaining}s, skipping");
            return Ok(UpdateOutcome::Blocked { remaining });
        }

        let mut session = Session::default();
        for cycle in 1..=RESTART_LIMIT {
            match self.run_cycle(&mut session) {
                Ok(Flow::Done { next_in }) => {
                    let next_update_in = next_in.unwrap_or(self.config.default_update_interval_secs);
                    backoff.record_success(self.clock.now(), next_update_in)?;
                    info!(
                        "Update committed: {} chunk(s) saved, next update in {next_update_in}s",
                        session.saved
                    );
                    return Ok(UpdateOutcome::Completed {
                        saved: session.saved,
                        next_update_in,
                    });
                }
                Ok(Flow::Reset) => {
                    info!("Server reset all lists, restarting ({cycle}/{RESTART_LIMIT})");
                    session.processed.clear();
                }
                Ok(Flow::Rekey) => {
                    info!("Server requested new MAC keys, restarting ({cycle}/{RESTART_LIMIT})");
                    MacKeys::clear(self.storage)?;
                }
                Err(e) => {
                    error!("Update failed: {e}");
                    if let Err(se) = backoff.record_failure(self.clock.now()) {
                        error!("Failed to record update backoff: {se}");
                    }
                    return Err(e);
                }
            }
        }

        warn!("Update restarted {RESTART_LIMIT} times, giving up for this run");
        backoff.record_failure(self.clock.now())?;
        Ok(UpdateOutcome::RestartLimit)
    }

    // =========================================================================
    // Cycle
    // =========================================================================

    fn run_cycle(&self, session: &mut Session) -> Result<Flow, UpdateError> {
        let keys = if self.config.use_mac { self.ensure_keys()? } else { None };

        let ranges = retry_once("range query", || {
            self.storage.list_ranges(&self.config.lists, ChunkKinds::ALL)
        })?;
        let body = build_data_request(&self.config.lists, &ranges, keys.is_some());
        debug!("Downloads request:\n{body}");

        let response = self.transport.send(&Request::Downloads {
            body: body.as_bytes(),
            wrapped_key: keys.as_ref().map(|k| k.wrapped_key.as_str()),
        })?;
        if response.status != 200 {
            return Err(Error::Remote { status: response.status }.into());
        }

        let text = std::str::from_utf8(&response.body)
            .map_err(|_| UpdateError::protocol("downloads response is not text"))?;
        let directives = parse_directives(text)?;

        if directives.first() == Some(&Directive::Rekey) {
            return Ok(Flow::Rekey);
        }
        if let Some(keys) = &keys {
            let Some(Directive::Mac(mac)) = directives.first() else {
                return Err(UpdateError::authentication("downloads response carries no MAC"));
            };
            let signed = text.split_once('\n').map_or("", |(_, rest)| rest);
            keys.verify(signed.as_bytes(), mac)?;
            debug!("Downloads response MAC verified");
        }

        retry_once("transaction start", || self.storage.start_transaction())?;
        let mut pending = Pending::default();
        let flow = match self.apply(&directives, keys.as_ref(), session, &mut pending) {
            Ok(flow) => flow,
            Err(e) => {
                self.rollback();
                return Err(e);
            }
        };

        if flow == Flow::Rekey {
            self.rollback();
            return Ok(flow);
        }

        if let Err(e) = self.storage.commit() {
            self.rollback();
            return Err(e.into());
        }
        session.processed.extend(pending.applied);
        session.saved += pending.saved;
        Ok(flow)
    }

    fn rollback(&self) {
        match self.storage.rollback() {
            Ok(()) => warn!("Update transaction rolled back"),
            Err(e) => error!("Rollback failed: {e}"),
        }
    }

    fn apply(
        &self,
        directives: &[Directive],
        keys: Option<&MacKeys>,
        session: &Session,
        pending: &mut Pending,
    ) -> Result<Flow, UpdateError> {
        let mut list: Option<&str> = None;
        let mut next_in = None;

        for directive in directives {
            match directive {
                Directive::Mac(_) => {}
                Directive::Rekey => return Ok(Flow::Rekey),
                Directive::Next(secs) => next_in = Some(*secs),
                Directive::Reset => {
                    self.storage.reset_lists(&self.config.lists, ChunkKinds::ALL)?;
                    return Ok(Flow::Reset);
                }
                Directive::List(name) => {
                    if !self.config.lists.contains(name) {
                        warn!("Server sent data for unsubscribed list {name}");
                    }
                    list = Some(name.as_str());
                }
                Directive::AddDel(ranges) => {
                    let list = current_list(list, "ad")?;
                    self.storage.delete_ranges(list, ChunkKind::Add, ranges)?;
                    debug!("Deleted add chunks {ranges:?} from {list}");
                }
                Directive::SubDel(ranges) => {
                    let list = current_list(list, "sd")?;
                    self.storage.delete_ranges(list, ChunkKind::Sub, ranges)?;
                    debug!("Deleted sub chunks {ranges:?} from {list}");
                }
                Directive::Redirect { url, mac } => {
                    let list = current_list(list, "u")?;
                    self.apply_redirect(list, url, mac.as_deref(), keys, session, pending)?;
                }
            }
        }

        Ok(Flow::Done { next_in })
    }

    fn apply_redirect(
        &self,
        list: &str,
        url: &str,
        mac: Option<&str>,
        keys: Option<&MacKeys>,
        session: &Session,
        pending: &mut Pending,
    ) -> Result<(), UpdateError> {
        let response = self.transport.send(&Request::Redirect { url })?;
        if response.status != 200 {
            return Err(Error::Remote { status: response.status }.into());
        }

        if let Some(keys) = keys {
            let mac = mac.ok_or_else(|| UpdateError::authentication(format!("redirect {url} carries no MAC")))?;
            keys.verify(&response.body, mac)?;
        }

        for chunk in parse_chunk_stream(list, &response.body)? {
            let id = (chunk.list.clone(), chunk.kind, chunk.number);
            if session.processed.contains(&id) || pending.applied.contains(&id) {
                debug!("Chunk {}:{} for {list} already applied this run", chunk.kind, chunk.number);
                continue;
            }
            match self.storage.save_chunk(&chunk)? {
                SaveOutcome::Saved => pending.saved += 1,
                SaveOutcome::Duplicate => {
                    warn!("Chunk {}:{} for {list} already stored, skipping", chunk.kind, chunk.number);
                }
            }
            pending.applied.insert(id);
        }
        Ok(())
    }

    // =========================================================================
    // Key Exchange
    // =========================================================================

    /// Stored keys, or a fresh pair. Key-exchange failure is not fatal: the
    /// run continues without MAC.
    fn ensure_keys(&self) -> Result<Option<MacKeys>, UpdateError> {
        if let Some(keys) = MacKeys::load(self.storage)? {
            return Ok(Some(keys));
        }
        match self.request_keys() {
            Ok(keys) => {
                keys.save(self.storage)?;
                info!("Obtained new MAC keys");
                Ok(Some(keys))
            }
            Err(e) => {
                warn!("Key exchange failed ({e}), continuing without MAC");
                Ok(None)
            }
        }
    }

    fn request_keys(&self) -> Result<MacKeys, UpdateError> {
        let response = self.transport.send(&Request::NewKey)?;
        if response.status != 200 {
            return Err(Error::Remote { status: response.status }.into());
        }
        let text = std::str::from_utf8(&response.body)
            .map_err(|_| UpdateError::KeyExchange("response is not text".to_string()))?;
        parse_key_response(text)
    }
}

fn current_list<'d>(list: Option<&'d str>, keyword: &str) -> Result<&'d str, UpdateError> {
    list.ok_or_else(|| UpdateError::protocol(format!("{keyword}: directive before any i: line")))
}
