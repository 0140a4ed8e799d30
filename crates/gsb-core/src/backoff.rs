//! Request backoff
//!
//! Each request kind keeps a persisted failure counter and a "not before"
//! deadline. Consecutive failures wait 60s, then an exponentially growing
//! randomized interval, capped at eight hours.

use log::warn;
use rand::Rng;

use crate::storage::{retry_once, Storage, StorageResult};
use crate::types::RequestKind;

/// Wait after the first failure.
pub const FIRST_BACKOFF_SECS: u64 = 60;

/// Wait once failures exceed `MAX_SCALED_ATTEMPT`.
pub const MAX_BACKOFF_SECS: u64 = 8 * 60 * 60;

/// Last attempt that gets a randomized exponential wait.
const MAX_SCALED_ATTEMPT: u32 = 5;

/// Wait before retrying after `attempt` consecutive failures. `jitter` is a
/// uniform sample from [0, 1).
pub fn backoff_seconds(attempt: u32, jitter: f64) -> u64 {
    match attempt {
        0 => 0,
        1 => FIRST_BACKOFF_SECS,
        2..=MAX_SCALED_ATTEMPT => {
            let jitter = jitter.clamp(0.0, 1.0);
            ((1u64 << attempt) as f64 * 7.5 * (jitter + 1.0)).floor() as u64
        }
        _ => MAX_BACKOFF_SECS,
    }
}

/// `backoff_seconds` with a fresh random jitter.
pub fn random_backoff_seconds(attempt: u32) -> u64 {
    backoff_seconds(attempt, rand::thread_rng().gen::<f64>())
}

/// Persisted backoff state for one request kind. Written outside any open
/// update transaction.
pub struct Backoff<'a> {
    storage: &'a dyn Storage,
    kind: RequestKind,
}

impl<'a> Backoff<'a> {
    pub fn new(storage: &'a dyn Storage, kind: RequestKind) -> Self {
        Self { storage, kind }
    }

    /// Consecutive failures recorded so far.
    pub fn failures(&self) -> StorageResult<u32> {
        Ok(self.read_number(&self.kind.backoff_key())?.unwrap_or(0) as u32)
    }

    /// Seconds until requests may be sent again, if still blocked.
    pub fn remaining(&self, now: u64) -> StorageResult<Option<u64>> {
        let deadline = self.read_number(&self.kind.timeout_key())?.unwrap_or(0);
        Ok((deadline > now).then(|| deadline - now))
    }

    /// Count a failure and push the deadline out. Returns the wait.
    pub fn record_failure(&self, now: u64) -> StorageResult<u64> {
        let attempt = self.failures()?.saturating_add(1);
        let wait = random_backoff_seconds(attempt);
        self.write(&self.kind.backoff_key(), attempt as u64)?;
        self.write(&self.kind.timeout_key(), now + wait)?;
        warn!(
            "{} request failed {} time(s) in a row, backing off for {}s",
            self.kind.as_str(),
            attempt,
            wait
        );
        Ok(wait)
    }

    /// Clear the failure count and schedule the next request.
    pub fn record_success(&self, now: u64, next_in: u64) -> StorageResult<()> {
        self.write(&self.kind.backoff_key(), 0)?;
        self.write(&self.kind.timeout_key(), now + next_in)
    }

    /// Clear the failure count, leaving the deadline alone.
    pub fn clear_failures(&self) -> StorageResult<()> {
        if self.failures()? != 0 {
            self.write(&self.kind.backoff_key(), 0)?;
        }
        Ok(())
    }

    fn read_number(&self, key: &str) -> StorageResult<Option<u64>> {
        let value = retry_once("config read", || self.storage.get_config(key))?;
        Ok(value.and_then(|v| match v.trim().parse() {
            Ok(n) => Some(n),
            Err(_) => {
                warn!("Ignoring malformed config value {key}={v:?}");
                None
            }
        }))
    }

    fn write(&self, key: &str, value: u64) -> StorageResult<()> {
        let value = value.to_string();
        retry_once("config write", || self.storage.set_config_outside_transaction(key, &value))
    }
}
