//! Safe Browsing List Updater
//!
//! This crate keeps local storage in sync with the remote list service:
//! it reports the chunk ranges held locally, parses the directive response,
//! authenticates it, and applies chunk streams and deletions in one
//! transaction per response.

pub mod builder;
pub mod error;
pub mod mac;
pub mod parser;
pub mod updater;

pub use builder::build_data_request;
pub use error::UpdateError;
pub use mac::MacKeys;
pub use parser::{parse_directives, parse_key_response, Directive};
pub use updater::{UpdateOutcome, Updater, RESTART_LIMIT};
