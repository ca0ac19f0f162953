//! Append-only scan history.
//!
//! Records are serialized JSON rows ordered by an autoincrement sequence,
//! so `list` ordering reflects append order regardless of clock skew in the
//! stored timestamps. Existing rows are never edited or deleted through
//! this API; corrections require a new record.

pub mod error;
pub mod history;

pub use error::StoreError;
pub use history::HistoryStore;
