//! # Event Persister
//!
//! Drains the shared events queue and appends each purchase or donation to
//! its table. A message is deleted only after its row is written.

pub mod event_persister;

pub use event_persister::{EventPersister, PersisterStats, PersisterStatsSnapshot, ProcessOutcome};
