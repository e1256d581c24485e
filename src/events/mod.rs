//! # Event Publishing
//!
//! Producer side of the pipeline, used by the services that emit purchases,
//! donations and notification requests.

pub mod publisher;

pub use publisher::EventPublisher;
