//! # Push Notifications
//!
//! Notification requests are validated, fanned out to one delayed delivery job
//! per registered device token, and sent when each job comes due.
//!
//! - [`NotificationDispatcher`] consumes requests and enqueues jobs
//! - [`DeliveryWorker`] sends due jobs through a [`PushTransport`]
//! - [`NotificationService`] registers and revokes device tokens

pub mod delivery_worker;
pub mod dispatcher;
pub mod push_transport;
pub mod schedule;
pub mod service;
pub mod token_directory;

pub use delivery_worker::{DeliveryOutcome, DeliveryStatsSnapshot, DeliveryWorker};
pub use dispatcher::{DispatchOutcome, DispatcherStatsSnapshot, NotificationDispatcher};
pub use push_transport::{
    fcm_request_body, FcmPushTransport, PushError, PushMessage, PushTransport, ServiceAccountKey,
};
pub use schedule::{DeliverySchedule, ScheduledDelay};
pub use service::{NotificationService, RevokedToken};
pub use token_directory::{DeviceTokenSet, DirectoryError, MongoTokenDirectory, TokenDirectory};
