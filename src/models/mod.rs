pub mod donation;
pub mod store;
pub mod ticket_purchase;

pub use donation::DonationRecord;
pub use store::{EventStore, PgEventStore};
pub use ticket_purchase::PurchaseRecord;
