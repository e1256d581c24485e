// Test Helpers Module - In-Memory Doubles
//
// Stand-ins for every external seam (queue, relational store, token directory,
// push transport) so consumer behaviour can be exercised without services.
// Database- and Mongo-backed tests look for TEST_DATABASE_URL / TEST_MONGODB_URI
// and skip when they are unset.

pub mod in_memory_queue;
pub mod log_capture;
pub mod test_doubles;
pub mod test_utils;

pub use in_memory_queue::InMemoryQueue;
pub use log_capture::LogCapture;
pub use test_doubles::{InMemoryEventStore, InMemoryTokenDirectory, RecordingPushTransport};
pub use test_utils::{test_config, test_database_url, test_mongodb_uri};
