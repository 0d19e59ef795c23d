//! heartbeat-daemon library: the directory-backed store the daemon runs on.
//!
//! Split out of the binary so integration tests can drive it directly.

pub mod file_store;

pub use file_store::{FileStore, FileStoreConnector};
