//! Workspace persistence: definition snapshots and rotating event logs.

pub mod event_log;
pub mod store;

pub use event_log::{read_log, replay, EventLog, EventRecord, LOG_INIT};
pub use store::{OwnedRecord, WorkdirScope, Workspace};
