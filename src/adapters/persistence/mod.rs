//! Persistence Adapters - JSON File Storage
//!
//! Implements the Repository port with an in-memory record set that is
//! snapshotted atomically to `state.json` and audited to append-only
//! JSONL files. No database dependency — lightweight and crash-recoverable.

pub mod audit;
pub mod snapshot;
pub mod store;

pub use store::JsonStore;
