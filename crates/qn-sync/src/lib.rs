//! qn-sync: download-first reconciling sync over an untrusted server
//!
//! The controller collects the dirty set, posts server-format payloads,
//! merges retrieved copies with conflict duplication, alternates uuids on
//! collision, and watches the server's integrity hash. The HTTP transport
//! stays behind the `SyncApi` port.

pub mod api;
pub mod controller;
pub mod integrity;
pub mod response;
pub mod session;
pub mod wire;

pub use api::SyncApi;
pub use controller::{SyncController, SyncDeps, SyncMode, SyncOptions, SyncOutcome, SyncQueueStrategy};
pub use wire::{ConflictType, SyncConflict, SyncRequest, SyncResponse};
