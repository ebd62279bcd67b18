//! Application lifecycle stages and client-observable events.
//!
//! Stages are delivered to every service in declared construction order and
//! awaited before the next stage. Storage persistence becomes legal only at
//! `Launched`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ApplicationStage {
    PreparingForLaunch,
    StorageDecrypted,
    Launched,
    LoadingDatabase,
    LoadedDatabase,
}

/// Events fanned out to application observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    SignedIn,
    SignedOut,
    /// A sync pass that uploaded nothing and fully drained the server.
    DownloadFirstSyncCompleted,
    FullSyncCompleted,
    FailedSync,
    /// A sync exceeded the soft latency threshold but was not aborted.
    HighLatencySync,
    EnterOutOfSync,
    ExitOutOfSync,
    /// Root key, wrapper, or items-key material changed.
    KeyStatusChanged,
    LocalDataIncrementalLoad,
    LocalDataLoaded,
}
