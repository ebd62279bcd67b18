use thiserror::Error;

pub type QnResult<T> = Result<T, QnError>;

#[derive(Debug, Error)]
pub enum QnError {
    #[error("decryption failed for item {uuid}")]
    DecryptFailure { uuid: String },

    #[error("no key available to {operation}")]
    KeyMissing { operation: String },

    #[error("operation invalid in key mode {mode}")]
    InvalidKeyMode { mode: String },

    #[error("wrapping key does not match the stored root key")]
    WrappingKeyInvalid,

    #[error("protocol version {0} is not supported")]
    VersionUnsupported(String),

    #[error("payload version {0} is newer than this library supports")]
    VersionNewerThanLibrary(String),

    #[error("protocol version {0} is outdated and refused for new encryption")]
    VersionOutdated(String),

    #[error("server integrity hash disagrees with local state")]
    IntegrityMismatch,

    #[error("sync network error: {0}")]
    SyncNetworkError(String),

    #[error("sync session is no longer valid")]
    SyncInvalidSession,

    #[error("storage read error: {0}")]
    StorageReadError(String),

    #[error("storage write error: {0}")]
    StorageWriteError(String),

    #[error("backup import finished with {errored} undecryptable items")]
    BackupDecryptPartialFailure { errored: usize },

    #[error("challenge was canceled by the user")]
    ChallengeCanceled,

    #[error("keychain error: {0}")]
    Keychain(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
