//! The transport port: the HTTP client (or a test double) implements this.

use async_trait::async_trait;
use qn_core::QnResult;

use crate::wire::{SyncRequest, SyncResponse};

#[async_trait(?Send)]
pub trait SyncApi {
    /// One server round trip. Transport failures surface as
    /// `SyncNetworkError`; an invalidated session as `SyncInvalidSession`.
    async fn sync(&mut self, request: SyncRequest) -> QnResult<SyncResponse>;
}
