mod classify;
mod descriptor;

pub use classify::{TransportErrorKind, classify_http_failure, classify_transport_failure};
pub use descriptor::{ParamBounds, ProviderDescriptor, RateLimits};

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use switchyard_common::RequestId;
use tokio_util::sync::CancellationToken;

use crate::credential::CredentialHandle;
use crate::errors::ProviderError;
use crate::request::CanonicalRequest;
use crate::response::{ProviderReply, ResponseChunk};

/// Lazy, finite chunk sequence. Dropping it cancels the upstream call.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ResponseChunk, ProviderError>> + Send>>;

/// Per-attempt context handed to adapters.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: RequestId,
    pub attempt_no: u32,
    pub provider: String,
    /// Model id of the candidate, which may differ from the request's model.
    pub model: String,
    pub cancel: CancellationToken,
}

/// One implementation per upstream. Adapters own all wire translation and
/// network I/O, and must report failures through `ProviderError` only.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn execute(
        &self,
        request: &CanonicalRequest,
        credential: &CredentialHandle,
        ctx: &CallContext,
    ) -> Result<ProviderReply, ProviderError>;

    async fn execute_stream(
        &self,
        request: &CanonicalRequest,
        credential: &CredentialHandle,
        ctx: &CallContext,
    ) -> Result<ChunkStream, ProviderError> {
        let _ = (credential, ctx);
        Err(ProviderError::unsupported(format!(
            "{} (stream)",
            request.operation
        )))
    }
}
