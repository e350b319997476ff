//! Transport collaborator.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use trellis_core::{NormalizedPayload, RequestError};

use crate::RequestInput;

/// Performs the network side of a request and returns a normalized payload.
///
/// `cancel` fires when every caller waiting on this fetch has aborted.
/// Implementations should stop work promptly; a result produced after
/// cancellation is discarded. Timeouts are the implementation's concern.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn fetch(
        &self,
        request: &RequestInput,
        cancel: CancellationToken,
    ) -> Result<NormalizedPayload, RequestError>;
}
