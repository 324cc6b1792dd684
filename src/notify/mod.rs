mod dispatcher;
mod http;

pub use dispatcher::{DispatchHandle, NotificationDispatcher};
pub use http::HttpNotificationSink;

use crate::error::NotifyError;
use async_trait::async_trait;
use std::path::Path;

/// Metadata accompanying a clip upload
#[derive(Debug, Clone)]
pub struct ClipMetadata {
    /// Recipient identifier the relay forwards the clip to
    pub user_id: String,
    /// Send time as Unix seconds
    pub timestamp: u64,
}

/// Delivers a finished clip file to a notification backend.
///
/// Implementations are shared by the dispatcher worker and must be safe to
/// call concurrently; delivery failures are retried by the dispatcher, not
/// the sink.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, file: &Path, metadata: &ClipMetadata) -> Result<(), NotifyError>;
}
