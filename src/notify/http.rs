use super::{ClipMetadata, NotificationSink};
use crate::config::NotifyConfig;
use crate::error::NotifyError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Sink that POSTs clips to an HTTP relay as multipart form data.
///
/// The form carries the clip file plus `user_id` and `timestamp` text
/// fields; the relay forwards it to the actual messaging backend. Non-2xx
/// responses and transport failures both surface as send errors for the
/// dispatcher to retry.
pub struct HttpNotificationSink {
    url: String,
    client: reqwest::Client,
}

impl HttpNotificationSink {
    pub fn new(config: &NotifyConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| NotifyError::send(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url: config.url.clone(),
            client,
        })
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn send(&self, file: &Path, metadata: &ClipMetadata) -> Result<(), NotifyError> {
        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "clip".to_string());

        let bytes = tokio::fs::read(file)
            .await
            .map_err(|e| NotifyError::send(format!("cannot read clip {}: {}", file.display(), e)))?;

        debug!(
            "Uploading clip {} ({} bytes) to {}",
            file_name,
            bytes.len(),
            self.url
        );

        let form = Form::new()
            .text("user_id", metadata.user_id.clone())
            .text("timestamp", metadata.timestamp.to_string())
            .part("file", Part::bytes(bytes).file_name(file_name));

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| NotifyError::send(format!("upload to {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}
