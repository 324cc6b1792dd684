use super::{FrameSource, ReadOutcome, SourceStream};
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::events::{EventBus, SentrycamEvent};
use crate::frame::Frame;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// What a supervised read produced
#[derive(Debug)]
pub enum SupervisedRead {
    /// The next frame from the connected stream
    Frame(Frame),
    /// The connection was lost; the caller should finalize any open
    /// segment before asking for the next frame, which will reconnect.
    Disconnected,
}

/// Supervises reads from a frame source.
///
/// Transient read failures are retried a bounded number of times with a
/// fixed delay; exhausting them, or a clean end of stream, tears the
/// connection down and reports `Disconnected` exactly once. The following
/// read reconnects, retrying `connect` indefinitely with the same delay --
/// a dead camera stalls the pipeline but never kills it.
pub struct ReconnectSupervisor {
    source: Arc<dyn FrameSource>,
    stream: Option<Box<dyn SourceStream>>,
    max_retries: u32,
    reconnect_delay: Duration,
    event_bus: Arc<EventBus>,
}

impl ReconnectSupervisor {
    pub fn new(
        source: Arc<dyn FrameSource>,
        config: &SourceConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            source,
            stream: None,
            max_retries: config.max_reconnect_retries,
            reconnect_delay: config.reconnect_delay(),
            event_bus,
        }
    }

    /// Whether a stream handle is currently held
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Read the next frame, transparently retrying and reconnecting.
    ///
    /// Cancel-safe: dropping the future mid-connect or mid-read leaves the
    /// supervisor disconnected or holding an untouched stream handle.
    pub async fn next(&mut self) -> SupervisedRead {
        loop {
            if self.stream.is_none() {
                self.connect_forever().await;
            }

            let stream = match self.stream.as_mut() {
                Some(stream) => stream,
                None => continue,
            };

            let mut attempts = 0u32;
            loop {
                match stream.read().await {
                    Ok(ReadOutcome::Frame(frame)) => {
                        return SupervisedRead::Frame(frame);
                    }
                    Ok(ReadOutcome::Eof) => {
                        // A clean end of stream means the camera closed the
                        // connection; go straight to a full reconnect.
                        warn!("Frame source stream ended: {}", self.source.describe());
                        self.mark_disconnected().await;
                        return SupervisedRead::Disconnected;
                    }
                    Err(e) => {
                        attempts += 1;
                        if attempts >= self.max_retries {
                            error!(
                                "Read failed {} consecutive time(s), reconnecting: {}",
                                attempts, e
                            );
                            self.mark_disconnected().await;
                            return SupervisedRead::Disconnected;
                        }

                        warn!(
                            "Transient read failure ({}/{}): {}",
                            attempts, self.max_retries, e
                        );
                        sleep(self.reconnect_delay).await;
                    }
                }
            }
        }
    }

    /// Retry `connect` until it succeeds; the source never gives up.
    async fn connect_forever(&mut self) {
        let mut attempt = 0u64;
        loop {
            attempt += 1;
            debug!(
                "Connecting to frame source (attempt {}): {}",
                attempt,
                self.source.describe()
            );

            match self.source.connect().await {
                Ok(stream) => {
                    self.stream = Some(stream);
                    info!(
                        "Frame source connected after {} attempt(s): {}",
                        attempt,
                        self.source.describe()
                    );
                    self.publish_status(true).await;
                    return;
                }
                Err(e) => {
                    warn!(
                        "Connect attempt {} failed, retrying in {:?}: {}",
                        attempt, self.reconnect_delay, e
                    );
                    sleep(self.reconnect_delay).await;
                }
            }
        }
    }

    async fn mark_disconnected(&mut self) {
        self.stream = None;
        self.publish_status(false).await;
    }

    async fn publish_status(&mut self, connected: bool) {
        if let Err(e) = self
            .event_bus
            .publish(SentrycamEvent::SourceStatusChanged {
                connected,
                timestamp: SystemTime::now(),
            })
            .await
        {
            debug!("No subscribers for source status event: {}", e);
        }
    }

    /// Drop the stream handle, releasing the connection
    pub fn release(&mut self) {
        self.stream = None;
    }
}
