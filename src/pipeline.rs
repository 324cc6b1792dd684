use crate::classify::ActivityClassifier;
use crate::config::RecordingConfig;
use crate::events::{EventBus, SentrycamEvent};
use crate::frame::Frame;
use crate::recorder::{CloseReason, RecordingController};
use crate::source::{ReconnectSupervisor, SupervisedRead};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The ingestion loop: frames in, segments out.
///
/// Pulls frames through the reconnect supervisor, runs the classifier on
/// each one and steps the recording controller. A lost connection closes
/// any open segment before the supervisor is asked to reconnect, so a clip
/// never spans a gap in the stream. Classifier and storage failures are
/// logged and absorbed; only cancellation stops the loop.
pub struct IngestionPipeline {
    supervisor: ReconnectSupervisor,
    classifier: Option<Box<dyn ActivityClassifier>>,
    controller: RecordingController,
    activity_threshold: f64,
    event_bus: Arc<EventBus>,
}

impl IngestionPipeline {
    pub fn new(
        supervisor: ReconnectSupervisor,
        classifier: Option<Box<dyn ActivityClassifier>>,
        controller: RecordingController,
        config: &RecordingConfig,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            supervisor,
            classifier,
            controller,
            activity_threshold: config.activity_threshold,
            event_bus,
        }
    }

    /// Run until cancelled, closing any open segment on the way out.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("Ingestion pipeline started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Ingestion pipeline cancelled");
                    break;
                }
                read = self.supervisor.next() => match read {
                    SupervisedRead::Frame(frame) => self.handle_frame(frame).await,
                    SupervisedRead::Disconnected => {
                        // The clip must not bridge the outage
                        self.controller.finalize(CloseReason::SourceLost).await;
                    }
                }
            }
        }

        self.controller.finalize(CloseReason::Shutdown).await;
        self.supervisor.release();
        info!("Ingestion pipeline stopped");
    }

    async fn handle_frame(&mut self, frame: Frame) {
        let signal = match self.classifier.as_mut() {
            Some(classifier) => match classifier.classify(&frame) {
                Ok(signal) => {
                    if signal.score >= self.activity_threshold {
                        let event = SentrycamEvent::ActivityDetected {
                            score: signal.score,
                            timestamp: frame.timestamp,
                        };
                        if let Err(e) = self.event_bus.publish(event).await {
                            debug!("No subscribers for activity event: {}", e);
                        }
                    }
                    Some(signal)
                }
                Err(e) => {
                    // An undecodable frame counts as quiet
                    warn!("Classifier failed on frame {}: {}", frame.id, e);
                    None
                }
            },
            None => None,
        };

        if let Err(e) = self
            .controller
            .process_frame(&frame, signal.as_ref(), Instant::now())
            .await
        {
            error!("Recording step failed on frame {}: {}", frame.id, e);
            let event = SentrycamEvent::SystemError {
                component: "pipeline".to_string(),
                error: e.to_string(),
            };
            if let Err(e) = self.event_bus.publish(event).await {
                debug!("No subscribers for error event: {}", e);
            }
        }
    }
}
