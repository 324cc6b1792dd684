use super::segment::ClosedSegment;
use super::writer::SegmentWriter;
use crate::classify::ActivitySignal;
use crate::config::{RecordingConfig, RecordingMode};
use crate::error::Result;
use crate::events::{EventBus, SentrycamEvent};
use crate::frame::Frame;
use crate::notify::DispatchHandle;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

/// Why a segment was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The hysteresis window elapsed without fresh activity
    QuietPeriod,
    /// Continuous mode rotated to the next fixed-length segment
    Rotation,
    /// The optional hard cap on segment length expired
    MaxDuration,
    /// A storage failure cut the segment short
    WriteError,
    /// The frame source disconnected mid-segment
    SourceLost,
    /// The system is shutting down
    Shutdown,
}

impl CloseReason {
    fn as_str(&self) -> &'static str {
        match self {
            CloseReason::QuietPeriod => "quiet period",
            CloseReason::Rotation => "rotation",
            CloseReason::MaxDuration => "max duration",
            CloseReason::WriteError => "write error",
            CloseReason::SourceLost => "source lost",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

enum ControllerState {
    Idle,
    Recording {
        /// When the hysteresis window (or rotation timer) expires
        deadline: Instant,
        /// When the current stretch of recording began, for the max cap
        opened_at: Instant,
    },
}

/// The recording state machine.
///
/// In activity mode, a triggering signal opens a segment and every further
/// trigger pushes the close deadline out by `min_record_seconds`; quiet
/// frames are still written until the deadline passes, so brief detection
/// gaps never fragment a clip. In continuous mode the deadline is a fixed
/// rotation timer and the signal is ignored.
///
/// Every close hands the finished segment to exactly one downstream: the
/// dispatcher in activity mode, nobody in continuous mode (rotated files
/// simply age out under retention).
pub struct RecordingController {
    mode: RecordingMode,
    activity_threshold: f64,
    min_record: Duration,
    segment_duration: Duration,
    max_segment: Option<Duration>,
    writer: SegmentWriter,
    dispatcher: Option<DispatchHandle>,
    event_bus: Arc<EventBus>,
    state: ControllerState,
}

impl RecordingController {
    pub fn new(
        config: &RecordingConfig,
        writer: SegmentWriter,
        dispatcher: Option<DispatchHandle>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            mode: config.mode,
            activity_threshold: config.activity_threshold,
            min_record: config.min_record_duration(),
            segment_duration: config.segment_duration(),
            max_segment: config.max_segment_duration(),
            writer,
            dispatcher,
            event_bus,
            state: ControllerState::Idle,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, ControllerState::Recording { .. })
    }

    /// Step the state machine with one frame.
    ///
    /// `now` is passed explicitly so transitions are exact and testable;
    /// the pipeline passes `Instant::now()`.
    pub async fn process_frame(
        &mut self,
        frame: &Frame,
        signal: Option<&ActivitySignal>,
        now: Instant,
    ) -> Result<()> {
        match self.mode {
            RecordingMode::Activity => self.step_activity(frame, signal, now).await,
            RecordingMode::Continuous => self.step_continuous(frame, now).await,
        }
    }

    async fn step_activity(
        &mut self,
        frame: &Frame,
        signal: Option<&ActivitySignal>,
        now: Instant,
    ) -> Result<()> {
        let active = signal.map(|s| s.score >= self.activity_threshold).unwrap_or(false);

        match self.state {
            ControllerState::Idle => {
                if !active {
                    return Ok(());
                }

                self.open_segment().await?;
                self.state = ControllerState::Recording {
                    deadline: now + self.min_record,
                    opened_at: now,
                };
                self.write_frame(frame).await;
                Ok(())
            }
            ControllerState::Recording { mut deadline, opened_at } => {
                if active {
                    // Hysteresis: fresh activity keeps the clip alive
                    deadline = now + self.min_record;
                    self.state = ControllerState::Recording { deadline, opened_at };
                }

                if let Some(cap) = self.max_segment {
                    if now.duration_since(opened_at) >= cap {
                        self.close_and_forward(CloseReason::MaxDuration).await;
                        if active {
                            // The signal is still live: the same frame
                            // opens a fresh segment and is written only
                            // there.
                            self.open_segment().await?;
                            self.state = ControllerState::Recording {
                                deadline: now + self.min_record,
                                opened_at: now,
                            };
                            self.write_frame(frame).await;
                        } else {
                            self.state = ControllerState::Idle;
                        }
                        return Ok(());
                    }
                }

                if now >= deadline {
                    self.close_and_forward(CloseReason::QuietPeriod).await;
                    self.state = ControllerState::Idle;
                    return Ok(());
                }

                // A write failure closed the file early; the hysteresis
                // window is still live, so reopen before writing.
                if !self.writer.is_open() {
                    self.open_segment().await?;
                }
                self.write_frame(frame).await;
                Ok(())
            }
        }
    }

    async fn step_continuous(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        match self.state {
            ControllerState::Idle => {
                self.open_segment().await?;
                self.state = ControllerState::Recording {
                    deadline: now + self.segment_duration,
                    opened_at: now,
                };
                self.write_frame(frame).await;
                Ok(())
            }
            ControllerState::Recording { deadline, .. } => {
                if now >= deadline {
                    self.close_and_forward(CloseReason::Rotation).await;
                    self.open_segment().await?;
                    self.state = ControllerState::Recording {
                        deadline: now + self.segment_duration,
                        opened_at: now,
                    };
                }

                if !self.writer.is_open() {
                    self.open_segment().await?;
                }
                self.write_frame(frame).await;
                Ok(())
            }
        }
    }

    /// Close any open segment and return to idle.
    ///
    /// Used by the pipeline on disconnect and shutdown; the truncated clip
    /// still goes to its normal downstream.
    pub async fn finalize(&mut self, reason: CloseReason) {
        if self.writer.is_open() {
            self.close_and_forward(reason).await;
        }
        self.state = ControllerState::Idle;
    }

    async fn open_segment(&mut self) -> Result<()> {
        let segment = self.writer.open().await?;
        let event = SentrycamEvent::SegmentOpened {
            segment_id: segment.id.to_string(),
            path: segment.path.display().to_string(),
            timestamp: SystemTime::now(),
        };
        if let Err(e) = self.event_bus.publish(event).await {
            debug!("No subscribers for segment event: {}", e);
        }
        Ok(())
    }

    /// Write one frame, short-circuiting the segment on storage failure.
    ///
    /// A failed write closes the segment immediately; the pipeline keeps
    /// running and the next frame starts a fresh one.
    async fn write_frame(&mut self, frame: &Frame) {
        if let Err(e) = self.writer.write(frame).await {
            error!("Frame write failed, cutting segment short: {}", e);
            self.close_and_forward(CloseReason::WriteError).await;
        }
    }

    async fn close_and_forward(&mut self, reason: CloseReason) {
        let closed = match self.writer.close().await {
            Ok(Some(closed)) => closed,
            Ok(None) => return,
            Err(e) => {
                error!("Segment close failed: {}", e);
                return;
            }
        };

        info!(
            "Segment {} closed after {} frames ({})",
            closed.segment.id,
            closed.frames,
            reason.as_str()
        );

        let event = SentrycamEvent::SegmentClosed {
            segment_id: closed.segment.id.to_string(),
            path: closed.segment.path.display().to_string(),
            frames: closed.frames,
            reason: reason.as_str().to_string(),
            timestamp: SystemTime::now(),
        };
        if let Err(e) = self.event_bus.publish(event).await {
            debug!("No subscribers for segment event: {}", e);
        }

        self.forward(&closed, reason);
    }

    /// Hand a closed segment to its single downstream
    fn forward(&self, closed: &ClosedSegment, reason: CloseReason) {
        // Rotated continuous segments are left for the retention sweeper
        if reason == CloseReason::Rotation {
            return;
        }

        match &self.dispatcher {
            Some(dispatcher) => {
                if closed.frames == 0 {
                    debug!(
                        "Skipping dispatch of empty segment {}",
                        closed.segment.id
                    );
                    return;
                }
                dispatcher.enqueue(closed);
            }
            None => {
                if self.mode == RecordingMode::Activity {
                    warn!(
                        "No dispatcher configured, clip {} retained locally",
                        closed.segment.path.display()
                    );
                }
            }
        }
    }
}
