pub mod app;
pub mod classify;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod notify;
pub mod pipeline;
pub mod recorder;
pub mod retention;
pub mod source;

pub use app::{ComponentState, SentrycamOrchestrator, ShutdownReason};
pub use classify::{ActivityClassifier, ActivitySignal, FrameDeltaClassifier};
pub use config::{RecordingMode, SentrycamConfig};
pub use error::{Result, SentrycamError};
pub use events::{EventBus, EventFilter, EventReceiver, SentrycamEvent};
pub use frame::{Frame, PixelFormat};
pub use notify::{DispatchHandle, HttpNotificationSink, NotificationDispatcher, NotificationSink};
pub use pipeline::IngestionPipeline;
pub use recorder::{
    CloseReason, ClosedSegment, RecordingController, SegmentLedger, SegmentWriter,
};
pub use retention::{RetentionSweeper, SweepOutcome};
pub use source::{FrameSource, MjpegHttpSource, ReconnectSupervisor};
