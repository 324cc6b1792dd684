mod controller;
mod segment;
mod writer;


pub use controller::{CloseReason, RecordingController};
pub use segment::{
    ClosedSegment, JobState, Segment, SegmentLedger, SegmentState,
};
pub use writer::{MjpegClipSink, SegmentSink, SegmentWriter};
