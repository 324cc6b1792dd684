mod mjpeg;
mod supervisor;

pub use mjpeg::MjpegHttpSource;
pub use supervisor::{ReconnectSupervisor, SupervisedRead};

use crate::error::SourceError;
use crate::frame::Frame;
use async_trait::async_trait;

/// Result of one read from a connected stream
#[derive(Debug)]
pub enum ReadOutcome {
    /// The next decoded frame
    Frame(Frame),
    /// The stream ended cleanly
    Eof,
}

/// A provider of frame streams.
///
/// Implementations describe where frames come from (a network camera, a
/// file, a test script) and hand out connected stream handles. Connection
/// and read failures are surfaced separately so the supervisor can apply
/// the right retry policy to each.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Establish a connection and return a readable stream handle
    async fn connect(&self) -> Result<Box<dyn SourceStream>, SourceError>;

    /// Human-readable description of the source for logs
    fn describe(&self) -> String;
}

/// A live, connected stream of frames
#[async_trait]
pub trait SourceStream: Send {
    /// Read the next frame, or Eof when the stream ends cleanly
    async fn read(&mut self) -> Result<ReadOutcome, SourceError>;
}
