use super::segment::{ClosedSegment, Segment, SegmentLedger};
use crate::config::RecordingConfig;
use crate::error::SegmentError;
use crate::frame::{Frame, PixelFormat};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

/// Attempts at deriving a collision-free filename before giving up
const FILENAME_ATTEMPTS: u32 = 10;

/// Encodes frames into a clip file.
///
/// Implementations own the container format; the writer above them owns
/// naming, the segment record, and close-exactly-once semantics. `close`
/// must be idempotent.
#[async_trait]
pub trait SegmentSink: Send {
    async fn open(&mut self, path: &Path) -> Result<(), SegmentError>;
    async fn write(&mut self, frame: &Frame) -> Result<(), SegmentError>;
    async fn close(&mut self) -> Result<(), SegmentError>;
}

/// Sink writing a raw MJPEG stream: JPEG frames concatenated into one file.
///
/// Appends are buffered and synced to disk once a second so a crash loses
/// at most the last second of footage.
pub struct MjpegClipSink {
    file: Option<BufWriter<File>>,
    last_sync: Instant,
}

impl MjpegClipSink {
    pub fn new() -> Self {
        Self {
            file: None,
            last_sync: Instant::now(),
        }
    }
}

impl Default for MjpegClipSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SegmentSink for MjpegClipSink {
    async fn open(&mut self, path: &Path) -> Result<(), SegmentError> {
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)
            .await
            .map_err(|e| SegmentError::Create {
                path: path.display().to_string(),
                source: e,
            })?;

        self.file = Some(BufWriter::new(file));
        self.last_sync = Instant::now();
        Ok(())
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), SegmentError> {
        if frame.format != PixelFormat::Mjpeg {
            return Err(SegmentError::UnsupportedFormat {
                details: format!("MJPEG sink cannot store {:?} frames", frame.format),
            });
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SegmentError::write("sink has no open file"))?;

        file.write_all(&frame.data)
            .await
            .map_err(|e| SegmentError::write(format!("append failed: {}", e)))?;

        if self.last_sync.elapsed() > Duration::from_secs(1) {
            file.flush()
                .await
                .map_err(|e| SegmentError::write(format!("flush failed: {}", e)))?;
            file.get_ref()
                .sync_data()
                .await
                .map_err(|e| SegmentError::write(format!("sync failed: {}", e)))?;
            self.last_sync = Instant::now();
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), SegmentError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| SegmentError::write(format!("final flush failed: {}", e)))?;
            file.get_ref()
                .sync_all()
                .await
                .map_err(|e| SegmentError::write(format!("final sync failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Owns the single open clip file of a controller instance.
///
/// `open` derives a timestamped filename, creates the file and registers
/// the segment; `write` appends; `close` finalizes exactly once and hands
/// back the closed segment. At most one segment is open at a time.
pub struct SegmentWriter {
    directory: PathBuf,
    prefix: String,
    extension: String,
    timezone: Tz,
    sink: Box<dyn SegmentSink>,
    ledger: SegmentLedger,
    current: Option<Segment>,
    frames_written: u64,
}

impl SegmentWriter {
    pub fn new(
        config: &RecordingConfig,
        sink: Box<dyn SegmentSink>,
        ledger: SegmentLedger,
    ) -> Result<Self, SegmentError> {
        let timezone: Tz = config
            .timezone
            .parse()
            .map_err(|_| SegmentError::write(format!("invalid timezone: {}", config.timezone)))?;

        Ok(Self {
            directory: PathBuf::from(&config.storage_directory),
            prefix: config.resolved_prefix().to_string(),
            extension: config.file_extension.clone(),
            timezone,
            sink,
            ledger,
            current: None,
            frames_written: 0,
        })
    }

    pub fn is_open(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_segment(&self) -> Option<&Segment> {
        self.current.as_ref()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Open a new segment with a collision-resistant timestamped filename.
    ///
    /// Fails when a segment is already open; the controller never holds
    /// two. On-disk collisions and retired ledger paths advance the
    /// filename timestamp one second at a time, bounded.
    pub async fn open(&mut self) -> Result<&Segment, SegmentError> {
        if self.current.is_some() {
            return Err(SegmentError::write("a segment is already open"));
        }

        let start_ts = SystemTime::now();
        let path = self.derive_path(start_ts)?;

        self.sink.open(&path).await?;

        let segment = Segment::open(path, start_ts);
        self.ledger.register_open(&segment);
        info!("Segment {} opened: {}", segment.id, segment.path.display());

        self.frames_written = 0;
        Ok(&*self.current.insert(segment))
    }

    fn derive_path(&self, start_ts: SystemTime) -> Result<PathBuf, SegmentError> {
        let mut stamp = DateTime::<Utc>::from(start_ts).with_timezone(&self.timezone);

        for _ in 0..FILENAME_ATTEMPTS {
            let name = format!(
                "{}_{}.{}",
                self.prefix,
                stamp.format("%Y-%m-%d_%H-%M-%S"),
                self.extension
            );
            let candidate = self.directory.join(name);

            if !candidate.exists() && !self.ledger.path_in_use(&candidate) {
                return Ok(candidate);
            }

            debug!(
                "Filename collision for {}, advancing timestamp",
                candidate.display()
            );
            stamp += ChronoDuration::seconds(1);
        }

        Err(SegmentError::FilenameExhausted {
            directory: self.directory.display().to_string(),
        })
    }

    /// Append a frame to the open segment
    pub async fn write(&mut self, frame: &Frame) -> Result<(), SegmentError> {
        if self.current.is_none() {
            return Err(SegmentError::write("no segment is open"));
        }

        self.sink.write(frame).await?;
        self.frames_written += 1;
        Ok(())
    }

    /// Finalize the open segment, if any.
    ///
    /// Idempotent: a second call observes nothing to close and returns
    /// `None`. The closed segment is marked in the ledger with its end
    /// timestamp.
    pub async fn close(&mut self) -> Result<Option<ClosedSegment>, SegmentError> {
        let segment = match self.current.take() {
            Some(segment) => segment,
            None => return Ok(None),
        };

        if let Err(e) = self.sink.close().await {
            // The file may be truncated but the segment still closes; a
            // half-written clip beats a stuck pipeline.
            warn!("Finalizing segment {} reported: {}", segment.id, e);
        }

        let end_ts = SystemTime::now();
        self.ledger.mark_closed(segment.id, end_ts);

        let mut closed = segment;
        closed.end_ts = Some(end_ts);
        closed.state = super::segment::SegmentState::Closed;

        Ok(Some(ClosedSegment {
            segment: closed,
            frames: self.frames_written,
        }))
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecordingMode;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> RecordingConfig {
        RecordingConfig {
            mode: RecordingMode::Activity,
            storage_directory: dir.path().display().to_string(),
            filename_prefix: String::new(),
            file_extension: "mjpeg".to_string(),
            min_record_seconds: 10,
            segment_duration_seconds: 60,
            max_segment_seconds: None,
            activity_threshold: 500.0,
            timezone: "UTC".to_string(),
        }
    }

    fn mjpeg_frame(id: u64, payload: &[u8]) -> Frame {
        Frame::new(
            id,
            SystemTime::now(),
            payload.to_vec(),
            64,
            64,
            PixelFormat::Mjpeg,
        )
    }

    fn writer(dir: &TempDir, ledger: SegmentLedger) -> SegmentWriter {
        SegmentWriter::new(&config(dir), Box::new(MjpegClipSink::new()), ledger)
            .expect("writer construction")
    }

    #[tokio::test]
    async fn test_open_write_close_produces_concatenated_file() {
        let dir = TempDir::new().unwrap();
        let ledger = SegmentLedger::new();
        let mut writer = writer(&dir, ledger.clone());

        let path = writer.open().await.unwrap().path.clone();
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("motion_"));

        writer.write(&mjpeg_frame(1, &[0xFF, 0xD8, 0x01, 0xFF, 0xD9])).await.unwrap();
        writer.write(&mjpeg_frame(2, &[0xFF, 0xD8, 0x02, 0xFF, 0xD9])).await.unwrap();

        let closed = writer.close().await.unwrap().expect("segment was open");
        assert_eq!(closed.frames, 2);
        assert!(closed.segment.end_ts.is_some());

        let contents = tokio::fs::read(&path).await.unwrap();
        assert_eq!(
            contents,
            vec![0xFF, 0xD8, 0x01, 0xFF, 0xD9, 0xFF, 0xD8, 0x02, 0xFF, 0xD9]
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir, SegmentLedger::new());

        writer.open().await.unwrap();
        writer
            .write(&mjpeg_frame(1, &[0xFF, 0xD8, 0xFF, 0xD9]))
            .await
            .unwrap();

        assert!(writer.close().await.unwrap().is_some());
        assert!(writer.close().await.unwrap().is_none());
        assert!(writer.close().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_open_while_open_fails() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir, SegmentLedger::new());

        writer.open().await.unwrap();
        assert!(writer.open().await.is_err());
    }

    #[tokio::test]
    async fn test_filename_collision_advances_timestamp() {
        let dir = TempDir::new().unwrap();
        let ledger = SegmentLedger::new();
        let mut first = writer(&dir, ledger.clone());

        let first_path = first.open().await.unwrap().path.clone();
        first.close().await.unwrap();

        // Same second, same prefix: the second writer must pick another name
        let mut second = writer(&dir, ledger.clone());
        let second_path = second.open().await.unwrap().path.clone();
        second.close().await.unwrap();

        assert_ne!(first_path, second_path);
    }

    #[tokio::test]
    async fn test_retired_path_is_never_reused() {
        let dir = TempDir::new().unwrap();
        let ledger = SegmentLedger::new();
        let mut writer = writer(&dir, ledger.clone());

        let path = writer.open().await.unwrap().path.clone();
        writer.close().await.unwrap();
        tokio::fs::remove_file(&path).await.unwrap();
        ledger.mark_deleted(&path);

        // The file is gone from disk but the ledger retired its path
        let reopened = writer.open().await.unwrap().path.clone();
        assert_ne!(reopened, path);
    }

    #[tokio::test]
    async fn test_rejects_non_mjpeg_frames() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir, SegmentLedger::new());
        writer.open().await.unwrap();

        let frame = Frame::new(
            1,
            SystemTime::now(),
            vec![0u8; 64 * 64 * 2],
            64,
            64,
            PixelFormat::Yuyv,
        );
        match writer.write(&frame).await {
            Err(SegmentError::UnsupportedFormat { .. }) => {}
            other => panic!("expected UnsupportedFormat, got {:?}", other.err()),
        }
    }

    #[tokio::test]
    async fn test_write_without_open_segment_fails() {
        let dir = TempDir::new().unwrap();
        let mut writer = writer(&dir, SegmentLedger::new());
        assert!(writer
            .write(&mjpeg_frame(1, &[0xFF, 0xD8, 0xFF, 0xD9]))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_ledger_tracks_open_count() {
        let dir = TempDir::new().unwrap();
        let ledger = SegmentLedger::new();
        let mut writer = writer(&dir, ledger.clone());

        assert_eq!(ledger.open_count(), 0);
        writer.open().await.unwrap();
        assert_eq!(ledger.open_count(), 1);
        writer.close().await.unwrap();
        assert_eq!(ledger.open_count(), 0);
    }
}
