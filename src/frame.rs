use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Pixel format enumeration for frames crossing the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// YUV 4:2:2 format - uncompressed YUV data
    Yuyv,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
}

impl PixelFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Mjpeg => 0, // Variable size, compressed
            PixelFormat::Yuyv => 2,  // 2 bytes per pixel
            PixelFormat::Rgb24 => 3, // 3 bytes per pixel
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, PixelFormat::Mjpeg)
    }
}

/// A single captured frame and its metadata.
///
/// Frames pass through the ingestion loop by reference and are not retained
/// past the call that consumes them; the data buffer is shared so a copy
/// into the segment sink stays cheap.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Unique frame identifier within one source connection
    pub id: u64,
    /// Timestamp when the frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Frame format
    pub format: PixelFormat,
}

impl Frame {
    /// Create a new frame instance
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Get the expected frame size for uncompressed formats
    pub fn expected_size(&self) -> Option<usize> {
        if self.format.is_compressed() {
            None
        } else {
            Some(self.width as usize * self.height as usize * self.format.bytes_per_pixel())
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.expected_size() {
            Some(expected) => self.data.len() == expected,
            None => true, // Compressed formats have variable size
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Check if frame is older than specified duration
    pub fn is_older_than(&self, duration: std::time::Duration) -> bool {
        SystemTime::now()
            .duration_since(self.timestamp)
            .map(|age| age > duration)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pixel_format_properties() {
        assert_eq!(PixelFormat::Mjpeg.bytes_per_pixel(), 0);
        assert_eq!(PixelFormat::Yuyv.bytes_per_pixel(), 2);
        assert_eq!(PixelFormat::Rgb24.bytes_per_pixel(), 3);

        assert!(PixelFormat::Mjpeg.is_compressed());
        assert!(!PixelFormat::Yuyv.is_compressed());
        assert!(!PixelFormat::Rgb24.is_compressed());
    }

    #[test]
    fn test_frame_creation() {
        let data = vec![0u8; 1920 * 1080 * 2]; // YUYV data
        let frame = Frame::new(1, SystemTime::now(), data, 1920, 1080, PixelFormat::Yuyv);

        assert_eq!(frame.id, 1);
        assert_eq!(frame.width, 1920);
        assert_eq!(frame.height, 1080);
        assert_eq!(frame.format, PixelFormat::Yuyv);
        assert!(frame.validate_size());
    }

    #[test]
    fn test_frame_size_validation() {
        // Valid YUYV frame
        let valid_data = vec![0u8; 640 * 480 * 2];
        let valid_frame = Frame::new(
            1,
            SystemTime::now(),
            valid_data,
            640,
            480,
            PixelFormat::Yuyv,
        );
        assert!(valid_frame.validate_size());

        // Invalid YUYV frame (wrong size)
        let invalid_data = vec![0u8; 100];
        let invalid_frame = Frame::new(
            2,
            SystemTime::now(),
            invalid_data,
            640,
            480,
            PixelFormat::Yuyv,
        );
        assert!(!invalid_frame.validate_size());

        // MJPEG frame (compressed, always valid)
        let mjpeg_data = vec![0u8; 5000];
        let mjpeg_frame = Frame::new(
            3,
            SystemTime::now(),
            mjpeg_data,
            640,
            480,
            PixelFormat::Mjpeg,
        );
        assert!(mjpeg_frame.validate_size());
    }

    #[tokio::test]
    async fn test_frame_age() {
        let past_time = SystemTime::now() - Duration::from_millis(100);
        let frame = Frame::new(1, past_time, vec![0u8; 100], 640, 480, PixelFormat::Mjpeg);

        // Frame should be older than 50ms
        assert!(frame.is_older_than(Duration::from_millis(50)));
        // Frame should not be older than 200ms
        assert!(!frame.is_older_than(Duration::from_millis(200)));
    }
}
