use super::{ActivityClassifier, ActivitySignal, Region};
use crate::config::ClassifierConfig;
use crate::error::ClassifierError;
use crate::frame::{Frame, PixelFormat};

use image::{imageops, GrayImage, Luma};
use imageproc::{
    contrast::threshold,
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::{dilate, erode},
    region_labelling::{connected_components, Connectivity},
};
use std::collections::HashMap;
use tracing::{debug, info};

/// Background-difference activity classifier.
///
/// Each frame is decoded, downscaled, blurred and differenced against a
/// running-average background model; the score is the area of the largest
/// changed region, scaled back to native resolution. The first frame seeds
/// the background and always reports a quiet signal.
pub struct FrameDeltaClassifier {
    config: ClassifierConfig,
    background_model: Option<GrayImage>,
    frame_count: u64,
}

impl FrameDeltaClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        info!(
            "Initializing frame-delta classifier (delta threshold: {}, decode scale: 1/{})",
            config.delta_threshold, config.decode_scale
        );

        Self {
            config,
            background_model: None,
            frame_count: 0,
        }
    }

    /// Decode and downscale a frame into the analysis-resolution grayscale
    fn frame_to_gray(&self, frame: &Frame) -> Result<GrayImage, ClassifierError> {
        let gray = match frame.format {
            PixelFormat::Mjpeg => {
                let dynamic = image::load_from_memory(&frame.data).map_err(|e| {
                    ClassifierError::frame_processing(format!("JPEG decode failed: {}", e))
                })?;
                dynamic.to_luma8()
            }
            PixelFormat::Rgb24 => self.rgb24_to_gray(frame)?,
            PixelFormat::Yuyv => self.yuyv_to_gray(frame)?,
        };

        let scale = self.config.decode_scale.max(1);
        if scale == 1 {
            return Ok(gray);
        }

        let target_width = (gray.width() / scale).max(1);
        let target_height = (gray.height() / scale).max(1);
        Ok(imageops::resize(
            &gray,
            target_width,
            target_height,
            imageops::FilterType::Triangle,
        ))
    }

    fn rgb24_to_gray(&self, frame: &Frame) -> Result<GrayImage, ClassifierError> {
        if !frame.validate_size() {
            return Err(ClassifierError::frame_processing(format!(
                "RGB24 frame size mismatch: {} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let mut gray = GrayImage::new(frame.width, frame.height);
        for (i, pixel) in frame.data.chunks_exact(3).enumerate() {
            let x = (i as u32) % frame.width;
            let y = (i as u32) / frame.width;
            // ITU-R BT.601 luma weights
            let luma =
                (0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32) as u8;
            gray.put_pixel(x, y, Luma([luma]));
        }
        Ok(gray)
    }

    fn yuyv_to_gray(&self, frame: &Frame) -> Result<GrayImage, ClassifierError> {
        if !frame.validate_size() {
            return Err(ClassifierError::frame_processing(format!(
                "YUYV frame size mismatch: {} bytes for {}x{}",
                frame.data.len(),
                frame.width,
                frame.height
            )));
        }

        let mut gray = GrayImage::new(frame.width, frame.height);
        // Y components sit at even byte offsets
        for (i, pair) in frame.data.chunks_exact(2).enumerate() {
            let x = (i as u32) % frame.width;
            let y = (i as u32) / frame.width;
            gray.put_pixel(x, y, Luma([pair[0]]));
        }
        Ok(gray)
    }

    /// Blend the current frame into the running-average background
    fn update_background_model(&mut self, current: &GrayImage) {
        if let Some(background) = &mut self.background_model {
            if background.dimensions() != current.dimensions() {
                *background = current.clone();
                return;
            }

            // alpha = 0.05 keeps slow lighting drift out of the signal
            for (bg_pixel, cur_pixel) in background.pixels_mut().zip(current.pixels()) {
                let blended =
                    (bg_pixel.0[0] as f32 * 0.95 + cur_pixel.0[0] as f32 * 0.05).round() as u8;
                bg_pixel.0[0] = blended;
            }
        }
    }

    fn frame_difference(background: &GrayImage, current: &GrayImage) -> GrayImage {
        let (width, height) = background.dimensions();
        let mut diff = GrayImage::new(width, height);

        for ((diff_pixel, bg_pixel), cur_pixel) in diff
            .pixels_mut()
            .zip(background.pixels())
            .zip(current.pixels())
        {
            diff_pixel.0[0] = bg_pixel.0[0].abs_diff(cur_pixel.0[0]);
        }

        diff
    }

    /// Measure connected components in the binary mask, returning the
    /// largest area and the bounding box of every component.
    fn component_regions(mask: &GrayImage) -> (f64, Vec<Region>) {
        let components = connected_components(mask, Connectivity::Eight, Luma([0u8]));

        let mut bounds: HashMap<u32, (u32, u32, u32, u32, u64)> = HashMap::new();
        for (x, y, label) in components.enumerate_pixels().map(|(x, y, p)| (x, y, p.0[0])) {
            if label == 0 {
                continue;
            }
            let entry = bounds.entry(label).or_insert((x, x, y, y, 0));
            entry.0 = entry.0.min(x);
            entry.1 = entry.1.max(x);
            entry.2 = entry.2.min(y);
            entry.3 = entry.3.max(y);
            entry.4 += 1;
        }

        let mut max_area = 0u64;
        let mut regions = Vec::with_capacity(bounds.len());
        for (min_x, max_x, min_y, max_y, area) in bounds.into_values() {
            max_area = max_area.max(area);
            regions.push(Region {
                x: min_x,
                y: min_y,
                width: max_x - min_x + 1,
                height: max_y - min_y + 1,
            });
        }

        (max_area as f64, regions)
    }
}

impl ActivityClassifier for FrameDeltaClassifier {
    fn classify(&mut self, frame: &Frame) -> Result<ActivitySignal, ClassifierError> {
        let gray = self.frame_to_gray(frame)?;
        let blurred = gaussian_blur_f32(&gray, 2.0);

        let background = match &self.background_model {
            Some(background) if background.dimensions() == blurred.dimensions() => background,
            _ => {
                debug!("Seeding background model from frame {}", frame.id);
                self.background_model = Some(blurred);
                self.frame_count = 1;
                return Ok(ActivitySignal::quiet());
            }
        };

        let diff = Self::frame_difference(background, &blurred);
        let binary_mask = threshold(&diff, self.config.delta_threshold.min(255) as u8);

        // Open then close to drop speckle noise while keeping blobs intact
        let kernel_size = 3u8;
        let cleaned = dilate(
            &erode(&binary_mask, Norm::LInf, kernel_size),
            Norm::LInf,
            kernel_size,
        );

        let (max_area, mut regions) = Self::component_regions(&cleaned);

        self.update_background_model(&blurred);
        self.frame_count += 1;

        // Areas were measured at analysis resolution; report native pixels
        let scale = self.config.decode_scale.max(1) as f64;
        for region in &mut regions {
            region.x = (region.x as f64 * scale) as u32;
            region.y = (region.y as f64 * scale) as u32;
            region.width = (region.width as f64 * scale) as u32;
            region.height = (region.height as f64 * scale) as u32;
        }

        let score = max_area * scale * scale;
        if score > 0.0 {
            debug!(
                "Frame {} changed region area: {:.0} native pixels",
                frame.id, score
            );
        }

        Ok(ActivitySignal { score, regions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, Luma};
    use std::time::SystemTime;

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            delta_threshold: 25,
            decode_scale: 1,
        }
    }

    fn jpeg_frame(id: u64, painter: impl Fn(u32, u32) -> u8) -> Frame {
        let image: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_fn(64, 64, |x, y| Luma([painter(x, y)]));
        let mut data = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut data, 95);
        encoder
            .encode(image.as_raw(), 64, 64, image::ColorType::L8)
            .expect("JPEG encoding of test image");
        Frame::new(id, SystemTime::now(), data, 64, 64, PixelFormat::Mjpeg)
    }

    #[test]
    fn test_first_frame_seeds_background_quietly() {
        let mut classifier = FrameDeltaClassifier::new(config());
        let signal = classifier.classify(&jpeg_frame(1, |_, _| 0)).unwrap();
        assert_eq!(signal.score, 0.0);
        assert!(signal.regions.is_empty());
    }

    #[test]
    fn test_static_scene_stays_quiet() {
        let mut classifier = FrameDeltaClassifier::new(config());
        classifier.classify(&jpeg_frame(1, |_, _| 64)).unwrap();
        let signal = classifier.classify(&jpeg_frame(2, |_, _| 64)).unwrap();
        assert_eq!(signal.score, 0.0);
    }

    #[test]
    fn test_bright_intruder_raises_score() {
        let mut classifier = FrameDeltaClassifier::new(config());
        classifier.classify(&jpeg_frame(1, |_, _| 0)).unwrap();

        // A 24x24 bright block against the dark background
        let signal = classifier
            .classify(&jpeg_frame(2, |x, y| {
                if (20..44).contains(&x) && (20..44).contains(&y) {
                    255
                } else {
                    0
                }
            }))
            .unwrap();

        assert!(signal.score > 100.0, "score was {}", signal.score);
        assert!(!signal.regions.is_empty());
    }

    #[test]
    fn test_rejects_truncated_jpeg() {
        let mut classifier = FrameDeltaClassifier::new(config());
        let frame = Frame::new(
            1,
            SystemTime::now(),
            vec![0xFF, 0xD8, 0x00],
            64,
            64,
            PixelFormat::Mjpeg,
        );
        assert!(classifier.classify(&frame).is_err());
    }

    #[test]
    fn test_resolution_change_reseeds_background() {
        let mut classifier = FrameDeltaClassifier::new(config());
        classifier.classify(&jpeg_frame(1, |_, _| 0)).unwrap();

        // Raw grayscale-as-RGB24 frame at a different resolution
        let data = vec![200u8; 32 * 32 * 3];
        let frame = Frame::new(2, SystemTime::now(), data, 32, 32, PixelFormat::Rgb24);
        let signal = classifier.classify(&frame).unwrap();
        assert_eq!(signal.score, 0.0);
    }
}
