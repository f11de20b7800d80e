//! Grayscale frame buffer and the shared frame slot

use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Frame construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("buffer length {len} does not match {width}x{height} ({channels} channel)")]
    DimensionMismatch {
        width: usize,
        height: usize,
        channels: usize,
        len: usize,
    },
}

/// An immutable grayscale pixel buffer.
///
/// Frames are produced by the camera task and only ever read by the focus
/// core. Row-major, one byte per pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Frame {
    /// Build a frame from an existing luma buffer.
    pub fn from_luma(width: usize, height: usize, data: Vec<u8>) -> Result<Self, FrameError> {
        if data.len() != width * height {
            return Err(FrameError::DimensionMismatch {
                width,
                height,
                channels: 1,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Build a frame from interleaved RGB data using Rec.601 luma weights.
    pub fn from_rgb8(width: usize, height: usize, rgb: &[u8]) -> Result<Self, FrameError> {
        if rgb.len() != width * height * 3 {
            return Err(FrameError::DimensionMismatch {
                width,
                height,
                channels: 3,
                len: rgb.len(),
            });
        }
        let data = rgb
            .chunks_exact(3)
            .map(|px| {
                let y = 0.299 * px[0] as f64 + 0.587 * px[1] as f64 + 0.114 * px[2] as f64;
                y.round().min(255.0) as u8
            })
            .collect();
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Convert any decoded image to a grayscale frame.
    pub fn from_image(image: &image::DynamicImage) -> Self {
        let luma = image.to_luma8();
        Self {
            width: luma.width() as usize,
            height: luma.height() as usize,
            data: luma.into_raw(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// Extract a region of interest, clamped to the frame bounds.
    ///
    /// The focus region is a user-drawn box or the union of detection boxes;
    /// either way it arrives here as a plain rectangle.
    pub fn crop(&self, x: usize, y: usize, w: usize, h: usize) -> Frame {
        let x0 = x.min(self.width);
        let y0 = y.min(self.height);
        let x1 = (x0 + w).min(self.width);
        let y1 = (y0 + h).min(self.height);

        let out_w = x1 - x0;
        let out_h = y1 - y0;
        let mut data = Vec::with_capacity(out_w * out_h);
        for row in y0..y1 {
            let start = row * self.width + x0;
            data.extend_from_slice(&self.data[start..start + out_w]);
        }
        Frame {
            width: out_w,
            height: out_h,
            data,
        }
    }
}

/// Cloneable single-slot handle to the newest frame.
///
/// The producer replaces the slot contents; consumers clone the `Arc` out.
/// The lock is held only for the pointer swap, never while scoring or doing
/// network I/O.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the slot contents with a freshly captured frame.
    pub fn publish(&self, frame: Frame) {
        *self.inner.lock().unwrap() = Some(Arc::new(frame));
    }

    /// Get the newest published frame, if any.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.inner.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_luma_checks_length() {
        assert!(Frame::from_luma(4, 4, vec![0; 16]).is_ok());
        let err = Frame::from_luma(4, 4, vec![0; 15]).unwrap_err();
        assert_eq!(
            err,
            FrameError::DimensionMismatch {
                width: 4,
                height: 4,
                channels: 1,
                len: 15
            }
        );
    }

    #[test]
    fn rgb_conversion_weights() {
        // pure green pixel
        let frame = Frame::from_rgb8(1, 1, &[0, 255, 0]).unwrap();
        assert_eq!(frame.pixel(0, 0), 150); // 0.587 * 255 rounded
    }

    #[test]
    fn crop_clamps_to_bounds() {
        let data: Vec<u8> = (0..16).collect();
        let frame = Frame::from_luma(4, 4, data).unwrap();

        let roi = frame.crop(2, 2, 10, 10);
        assert_eq!(roi.width(), 2);
        assert_eq!(roi.height(), 2);
        assert_eq!(roi.data(), &[10, 11, 14, 15]);

        let empty = frame.crop(8, 8, 2, 2);
        assert_eq!(empty.width(), 0);
        assert_eq!(empty.height(), 0);
    }

    #[test]
    fn slot_returns_newest_frame() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(Frame::from_luma(2, 1, vec![1, 2]).unwrap());
        slot.publish(Frame::from_luma(2, 1, vec![3, 4]).unwrap());

        let latest = slot.latest().unwrap();
        assert_eq!(latest.data(), &[3, 4]);

        // a held reference survives replacement
        slot.publish(Frame::from_luma(2, 1, vec![5, 6]).unwrap());
        assert_eq!(latest.data(), &[3, 4]);
    }
}
