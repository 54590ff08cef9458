//! Frame data structures for video stream content

use std::sync::Arc;

use image::RgbImage;
use thiserror::Error;

use crate::recognizer::BoundingBox;

/// Bytes per pixel for the RGB24 layout all frames use
pub const RGB_BYTES_PER_PIXEL: usize = 3;

/// Error raised when frame geometry does not match the supplied buffer
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame buffer too short: need {needed} bytes for {width}x{height} stride {stride}, got {actual}")]
    BufferTooShort {
        width: u32,
        height: u32,
        stride: u32,
        needed: usize,
        actual: usize,
    },
    #[error("frame stride {stride} shorter than row width {width} (RGB24)")]
    StrideTooSmall { width: u32, stride: u32 },
}

/// A single frame handed to the recognition pipeline
///
/// Pixel data is shared, not copied, across pipeline stages; cloning a frame
/// clones the handle only. The buffer is released once no pending recognition
/// and no track representative refers to it. A track that needs to retain an
/// observation past the frame's lifetime takes a private thumbnail instead.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    stride: u32,
    /// Monotonically increasing sequence number from the frame source
    pub sequence_number: u64,
    /// Presentation timestamp in seconds
    pub timestamp: f64,
}

impl VideoFrame {
    /// Wrap an RGB24 pixel buffer as a frame
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        stride: u32,
        sequence_number: u64,
        timestamp: f64,
    ) -> Result<Self, FrameError> {
        if (stride as usize) < width as usize * RGB_BYTES_PER_PIXEL {
            return Err(FrameError::StrideTooSmall { width, stride });
        }
        let needed = stride as usize * height as usize;
        if data.len() < needed {
            return Err(FrameError::BufferTooShort {
                width,
                height,
                stride,
                needed,
                actual: data.len(),
            });
        }
        Ok(Self {
            data: data.into(),
            width,
            height,
            stride,
            sequence_number,
            timestamp,
        })
    }

    /// Frame width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw RGB24 pixel data, including any row padding
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy the frame into a packed `RgbImage`, dropping row padding
    pub fn to_image(&self) -> RgbImage {
        let row_bytes = self.width as usize * RGB_BYTES_PER_PIXEL;
        let mut packed = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * self.stride as usize;
            packed.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        // Geometry was validated at construction, so this cannot fail
        RgbImage::from_raw(self.width, self.height, packed)
            .unwrap_or_else(|| RgbImage::new(self.width.max(1), self.height.max(1)))
    }

    /// Crop the given region and scale it to a thumbnail
    ///
    /// The region is clamped to the frame bounds; returns `None` when the
    /// clamped region is empty.
    pub fn thumbnail(&self, region: &BoundingBox, width: u32, height: u32) -> Option<RgbImage> {
        let x0 = region.left.max(0) as u32;
        let y0 = region.top.max(0) as u32;
        if x0 >= self.width || y0 >= self.height {
            return None;
        }
        let x1 = (region.left.saturating_add(region.width as i32)).max(0) as u32;
        let y1 = (region.top.saturating_add(region.height as i32)).max(0) as u32;
        let w = x1.min(self.width).saturating_sub(x0);
        let h = y1.min(self.height).saturating_sub(y0);
        if w == 0 || h == 0 {
            return None;
        }

        let full = self.to_image();
        let crop = image::imageops::crop_imm(&full, x0, y0, w, h).to_image();
        Some(image::imageops::resize(
            &crop,
            width.max(1),
            height.max(1),
            image::imageops::FilterType::Triangle,
        ))
    }
}
