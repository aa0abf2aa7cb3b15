use std::io::Cursor;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;

use crate::error::PipelineError;

/// One encoded still, alive for a single sample/analyze round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub jpeg_data: Vec<u8>,
}

impl Frame {
    /// Encode an RGB image at its natural resolution.
    pub fn encode(image: &RgbImage, quality: u8) -> Result<Self, PipelineError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(PipelineError::NoActiveFrame);
        }

        let mut jpeg_data = Vec::new();
        let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut jpeg_data), quality.clamp(1, 100));
        image
            .write_with_encoder(encoder)
            .map_err(|e| PipelineError::Encode(e.to_string()))?;

        Ok(Self {
            width,
            height,
            jpeg_data,
        })
    }

    /// `data:image/jpeg;base64,...` form the analysis service expects.
    pub fn to_data_url(&self) -> String {
        format!("data:image/jpeg;base64,{}", BASE64.encode(&self.jpeg_data))
    }
}

/// Produces an encoded frame from whatever video is live right now.
pub trait FrameSampler: Send + Sync {
    /// `NoActiveFrame` while video is still starting up, `DeviceUnavailable`
    /// once the device is gone.
    fn sample(&self) -> Result<Frame, PipelineError>;

    /// Stop the underlying device. Safe to call repeatedly.
    fn release(&self);
}
