use image::{Rgb, RgbImage};

use crate::error::{DetectError, Result};

/// Pixel element type of a caller-supplied buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PixelType {
    #[default]
    U8,
    /// Little-endian `f32`, already normalized to `[0, 1]`.
    F32,
}

impl PixelType {
    pub const fn element_size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F32 => 4,
        }
    }
}

/// A raw frame: geometry plus a contiguous, row-major, interleaved buffer.
///
/// Always holds 8-bit samples; `F32` input is converted on construction so the
/// rest of the pipeline has one numeric path.
#[derive(Clone)]
pub struct Image {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Image {
    /// Builds an image from a caller buffer.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the channel count is not 1, 3 or 4, a dimension is
    /// zero, or `bytes.len() != width * height * channels * element_size`.
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: u8,
        pixel_type: PixelType,
        bytes: &[u8],
    ) -> Result<Self> {
        if !matches!(channels, 1 | 3 | 4) {
            return Err(DetectError::invalid(format!(
                "channel count must be 1, 3 or 4, got {channels}"
            )));
        }
        if width == 0 || height == 0 {
            return Err(DetectError::invalid(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }

        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(channels as usize))
            .and_then(|n| n.checked_mul(pixel_type.element_size()))
            .ok_or_else(|| DetectError::invalid("image buffer size overflows"))?;
        if bytes.len() != expected {
            return Err(DetectError::invalid(format!(
                "buffer holds {} bytes, expected {expected} for {width}x{height}x{channels} {pixel_type:?}",
                bytes.len()
            )));
        }

        let data = match pixel_type {
            PixelType::U8 => bytes.to_vec(),
            PixelType::F32 => bytes
                .chunks_exact(4)
                .map(|c| f32_to_u8(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
        };

        Ok(Self {
            width,
            height,
            channels,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Expands to 3-channel RGB. Gray is replicated, alpha dropped; with
    /// `swap_rb` the first and third channels are exchanged (BGR(A) input).
    pub fn to_rgb8(&self, swap_rb: bool) -> RgbImage {
        let c = self.channels as usize;
        let mut out = RgbImage::new(self.width, self.height);
        for (dst, px) in out.pixels_mut().zip(self.data.chunks_exact(c)) {
            *dst = match c {
                1 => Rgb([px[0], px[0], px[0]]),
                _ if swap_rb => Rgb([px[2], px[1], px[0]]),
                _ => Rgb([px[0], px[1], px[2]]),
            };
        }
        out
    }
}

fn f32_to_u8(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v * 255.0).round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unsupported_channel_counts() {
        for channels in [0u8, 2, 5] {
            let bytes = vec![0u8; 4 * 4 * channels as usize];
            let err = Image::from_raw(4, 4, channels, PixelType::U8, &bytes).unwrap_err();
            assert!(matches!(err, DetectError::InvalidArgument(_)));
        }
    }

    #[test]
    fn rejects_buffer_size_mismatch() {
        let err = Image::from_raw(4, 4, 3, PixelType::U8, &[0u8; 47]).unwrap_err();
        assert!(err.to_string().contains("expected 48"));

        // f32 buffers count four bytes per element
        assert!(Image::from_raw(2, 2, 1, PixelType::F32, &[0u8; 4]).is_err());
        assert!(Image::from_raw(2, 2, 1, PixelType::F32, &[0u8; 16]).is_ok());
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(Image::from_raw(0, 4, 1, PixelType::U8, &[]).is_err());
    }

    #[test]
    fn float_input_is_quantized() {
        let bytes: Vec<u8> = [0.0f32, 0.5, 1.0, 2.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let img = Image::from_raw(2, 2, 1, PixelType::F32, &bytes).unwrap();
        assert_eq!(img.as_bytes(), &[0, 128, 255, 255]);
    }

    #[test]
    fn rgb_expansion_handles_each_channel_count() {
        let gray = Image::from_raw(1, 1, 1, PixelType::U8, &[7]).unwrap();
        assert_eq!(gray.to_rgb8(true).get_pixel(0, 0), &Rgb([7, 7, 7]));

        let bgr = Image::from_raw(1, 1, 3, PixelType::U8, &[1, 2, 3]).unwrap();
        assert_eq!(bgr.to_rgb8(true).get_pixel(0, 0), &Rgb([3, 2, 1]));
        assert_eq!(bgr.to_rgb8(false).get_pixel(0, 0), &Rgb([1, 2, 3]));

        let bgra = Image::from_raw(1, 1, 4, PixelType::U8, &[1, 2, 3, 255]).unwrap();
        assert_eq!(bgra.to_rgb8(true).get_pixel(0, 0), &Rgb([3, 2, 1]));
    }
}
