//! Aspect-preserving resize + pad into a square canvas, emitted as an NCHW
//! `f32` blob in `[0, 1]`.

use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use ndarray::Array4;
use tracing::{debug, instrument};

use crate::config::PipelineConfig;
use crate::error::{DetectError, Result};
use crate::frame::Image;
use crate::model::InputSize;

/// The normalized, channel-first network input: shape `[1, 3, H, W]`.
#[derive(Debug, Clone)]
pub struct Blob {
    pub tensor: Array4<f32>,
}

impl Blob {
    pub fn shape(&self) -> [usize; 4] {
        let s = self.tensor.shape();
        [s[0], s[1], s[2], s[3]]
    }
}

/// Geometry needed to map tensor-space boxes back to the source frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxParams {
    pub source_width: u32,
    pub source_height: u32,
    /// Side of the padded square canvas, `max(width, height)`.
    pub side: u32,
    /// Resize ratio applied before padding.
    pub ratio: f32,
    /// Leading pad on each axis; the trailing pad is `side - resized - pad`.
    pub pad_x: u32,
    pub pad_y: u32,
    pub input_width: u32,
    pub input_height: u32,
}

impl LetterboxParams {
    /// Trailing pad on the x axis.
    pub fn pad_right(&self) -> u32 {
        self.side - self.resized_width() - self.pad_x
    }

    pub fn pad_bottom(&self) -> u32 {
        self.side - self.resized_height() - self.pad_y
    }

    pub fn resized_width(&self) -> u32 {
        scaled(self.source_width, self.ratio).min(self.side)
    }

    pub fn resized_height(&self) -> u32 {
        scaled(self.source_height, self.ratio).min(self.side)
    }

    /// Maps a tensor-space `[x, y, w, h]` box to source-frame pixels.
    pub fn to_source(&self, bbox: [f32; 4]) -> [f32; 4] {
        let sx = self.input_width as f32 / self.side as f32;
        let sy = self.input_height as f32 / self.side as f32;
        let [x, y, w, h] = bbox;
        [
            (x / sx - self.pad_x as f32) / self.ratio,
            (y / sy - self.pad_y as f32) / self.ratio,
            w / sx / self.ratio,
            h / sy / self.ratio,
        ]
    }
}

fn scaled(len: u32, ratio: f32) -> u32 {
    ((len as f32) * ratio).round().max(1.0) as u32
}

/// Letterboxes `image` into a square canvas and normalizes it.
///
/// With `target == None` the tensor is `side x side`; otherwise the padded
/// canvas is bilinearly resized to the declared input size.
#[instrument(skip(image, config), fields(width = image.width(), height = image.height(), channels = image.channels()))]
pub fn letterbox(
    image: &Image,
    target: Option<InputSize>,
    config: &PipelineConfig,
) -> Result<(Blob, LetterboxParams)> {
    if image.pixel_count() > config.max_image_pixels {
        return Err(DetectError::invalid(format!(
            "image too large: {}x{} pixels (max {})",
            image.width(),
            image.height(),
            config.max_image_pixels
        )));
    }

    let (w, h) = (image.width(), image.height());
    let side = w.max(h);
    let ratio = (side as f32 / w as f32).min(side as f32 / h as f32);
    let new_w = scaled(w, ratio).min(side);
    let new_h = scaled(h, ratio).min(side);

    let rgb = image.to_rgb8(config.swap_rb);
    let resized = if (new_w, new_h) == (w, h) {
        rgb
    } else {
        imageops::resize(&rgb, new_w, new_h, FilterType::Triangle)
    };

    let pad_x = (side - new_w).div_ceil(2);
    let pad_y = (side - new_h).div_ceil(2);

    let mut canvas = if (new_w, new_h) == (side, side) {
        resized
    } else {
        let fill = config.pad_value;
        let mut canvas = RgbImage::from_pixel(side, side, Rgb([fill, fill, fill]));
        imageops::replace(&mut canvas, &resized, pad_x as i64, pad_y as i64);
        canvas
    };

    let (input_width, input_height) = match target {
        Some(size) => (size.width, size.height),
        None => (side, side),
    };
    if (input_width, input_height) != (side, side) {
        canvas = imageops::resize(&canvas, input_width, input_height, FilterType::Triangle);
    }

    let params = LetterboxParams {
        source_width: w,
        source_height: h,
        side,
        ratio,
        pad_x,
        pad_y,
        input_width,
        input_height,
    };
    debug!(side, pad_x, pad_y, input_width, input_height, "Letterbox computed");

    Ok((to_blob(&canvas), params))
}

/// HWC `u8` -> NCHW `f32 / 255`.
fn to_blob(canvas: &RgbImage) -> Blob {
    let (w, h) = (canvas.width() as usize, canvas.height() as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    let raw = canvas.as_raw();
    for y in 0..h {
        for x in 0..w {
            let src = (y * w + x) * 3;
            tensor[[0, 0, y, x]] = raw[src] as f32 / 255.0;
            tensor[[0, 1, y, x]] = raw[src + 1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = raw[src + 2] as f32 / 255.0;
        }
    }
    Blob { tensor }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelType;
    use proptest::prelude::*;

    fn solid(width: u32, height: u32, channels: u8, value: u8) -> Image {
        let len = (width * height * channels as u32) as usize;
        Image::from_raw(width, height, channels, PixelType::U8, &vec![value; len]).unwrap()
    }

    #[test]
    fn square_image_has_no_padding() {
        let (blob, params) = letterbox(&solid(32, 32, 3, 255), None, &PipelineConfig::default())
            .unwrap();
        assert_eq!(params.ratio, 1.0);
        assert_eq!((params.pad_x, params.pad_y), (0, 0));
        assert_eq!(blob.shape(), [1, 3, 32, 32]);
        assert!(blob.tensor.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn landscape_frame_pads_top_and_bottom() {
        let (blob, params) = letterbox(&solid(640, 480, 3, 0), None, &PipelineConfig::default())
            .unwrap();
        assert_eq!(params.side, 640);
        assert_eq!((params.pad_x, params.pad_y), (0, 80));
        assert_eq!(params.pad_bottom(), 80);
        assert_eq!(blob.shape(), [1, 3, 640, 640]);

        let gray = 114.0 / 255.0;
        assert_eq!(blob.tensor[[0, 0, 0, 0]], gray);
        assert_eq!(blob.tensor[[0, 2, 79, 320]], gray);
        assert_eq!(blob.tensor[[0, 1, 80, 320]], 0.0);
        assert_eq!(blob.tensor[[0, 1, 559, 0]], 0.0);
        assert_eq!(blob.tensor[[0, 1, 560, 0]], gray);
    }

    #[test]
    fn odd_padding_puts_extra_pixel_first() {
        let (_, params) = letterbox(&solid(5, 2, 1, 9), None, &PipelineConfig::default()).unwrap();
        assert_eq!(params.pad_y, 2);
        assert_eq!(params.pad_bottom(), 1);
    }

    #[test]
    fn declared_input_size_resizes_canvas() {
        let target = InputSize::new(320, 320).unwrap();
        let (blob, params) =
            letterbox(&solid(640, 480, 4, 10), Some(target), &PipelineConfig::default()).unwrap();
        assert_eq!(blob.shape(), [1, 3, 320, 320]);
        assert_eq!((params.input_width, params.input_height), (320, 320));
    }

    #[test]
    fn channel_swap_lands_in_planes() {
        let img = Image::from_raw(1, 1, 3, PixelType::U8, &[0, 0, 255]).unwrap();
        let (blob, _) = letterbox(&img, None, &PipelineConfig::default()).unwrap();
        assert_eq!(blob.tensor[[0, 0, 0, 0]], 1.0);
        assert_eq!(blob.tensor[[0, 2, 0, 0]], 0.0);
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let config = PipelineConfig {
            max_image_pixels: 10,
            ..Default::default()
        };
        let err = letterbox(&solid(4, 4, 1, 0), None, &config).unwrap_err();
        assert!(matches!(err, DetectError::InvalidArgument(_)));
    }

    #[test]
    fn to_source_undoes_padding_and_resize() {
        let target = InputSize::new(320, 320).unwrap();
        let (_, params) =
            letterbox(&solid(640, 480, 3, 0), Some(target), &PipelineConfig::default()).unwrap();
        // (100, 120) in source -> (100, 200) on canvas -> (50, 100) in tensor
        let src = params.to_source([50.0, 100.0, 20.0, 10.0]);
        assert_eq!(src, [100.0, 120.0, 40.0, 20.0]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn padded_canvas_is_square(width in 1u32..64, height in 1u32..64) {
            let (blob, params) =
                letterbox(&solid(width, height, 1, 0), None, &PipelineConfig::default()).unwrap();
            let side = width.max(height) as usize;
            prop_assert_eq!(blob.shape(), [1, 3, side, side]);
            prop_assert!(params.pad_x.abs_diff(params.pad_right()) <= 1);
            prop_assert!(params.pad_y.abs_diff(params.pad_bottom()) <= 1);
            if width == height {
                prop_assert_eq!(params.ratio, 1.0);
                prop_assert_eq!((params.pad_x, params.pad_y), (0, 0));
            }
        }
    }
}
