//! Image preprocessing for classifier inference.
//!
//! Turns uploaded bytes into the tensor layout the network was trained on:
//! a square NHWC frame in blue-green-red channel order, scaled into [0, 1].

use image::{DynamicImage, ImageDecoder, ImageError, ImageReader, Rgb, RgbImage};
use std::io::Cursor;

/// Number of color channels fed to the network
pub const CHANNELS: usize = 3;

/// Interpolation weights are fixed point with this many fractional bits
const WEIGHT_BITS: u32 = 11;
const WEIGHT_SCALE: f32 = (1 << WEIGHT_BITS) as f32;

/// A single preprocessed frame, laid out as `[height, width, channel]`
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

impl ImageTensor {
    /// Shape of the batch-of-one tensor handed to the model
    pub fn batch_shape(&self) -> [i64; 4] {
        [1, self.height as i64, self.width as i64, CHANNELS as i64]
    }
}

#[cfg(test)]
impl ImageTensor {
    /// Value at pixel (`x`, `y`) for channel `c` (0 = blue, 1 = green, 2 = red)
    pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
        self.data[(y * self.width + x) * CHANNELS + c]
    }
}

/// Decodes and normalizes images into model input tensors.
///
/// The channel order is BGR, not RGB. The network was trained on frames read
/// through OpenCV, which stores color in that order, and swapping it silently
/// degrades predictions. Resizing follows OpenCV's default `INTER_LINEAR`
/// for the same reason.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    input_size: u32,
}

impl ImagePreprocessor {
    /// Create a preprocessor producing `input_size x input_size` frames.
    pub fn new(input_size: u32) -> Self {
        Self { input_size }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    /// Decode raw upload bytes and build the input tensor.
    pub fn process(&self, bytes: &[u8]) -> Result<ImageTensor, ImageError> {
        let rgb = self.decode(bytes)?;
        Ok(self.tensor_from_rgb(&rgb))
    }

    /// Decode to RGB, applying any EXIF orientation the container carries.
    pub fn decode(&self, bytes: &[u8]) -> Result<RgbImage, ImageError> {
        let mut decoder = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_decoder()?;
        let orientation = decoder.orientation()?;
        let mut decoded = DynamicImage::from_decoder(decoder)?;
        decoded.apply_orientation(orientation);
        Ok(decoded.to_rgb8())
    }

    /// Resize an already decoded frame and lay it out as BGR / 255.
    pub fn tensor_from_rgb(&self, rgb: &RgbImage) -> ImageTensor {
        // Exact target size; aspect ratio is not preserved
        let resized = resize_linear(rgb, self.input_size, self.input_size);

        let side = self.input_size as usize;
        let mut data = Vec::with_capacity(side * side * CHANNELS);
        for pixel in resized.pixels() {
            let [r, g, b] = pixel.0;
            data.push(b as f32 / 255.0);
            data.push(g as f32 / 255.0);
            data.push(r as f32 / 255.0);
        }

        ImageTensor {
            height: side,
            width: side,
            data,
        }
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self::new(128)
    }
}

/// Source taps for one destination coordinate: two indices and their weights
#[derive(Debug, Clone, Copy, PartialEq)]
struct Tap {
    lo: usize,
    hi: usize,
    w_lo: i32,
    w_hi: i32,
}

/// Half-pixel-centred sampling positions along one axis.
///
/// Positions left of the first pixel or at/after the last one snap to the
/// border with zero fractional part.
fn axis_taps(src_len: u32, dst_len: u32) -> Vec<Tap> {
    let scale = 1.0 / (dst_len as f64 / src_len as f64);
    let last = src_len as usize - 1;

    (0..dst_len)
        .map(|d| {
            let pos = ((d as f64 + 0.5) * scale - 0.5) as f32;
            let mut lo = pos.floor();
            let mut frac = pos - lo;
            if lo < 0.0 {
                lo = 0.0;
                frac = 0.0;
            }
            let mut lo = lo as usize;
            if lo >= last {
                lo = last;
                frac = 0.0;
            }
            Tap {
                lo,
                hi: (lo + 1).min(last),
                w_lo: ((1.0 - frac) * WEIGHT_SCALE).round_ties_even() as i32,
                w_hi: (frac * WEIGHT_SCALE).round_ties_even() as i32,
            }
        })
        .collect()
}

/// Bilinear resize matching OpenCV's 8-bit `INTER_LINEAR`.
///
/// Rows are blended horizontally with 11-bit integer weights, then
/// vertically, and the 22-bit product is rounded back to a byte. An exact
/// halving on both axes is a 2x2 box average, as OpenCV does.
pub fn resize_linear(src: &RgbImage, dst_w: u32, dst_h: u32) -> RgbImage {
    let (src_w, src_h) = src.dimensions();
    if (src_w, src_h) == (dst_w, dst_h) {
        return src.clone();
    }
    if src_w == dst_w * 2 && src_h == dst_h * 2 {
        return halve(src, dst_w, dst_h);
    }

    let xs = axis_taps(src_w, dst_w);
    let ys = axis_taps(src_h, dst_h);

    let row = |y: usize, x: &Tap, c: usize| -> i32 {
        let y = y as u32;
        src.get_pixel(x.lo as u32, y)[c] as i32 * x.w_lo
            + src.get_pixel(x.hi as u32, y)[c] as i32 * x.w_hi
    };

    RgbImage::from_fn(dst_w, dst_h, |dx, dy| {
        let x = &xs[dx as usize];
        let y = &ys[dy as usize];
        let mut out = [0u8; CHANNELS];
        for (c, value) in out.iter_mut().enumerate() {
            let sum = row(y.lo, x, c) * y.w_lo + row(y.hi, x, c) * y.w_hi;
            *value = ((sum + (1 << (2 * WEIGHT_BITS - 1))) >> (2 * WEIGHT_BITS)).clamp(0, 255) as u8;
        }
        Rgb(out)
    })
}

fn halve(src: &RgbImage, dst_w: u32, dst_h: u32) -> RgbImage {
    RgbImage::from_fn(dst_w, dst_h, |dx, dy| {
        let (sx, sy) = (dx * 2, dy * 2);
        let mut out = [0u8; CHANNELS];
        for (c, value) in out.iter_mut().enumerate() {
            let sum: u32 = [(sx, sy), (sx + 1, sy), (sx, sy + 1), (sx + 1, sy + 1)]
                .iter()
                .map(|&(x, y)| src.get_pixel(x, y)[c] as u32)
                .sum();
            *value = ((sum + 2) >> 2) as u8;
        }
        Rgb(out)
    })
}
