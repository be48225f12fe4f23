///
// Image management
//
// Reconstructions, C0 fields and smoothing kernels are all stored as a
// row-major vector of floats. Row t holds grid row y_vec[t], so row 0
// is the *bottom* of the physical grid; use flip_rows before writing a
// PNG if you want the usual top-down orientation.
//

use image::{GrayImage, Pixel};
use std::ops::{Index, IndexMut};
use std::path::Path;

use crate::pact_error::{PactError, Result};

#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

// Indexed as (column, row), i.e. (s, t) in grid terms.
impl Index<(usize, usize)> for Image {
    type Output = f64;
    fn index(&self, (x, y): (usize, usize)) -> &f64 {
        &self.data[y * self.width + x]
    }
}

impl IndexMut<(usize, usize)> for Image {
    fn index_mut(&mut self, (x, y): (usize, usize)) -> &mut f64 {
        &mut self.data[y * self.width + x]
    }
}

impl Image {
    pub fn zeros(width: usize, height: usize) -> Image {
        Image {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    // Build an image by evaluating value_fn(column, row) at every pixel.
    pub fn from_fn<F: FnMut(usize, usize) -> f64>(width: usize, height: usize, mut value_fn: F) -> Image {
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                data.push(value_fn(x, y));
            }
        }
        Image {
            width,
            height,
            data,
        }
    }

    pub fn load(path: &Path) -> Result<Image> {
        let grey_img = image::open(path)?.into_luma8();

        let width = grey_img.width() as usize;
        let height = grey_img.height() as usize;

        Ok(Image {
            width,
            height,
            data: grey_img.pixels().map(|p| p.channels()[0] as f64).collect(),
        })
    }

    // Values are clamped to 0..255, no scaling is applied.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data_as_u8: Vec<u8> = self
            .data
            .iter()
            .map(|x| x.max(0.0).min(255.0) as u8)
            .collect();
        let img = GrayImage::from_vec(self.width as u32, self.height as u32, data_as_u8)
            .ok_or_else(|| PactError::ShapeMismatch {
                what: "image buffer",
                expected: format!("{}x{}", self.width, self.height),
                actual: format!("{} pixels", self.data.len()),
            })?;
        img.save(path)?;
        Ok(())
    }

    // Stretch the positive range to 0..255 and save. Negative values
    // (DAS images of bipolar signals have plenty) are clipped to black.
    pub fn save_normalised(&self, path: &Path) -> Result<()> {
        let max = self.max_value();
        if max > 0.0 {
            self.normalise(max).scale_values(255.0).save(path)
        } else {
            self.save(path)
        }
    }

    // Normalise so that x is transformed to 1.0.
    pub fn normalise(&self, x: f64) -> Image {
        self.scale_values(1.0 / x)
    }

    pub fn scale_values(&self, factor: f64) -> Image {
        Image {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|y| y * factor).collect(),
        }
    }

    // Swap top and bottom rows, converting between y-up grid order and
    // the top-down order image files use.
    pub fn flip_rows(&self) -> Image {
        let mut data = Vec::with_capacity(self.data.len());
        for row in self.data.chunks(self.width.max(1)).rev() {
            data.extend_from_slice(row);
        }
        Image {
            width: self.width,
            height: self.height,
            data,
        }
    }

    pub fn max_value(&self) -> f64 {
        self.data.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn mean(&self) -> f64 {
        self.data.iter().sum::<f64>() / self.data.len() as f64
    }

    // Location (column, row) and value of the largest pixel. The first
    // occurrence wins on ties, so the result is deterministic.
    pub fn argmax(&self) -> (usize, usize, f64) {
        let mut best = (0, f64::NEG_INFINITY);
        for (idx, &val) in self.data.iter().enumerate() {
            if val > best.1 {
                best = (idx, val);
            }
        }
        (best.0 % self.width, best.0 / self.width, best.1)
    }
}
