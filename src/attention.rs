//
// Attention weights
//
// Each image in the delay stack is a guess at how far the wavefront was
// advanced. Given the C0 field (the model's best guess per pixel), decide
// how much each candidate image contributes at each pixel, then blend
// the stack with those weights.
//

use std::fmt;
use std::str::FromStr;

use crate::pact_error::{PactError, Result};
use crate::pact_image::Image;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Attention {
    // Plain average of the stack; ignores C0.
    Uniform,
    // Pick the candidate closest to C0.
    OneHot,
    // Smooth weights from the distance between candidate and C0.
    Euclidean,
}

impl FromStr for Attention {
    type Err = PactError;

    fn from_str(s: &str) -> Result<Attention> {
        match s {
            "uniform" => Ok(Attention::Uniform),
            "onehot" => Ok(Attention::OneHot),
            "euclidean" => Ok(Attention::Euclidean),
            _ => Err(PactError::UnsupportedMode {
                kind: "attention",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Attention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Attention::Uniform => "uniform",
            Attention::OneHot => "onehot",
            Attention::Euclidean => "euclidean",
        })
    }
}

// One weight per (delay, pixel). A 1x1 field applies the same weight
// at every pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightField {
    pub delays: usize,
    pub width: usize,
    pub height: usize,
    pub data: Vec<f64>,
}

impl WeightField {
    pub fn weight(&self, i: usize, x: usize, y: usize) -> f64 {
        if self.width == 1 && self.height == 1 {
            self.data[i]
        } else {
            self.data[(i * self.height + y) * self.width + x]
        }
    }

    fn is_broadcast(&self) -> bool {
        self.width == 1 && self.height == 1
    }
}

// Weights for one pixel with model delay c0.
fn pixel_weights(c0: f64, delays: &[f64], attention: Attention) -> Vec<f64> {
    let n = delays.len();
    match attention {
        Attention::Uniform => vec![1.0; n],
        Attention::OneHot => {
            let mut best = 0;
            for (i, d) in delays.iter().enumerate() {
                // Strict comparison, so the first of equals wins.
                if (d - c0).abs() < (delays[best] - c0).abs() {
                    best = i;
                }
            }
            (0..n).map(|i| if i == best { 1.0 } else { 0.0 }).collect()
        }
        Attention::Euclidean => {
            let raw = delays.iter().map(|d| ((d - c0) * (d - c0)).exp()).collect::<Vec<_>>();
            let total: f64 = raw.iter().sum();
            raw.iter().map(|w| w / total * n as f64).collect()
        }
    }
}

pub fn get_weights(c0: &Image, delays: &[f64], attention: Attention) -> WeightField {
    let n = delays.len();
    if attention == Attention::Uniform {
        return WeightField {
            delays: n,
            width: 1,
            height: 1,
            data: vec![1.0; n],
        };
    }

    let (width, height) = (c0.width, c0.height);
    let mut data = vec![0.0; n * width * height];
    for y in 0..height {
        for x in 0..width {
            for (i, w) in pixel_weights(c0[(x, y)], delays, attention).into_iter().enumerate() {
                data[(i * height + y) * width + x] = w;
            }
        }
    }
    WeightField {
        delays: n,
        width,
        height,
        data,
    }
}

// Weighted mean along the delay axis. Delays are accumulated in order,
// so the result is reproducible.
pub fn combine(stack: &[Image], weights: &WeightField) -> Result<Image> {
    ensure_input!(!stack.is_empty(), "cannot combine an empty image stack");
    ensure_input!(
        stack.len() == weights.delays,
        "{} images but {} delay weights",
        stack.len(),
        weights.delays
    );
    let (width, height) = (stack[0].width, stack[0].height);
    ensure_input!(
        stack.iter().all(|image| image.width == width && image.height == height),
        "images in the stack differ in size"
    );
    ensure_input!(
        weights.is_broadcast() || (weights.width == width && weights.height == height),
        "weights are {}x{} but images are {}x{}",
        weights.width,
        weights.height,
        width,
        height
    );

    let n = stack.len() as f64;
    Ok(Image::from_fn(width, height, |x, y| {
        let mut total = 0.0;
        for (i, image) in stack.iter().enumerate() {
            total += weights.weight(i, x, y) * image[(x, y)];
        }
        total / n
    }))
}
