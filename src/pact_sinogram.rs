///
// Sinogram generation
//
// A sinogram is one time series per transducer. Given a set of point
// absorbers and a wavefront model for the medium, generate the
// sinogram a ring array would record.
//

use rand::Rng;
use std::ops::{Index, IndexMut};
use std::path::Path;
use tracing::debug;

use crate::geometry::{Grid, Ring};
use crate::pact_error::{PactError, Result};
use crate::pact_image::Image;
use crate::wavefront::Wavefront;

// Gaussian pulses are truncated this many standard deviations out.
const PULSE_CUTOFF: f64 = 4.0;

// Only real difference from Image is that the axes are labelled
// "transducers" and "samples", and that row k really is transducer k.
#[derive(Clone, Debug, PartialEq)]
pub struct Sinogram {
    pub transducers: usize,
    pub samples: usize,
    pub data: Vec<f64>,
}

// Indexed as (transducer, sample).
impl Index<(usize, usize)> for Sinogram {
    type Output = f64;
    fn index(&self, (k, i): (usize, usize)) -> &f64 {
        &self.data[k * self.samples + i]
    }
}

impl IndexMut<(usize, usize)> for Sinogram {
    fn index_mut(&mut self, (k, i): (usize, usize)) -> &mut f64 {
        &mut self.data[k * self.samples + i]
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointSource {
    pub x: f64,
    pub y: f64,
    pub amplitude: f64,
}

// One source per non-zero pixel, amplitude scaled into 0..1.
pub fn sources_from_image(image: &Image, grid: &Grid) -> Result<Vec<PointSource>> {
    if image.width != grid.width() || image.height != grid.height() {
        return Err(PactError::ShapeMismatch {
            what: "phantom image",
            expected: format!("{}x{}", grid.width(), grid.height()),
            actual: format!("{}x{}", image.width, image.height),
        });
    }
    let mut sources = Vec::new();
    for t in 0..image.height {
        for s in 0..image.width {
            let value = image[(s, t)];
            if value != 0.0 {
                sources.push(PointSource {
                    x: grid.x(s),
                    y: grid.y(t),
                    amplitude: value / 255.0,
                });
            }
        }
    }
    Ok(sources)
}

impl Sinogram {
    pub fn zeros(transducers: usize, samples: usize) -> Sinogram {
        Sinogram {
            transducers,
            samples,
            data: vec![0.0; transducers * samples],
        }
    }

    pub fn row(&self, k: usize) -> &[f64] {
        &self.data[k * self.samples..(k + 1) * self.samples]
    }

    // Deposit a pulse centred at (fractional) sample position `centre`.
    // With zero width, the whole amplitude lands in sample
    // floor(centre), matching how DAS picks its samples.
    fn add_pulse(&mut self, k: usize, centre: f64, amplitude: f64, sigma: f64) {
        if sigma <= 0.0 {
            let idx = centre.floor();
            if idx >= 0.0 && idx < self.samples as f64 {
                self[(k, idx as usize)] += amplitude;
            }
            return;
        }

        let first = (centre - PULSE_CUTOFF * sigma).ceil().max(0.0);
        let last = (centre + PULSE_CUTOFF * sigma).floor().min(self.samples as f64 - 1.0);
        if first > last {
            return;
        }
        for i in first as usize..=last as usize {
            let offset = (i as f64 - centre) / sigma;
            self[(k, i)] += amplitude * (-0.5 * offset * offset).exp();
        }
    }

    // If we're supporting saving, let's support loading.
    pub fn load(path: &Path) -> Result<Sinogram> {
        let image = Image::load(path)?;
        Ok(Sinogram {
            transducers: image.height,
            samples: image.width,
            data: image.data.iter().map(|p| (p - 128.0) / 127.0).collect(),
        })
    }

    // Save as a greyscale image, one row per transducer, with zero at
    // mid-grey and the largest magnitude at full scale. Lossy: amplitude
    // is normalised away.
    pub fn save(&self, path: &Path) -> Result<()> {
        let peak = self.data.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        let scale = if peak > 0.0 { 127.0 / peak } else { 0.0 };
        let image = Image {
            width: self.samples,
            height: self.transducers,
            data: self.data.iter().map(|x| (128.0 + x * scale).round()).collect(),
        };
        image.save(path)
    }

    // Add uniform noise of up to +/- noise times the largest magnitude.
    pub fn add_noise<R: Rng>(&self, rng: &mut R, noise: f64) -> Sinogram {
        let peak = self.data.iter().fold(0.0f64, |m, x| m.max(x.abs()));
        let amplitude = peak * noise;
        Sinogram {
            transducers: self.transducers,
            samples: self.samples,
            data: self
                .data
                .iter()
                .map(|x| x + amplitude * rng.gen_range(-1.0..=1.0))
                .collect(),
        }
    }
}

// Simulate the sinogram recorded from point sources in a medium
// described by `model`, which builds the wavefront model for a source
// at (x, y). The signal from a source reaches transducer k after
// travelling (|p_k - source| - excess_delay(theta_k)) at speed v0.
pub fn simulate<W, F>(
    ring: &Ring,
    t_sample: f64,
    v0: f64,
    samples: usize,
    pulse_sigma: f64,
    sources: &[PointSource],
    model: F,
) -> Result<Sinogram>
where
    W: Wavefront,
    F: Fn(f64, f64) -> Result<W>,
{
    ensure_input!(t_sample > 0.0, "sample interval must be positive, got {}", t_sample);
    ensure_input!(v0 > 0.0, "sound speed must be positive, got {}", v0);
    ensure_input!(samples > 0, "sinogram needs at least one sample per transducer");

    let positions = ring.positions();
    let angles = ring.angles();
    let sample_length = v0 * t_sample;

    let mut sinogram = Sinogram::zeros(ring.transducers, samples);
    for source in sources {
        let excess = model(source.x, source.y)?.excess_delay(&angles);
        for (k, ((tx, ty), delay)) in positions.iter().zip(excess.iter()).enumerate() {
            let distance = ((tx - source.x).powi(2) + (ty - source.y).powi(2)).sqrt() - delay;
            sinogram.add_pulse(k, distance / sample_length, source.amplitude, pulse_sigma);
        }
    }

    debug!(
        "simulated {} sources onto {} transducers x {} samples",
        sources.len(),
        ring.transducers,
        samples
    );
    Ok(sinogram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wavefront::HomogeneousExact;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    const V0: f64 = 1480.0;
    const T_SAMPLE: f64 = 1e-7;

    fn background(x: f64, y: f64) -> Result<HomogeneousExact> {
        // A body with the background's own speed of sound.
        HomogeneousExact::at(x, y, 0.05, V0, V0)
    }

    #[test]
    fn test_simulate_blank() {
        let ring = Ring::new(0.05, 8).unwrap();
        let sinogram = simulate(&ring, T_SAMPLE, V0, 100, 2.0, &[], background).unwrap();
        assert_eq!(sinogram.data.len(), 8 * 100);
        assert!(sinogram.data.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_simulate_centre_impulse() {
        let ring = Ring::new(0.05, 16).unwrap();
        let source = PointSource {
            x: 0.0,
            y: 0.0,
            amplitude: 2.0,
        };
        let sinogram = simulate(&ring, T_SAMPLE, V0, 600, 0.0, &[source], background).unwrap();
        // 0.05 m at 1480 m/s sampled every 0.1 us is sample 337.8.
        for k in 0..16 {
            let row = sinogram.row(k);
            assert_eq!(row[337], 2.0);
            assert_eq!(row.iter().sum::<f64>(), 2.0);
        }
    }

    #[test]
    fn test_simulate_faster_body_arrives_early() {
        let ring = Ring::new(0.05, 4).unwrap();
        let source = PointSource {
            x: 0.0,
            y: 0.0,
            amplitude: 1.0,
        };
        let fast = |x, y| HomogeneousExact::at(x, y, 0.05, V0, 1520.0);
        let sinogram = simulate(&ring, T_SAMPLE, V0, 600, 0.0, &[source], fast).unwrap();
        // Travel time 0.05 / 1520 = 32.89 us, i.e. sample 328.
        for k in 0..4 {
            assert_eq!(sinogram[(k, 328)], 1.0);
        }
    }

    #[test]
    fn test_gaussian_pulse_shape() {
        let mut sinogram = Sinogram::zeros(1, 50);
        sinogram.add_pulse(0, 20.0, 1.5, 2.0);
        assert_eq!(sinogram[(0, 20)], 1.5);
        assert_abs_diff_eq!(sinogram[(0, 22)], 1.5 * (-0.5f64).exp(), epsilon = 1e-15);
        assert_eq!(sinogram[(0, 18)], sinogram[(0, 22)]);
        // Truncated at four sigma.
        assert_eq!(sinogram[(0, 11)], 0.0);
        assert!(sinogram[(0, 12)] > 0.0);
    }

    #[test]
    fn test_pulse_out_of_window() {
        let mut sinogram = Sinogram::zeros(1, 10);
        sinogram.add_pulse(0, -30.0, 1.0, 2.0);
        sinogram.add_pulse(0, 50.0, 1.0, 2.0);
        sinogram.add_pulse(0, 10.5, 1.0, 0.0);
        sinogram.add_pulse(0, -0.5, 1.0, 0.0);
        assert!(sinogram.data.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_sources_from_image() {
        let grid = Grid::centred(3, 2, 1.0).unwrap();
        let mut image = Image::zeros(3, 2);
        image[(2, 1)] = 255.0;
        let sources = sources_from_image(&image, &grid).unwrap();
        assert_eq!(
            sources,
            vec![PointSource {
                x: 1.0,
                y: 1.0,
                amplitude: 1.0
            }]
        );
        assert!(sources_from_image(&Image::zeros(2, 2), &grid).is_err());
    }

    #[test]
    fn test_add_noise() {
        let mut sinogram = Sinogram::zeros(2, 100);
        sinogram[(1, 40)] = -4.0;
        let mut rng = Pcg64::seed_from_u64(42);
        let noisy = sinogram.add_noise(&mut rng, 0.1);
        assert_ne!(noisy, sinogram);
        for (a, b) in noisy.data.iter().zip(sinogram.data.iter()) {
            assert!((a - b).abs() <= 0.4);
        }

        // Same seed, same noise.
        let mut rng = Pcg64::seed_from_u64(42);
        assert_eq!(sinogram.add_noise(&mut rng, 0.1), noisy);
    }

    #[test]
    fn test_save_load() {
        let mut sinogram = Sinogram::zeros(3, 20);
        sinogram[(0, 5)] = 2.0;
        sinogram[(2, 7)] = -2.0;
        sinogram[(1, 9)] = 1.0;
        let path = std::env::temp_dir().join(format!("pact_sinogram_{}.png", std::process::id()));
        sinogram.save(&path).unwrap();
        let loaded = Sinogram::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!((loaded.transducers, loaded.samples), (3, 20));
        assert_abs_diff_eq!(loaded[(0, 5)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(loaded[(2, 7)], -1.0, epsilon = 1e-12);
        // 128 + 63.5 rounds up to 192.
        assert_abs_diff_eq!(loaded[(1, 9)], 64.0 / 127.0, epsilon = 1e-12);
        assert_eq!(loaded[(1, 1)], 0.0);
    }
}
