//
// Delay-and-sum reconstruction
//
// Every grid point is a candidate source. For each transducer, work out
// which sample the signal from that point would have arrived in, and
// average those samples over the ring. Points that really are sources
// collect their pulse from every transducer; elsewhere contributions
// land at scattered times and mostly cancel or stay small.
//
// A speed-of-sound mismatch is handled by shortening every path by a
// fixed "delay" distance before converting it to a sample index.
//

use rayon::prelude::*;
use tracing::{debug, info};

use crate::geometry::{Grid, Ring};
use crate::pact_error::{PactError, Result};
use crate::pact_image::Image;
use crate::pact_sinogram::Sinogram;

// Average, over all transducers, of the sample each one recorded from a
// source at (x, y). Paths whose sample index is not in 1..samples
// contribute zero: sample 0 is the excitation instant itself, and
// anything else is outside the recording.
//
// Transducers are always summed in order, so the result does not
// depend on how pixels are spread across threads.
fn delay_and_sum(
    sinogram: &Sinogram,
    positions: &[(f64, f64)],
    ring_error: &[f64],
    (x, y): (f64, f64),
    delay: f64,
    sample_length: f64,
) -> f64 {
    let mut total = 0.0;
    for (k, (&(tx, ty), error)) in positions.iter().zip(ring_error.iter()).enumerate() {
        let distance = ((tx - x).powi(2) + (ty - y).powi(2)).sqrt() - delay + error;
        let idx = (distance / sample_length).floor();
        // NaN fails both comparisons.
        if idx > 0.0 && idx < sinogram.samples as f64 {
            total += sinogram[(k, idx as usize)];
        }
    }
    total / positions.len() as f64
}

fn check_inputs(t_sample: f64, v0: f64, sinogram: &Sinogram, ring_error: Option<&[f64]>) -> Result<()> {
    ensure_input!(t_sample > 0.0, "sample interval must be positive, got {}", t_sample);
    ensure_input!(v0 > 0.0, "sound speed must be positive, got {}", v0);
    ensure_input!(
        sinogram.data.len() == sinogram.transducers * sinogram.samples,
        "sinogram holds {} values, expected {} x {}",
        sinogram.data.len(),
        sinogram.transducers,
        sinogram.samples
    );
    if let Some(errors) = ring_error {
        if errors.len() != sinogram.transducers {
            return Err(PactError::ShapeMismatch {
                what: "ring error",
                expected: format!("{} entries", sinogram.transducers),
                actual: format!("{} entries", errors.len()),
            });
        }
    }
    Ok(())
}

// Reconstruct one image. image[(s, t)] is the value at
// (grid.x(s), grid.y(t)). ring_error, if given, is the radial placement
// error of each transducer, added to its path lengths.
pub fn reconstruct(
    ring_radius: f64,
    t_sample: f64,
    v0: f64,
    sinogram: &Sinogram,
    grid: &Grid,
    delay: f64,
    ring_error: Option<&[f64]>,
) -> Result<Image> {
    let ring = Ring::new(ring_radius, sinogram.transducers)?;
    check_inputs(t_sample, v0, sinogram, ring_error)?;

    let positions = ring.positions();
    let errors = match ring_error {
        Some(errors) => errors.to_vec(),
        None => vec![0.0; ring.transducers],
    };
    let sample_length = v0 * t_sample;

    let width = grid.width();
    let mut data = vec![0.0; width * grid.height()];
    data.par_chunks_mut(width).enumerate().for_each(|(t, row)| {
        let y = grid.y(t);
        for (s, pixel) in row.iter_mut().enumerate() {
            *pixel = delay_and_sum(sinogram, &positions, &errors, (grid.x(s), y), delay, sample_length);
        }
    });

    Ok(Image {
        width,
        height: grid.height(),
        data,
    })
}

// Reconstruct once per candidate delay, returning the images in the
// same order as the delays.
pub fn reconstruct_stack(
    ring_radius: f64,
    t_sample: f64,
    v0: f64,
    sinogram: &Sinogram,
    grid: &Grid,
    delays: &[f64],
    ring_error: Option<&[f64]>,
) -> Result<Vec<Image>> {
    info!(
        "reconstructing {} delays on a {}x{} grid from {} transducers",
        delays.len(),
        grid.width(),
        grid.height(),
        sinogram.transducers
    );
    let stack = delays
        .par_iter()
        .map(|&delay| reconstruct(ring_radius, t_sample, v0, sinogram, grid, delay, ring_error))
        .collect::<Result<Vec<_>>>()?;
    debug!("image stack complete");
    Ok(stack)
}
