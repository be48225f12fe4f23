//
// Electrical impulse response correction
//
// A transducer doesn't record the pressure pulse itself, but the pulse
// convolved with its impulse response (EIR). That smears each arrival
// in time and shifts its peak. We don't try to undo the magnitude of
// the EIR, only its phase: every frequency component of the signal is
// rotated so the EIR would become zero-phase around its own peak. The
// result is a symmetric pulse centred where the EIR peaks.
//

use rustfft::{num_complex::Complex64, FftDirection, FftPlanner};

use crate::pact_error::Result;
use crate::pact_sinogram::Sinogram;

fn to_complex(v: &[f64]) -> Vec<Complex64> {
    v.iter().map(|re| Complex64::new(*re, 0.0)).collect()
}

fn fft(planner: &mut FftPlanner<f64>, data: &mut [Complex64], dir: FftDirection) {
    let fft = planner.plan_fft(data.len(), dir);
    let mut scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
    fft.process_with_scratch(data, &mut scratch);
}

// Phase-correct every row of `signal`. `eir` either has a single row,
// shared by all transducers, or one row per transducer.
pub fn deconv_pa_signal(signal: &Sinogram, eir: &Sinogram) -> Result<Sinogram> {
    ensure_input!(
        eir.samples == signal.samples,
        "EIR has {} samples, signal has {}",
        eir.samples,
        signal.samples
    );
    ensure_input!(
        eir.transducers == 1 || eir.transducers == signal.transducers,
        "EIR has {} rows, expected 1 or {}",
        eir.transducers,
        signal.transducers
    );
    ensure_input!(signal.samples > 0, "signal has no samples");

    let n = signal.samples;
    let mut planner = FftPlanner::new();

    // Per EIR row: exp(i (arg delta - arg EIR)), delta at the EIR peak.
    let mut corrections = Vec::with_capacity(eir.transducers);
    for k in 0..eir.transducers {
        let row = eir.row(k);
        let mut peak = 0;
        for (i, v) in row.iter().enumerate() {
            if *v > row[peak] {
                peak = i;
            }
        }
        let mut delta = vec![Complex64::new(0.0, 0.0); n];
        delta[peak] = Complex64::new(1.0, 0.0);
        let mut response = to_complex(row);
        fft(&mut planner, &mut delta, FftDirection::Forward);
        fft(&mut planner, &mut response, FftDirection::Forward);
        corrections.push(
            delta
                .iter()
                .zip(response.iter())
                .map(|(d, e)| Complex64::from_polar(1.0, d.arg() - e.arg()))
                .collect::<Vec<_>>(),
        );
    }

    let mut corrected = Sinogram::zeros(signal.transducers, n);
    for k in 0..signal.transducers {
        let correction = &corrections[if eir.transducers == 1 { 0 } else { k }];
        let mut spectrum = to_complex(signal.row(k));
        fft(&mut planner, &mut spectrum, FftDirection::Forward);
        for (s, c) in spectrum.iter_mut().zip(correction.iter()) {
            *s *= c;
        }
        fft(&mut planner, &mut spectrum, FftDirection::Inverse);
        // rustfft doesn't normalise.
        for (i, s) in spectrum.iter().enumerate() {
            corrected[(k, i)] = s.re / n as f64;
        }
    }
    Ok(corrected)
}
