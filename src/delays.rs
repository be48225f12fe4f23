//
// Delay schedules
//
// The candidate extra path lengths that DAS is run with. The largest
// plausible delay for a body of radius R and speed of sound v1 in
// background v0 is about (1 - v0/v1) * R, found at the centre.
//

use std::fmt;
use std::str::FromStr;

use crate::geometry::linspace;
use crate::pact_error::{PactError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelayMode {
    // Evenly spaced from 0 to 1.2 * (1 - v0/v1) * R.
    Uniform,
    // (1 - v0/v1) * R * sqrt(u) for evenly spaced u in 0..1: dense near
    // zero, following how wavefront curvature falls off away from the
    // centre.
    Quadric,
}

impl FromStr for DelayMode {
    type Err = PactError;

    fn from_str(s: &str) -> Result<DelayMode> {
        match s {
            "uniform" => Ok(DelayMode::Uniform),
            "quadric" => Ok(DelayMode::Quadric),
            _ => Err(PactError::UnsupportedMode {
                kind: "delay mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DelayMode::Uniform => "uniform",
            DelayMode::Quadric => "quadric",
        })
    }
}

pub fn get_delays(radius: f64, v0: f64, v1: f64, n_delays: usize, mode: DelayMode) -> Result<Vec<f64>> {
    ensure_input!(v0 > 0.0 && v1 > 0.0, "sound speeds must be positive, got {} and {}", v0, v1);
    ensure_input!(radius > 0.0, "radius must be positive, got {}", radius);

    let max_delay = (1.0 - v0 / v1) * radius;
    Ok(match mode {
        DelayMode::Uniform => linspace(0.0, 1.2 * max_delay, n_delays),
        DelayMode::Quadric => linspace(0.0, 1.0, n_delays)
            .into_iter()
            .map(|u| max_delay * u.sqrt())
            .collect(),
    })
}
