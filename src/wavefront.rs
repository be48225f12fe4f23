//
// Wavefront models
//
// A wavefront model predicts, for a field point and a speed-of-sound
// hypothesis, how much shorter the acoustic path to a transducer at
// look angle theta appears than the straight-line distance at the
// nominal speed v0. DAS can then subtract this "excess delay" (a path
// length, in metres) from its distances.
//
// The transducer at look angle theta sits at -R (sin theta, cos theta),
// so from a field point at polar (r, phi) the path to it runs in
// direction -(sin theta, cos theta), and the distance to a circle of
// radius R centred on the origin along that path is
//
//   sqrt(R^2 - (r sin(theta - phi))^2) + r cos(theta - phi).
//
// A region with speed of sound v contributes (1 - v0/v) per metre of
// path through it.
//

use rayon::prelude::*;
use tracing::debug;

use crate::geometry::{to_polar, Grid};
use crate::interpolate::{BicubicField, PeriodicSpline};
use crate::pact_image::Image;
use crate::pact_error::{PactError, Result};

// Number of look angles averaged over to find C0 when a model has no
// closed form for it, and the default angle count for SosField.
pub const DEFAULT_ANGLES: usize = 128;

// Default number of points along each ray in SosField.
pub const DEFAULT_RAY_SAMPLES: usize = 64;

// Harmonic expansion of the excess delay:
//
//   C0 + C1 cos(theta - phi1) + C2 cos(2 (theta - phi2))
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Harmonics {
    pub c0: f64,
    pub c1: f64,
    pub phi1: f64,
    pub c2: f64,
    pub phi2: f64,
}

impl Harmonics {
    pub fn evaluate(&self, theta: f64) -> f64 {
        self.c0 + self.c1 * (theta - self.phi1).cos() + self.c2 * (2.0 * (theta - self.phi2)).cos()
    }
}

pub trait Wavefront {
    // Excess delay at each of the given look angles.
    fn excess_delay(&self, thetas: &[f64]) -> Vec<f64>;

    // Only models with a closed-form expansion provide this.
    fn harmonics(&self) -> Option<Harmonics> {
        None
    }

    // The angle-independent part of the excess delay. Without a closed
    // form, this is the mean over evenly spaced look angles.
    fn c0(&self) -> f64 {
        if let Some(harmonics) = self.harmonics() {
            return harmonics.c0;
        }
        let delays = self.excess_delay(&PeriodicSpline::knots(DEFAULT_ANGLES));
        delays.iter().sum::<f64>() / delays.len() as f64
    }
}

impl<W: Wavefront + ?Sized> Wavefront for Box<W> {
    fn excess_delay(&self, thetas: &[f64]) -> Vec<f64> {
        (**self).excess_delay(thetas)
    }

    fn harmonics(&self) -> Option<Harmonics> {
        (**self).harmonics()
    }

    fn c0(&self) -> f64 {
        (**self).c0()
    }
}

fn mismatch(v0: f64, v: f64) -> f64 {
    1.0 - v0 / v
}

// Path length from a point inside a circle to its edge.
fn chord_from_inside(radius: f64, r: f64, phi: f64, theta: f64) -> f64 {
    let offset = r * (theta - phi).sin();
    (radius * radius - offset * offset).sqrt() + r * (theta - phi).cos()
}

// Path length through a circle from a point outside it; zero if the
// path misses, or if the circle lies behind the point.
fn chord_from_outside(radius: f64, r: f64, phi: f64, theta: f64) -> f64 {
    if (phi - theta).cos() < 0.0 {
        return 0.0;
    }
    let offset = r * (theta - phi).sin();
    2.0 * (radius * radius - offset * offset).max(0.0).sqrt()
}

fn check_speeds(speeds: &[f64]) -> Result<()> {
    ensure_input!(
        speeds.iter().all(|v| *v > 0.0 && v.is_finite()),
        "sound speeds must be positive, got {:?}",
        speeds
    );
    Ok(())
}

////////////////////////////////////////////////////////////////////////
// Homogeneous body, harmonic approximation
//

// Closed-form second-order expansion for a point at polar (r, phi)
// inside a uniform circular body of the given radius and speed v1.
pub fn get_fourier_params(r: f64, phi: f64, radius: f64, v0: f64, v1: f64) -> Harmonics {
    let k = mismatch(v0, v1);
    Harmonics {
        c0: k * radius * (1.0 - (r * r) / (4.0 * radius * radius)),
        c1: k * r,
        phi1: phi,
        c2: k * r * r / (4.0 * radius),
        phi2: phi,
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HomogeneousHarmonic {
    harmonics: Harmonics,
}

impl HomogeneousHarmonic {
    pub fn new(harmonics: Harmonics) -> HomogeneousHarmonic {
        HomogeneousHarmonic { harmonics }
    }

    pub fn at(x: f64, y: f64, radius: f64, v0: f64, v1: f64) -> Result<HomogeneousHarmonic> {
        check_speeds(&[v0, v1])?;
        ensure_input!(radius > 0.0, "body radius must be positive, got {}", radius);
        let (r, phi) = to_polar(x, y);
        Ok(HomogeneousHarmonic::new(get_fourier_params(r, phi, radius, v0, v1)))
    }
}

impl Wavefront for HomogeneousHarmonic {
    fn excess_delay(&self, thetas: &[f64]) -> Vec<f64> {
        thetas.iter().map(|t| self.harmonics.evaluate(*t)).collect()
    }

    fn harmonics(&self) -> Option<Harmonics> {
        Some(self.harmonics)
    }
}

////////////////////////////////////////////////////////////////////////
// Homogeneous body, exact chord lengths
//

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HomogeneousExact {
    radius: f64,
    r: f64,
    phi: f64,
    scale: f64,
}

impl HomogeneousExact {
    pub fn new(radius: f64, r: f64, phi: f64, v0: f64, v1: f64) -> Result<HomogeneousExact> {
        check_speeds(&[v0, v1])?;
        ensure_input!(radius > 0.0, "body radius must be positive, got {}", radius);
        Ok(HomogeneousExact {
            radius,
            r,
            phi,
            scale: mismatch(v0, v1),
        })
    }

    pub fn at(x: f64, y: f64, radius: f64, v0: f64, v1: f64) -> Result<HomogeneousExact> {
        let (r, phi) = to_polar(x, y);
        HomogeneousExact::new(radius, r, phi, v0, v1)
    }
}

impl Wavefront for HomogeneousExact {
    fn excess_delay(&self, thetas: &[f64]) -> Vec<f64> {
        let inside = self.r < self.radius;
        thetas
            .iter()
            .map(|&theta| {
                let chord = if inside {
                    chord_from_inside(self.radius, self.r, self.phi, theta)
                } else {
                    chord_from_outside(self.radius, self.r, self.phi, theta)
                };
                self.scale * chord
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////
// Body with one circular inclusion
//

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
    pub sos: f64,
}

// Where the ray from polar (r, phi) towards look angle theta runs
// through a circle of the given radius centred on the pole, as
// distances (start, end) along the ray. None if it never does.
fn ray_interval(radius: f64, r: f64, phi: f64, theta: f64) -> Option<(f64, f64)> {
    let offset = r * (theta - phi).sin();
    let disc = radius * radius - offset * offset;
    if disc < 0.0 {
        return None;
    }
    let along = r * (theta - phi).cos();
    let half = disc.sqrt();
    let (start, end) = ((along - half).max(0.0), along + half);
    if end > start {
        Some((start, end))
    } else {
        None
    }
}

fn interval_length(interval: Option<(f64, f64)>) -> f64 {
    interval.map_or(0.0, |(start, end)| end - start)
}

// The body is centred on the origin; the inclusion may sit anywhere,
// including across the body edge or outside it. Path through the
// inclusion counts at the inclusion's speed, the rest of the path
// through the body at the body's.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DoubleCircle {
    body_radius: f64,
    inclusion_radius: f64,
    body_scale: f64,
    inclusion_scale: f64,
    // Polar coordinates relative to the body and inclusion centres.
    r1: f64,
    phi1: f64,
    r2: f64,
    phi2: f64,
}

impl DoubleCircle {
    pub fn at(x: f64, y: f64, body: &Circle, inclusion: &Circle, v0: f64) -> Result<DoubleCircle> {
        check_speeds(&[v0, body.sos, inclusion.sos])?;
        ensure_input!(
            body.radius > 0.0 && inclusion.radius > 0.0,
            "circle radii must be positive, got {} and {}",
            body.radius,
            inclusion.radius
        );
        ensure_input!(
            body.x == 0.0 && body.y == 0.0,
            "body must be centred on the ring, got ({}, {})",
            body.x,
            body.y
        );

        let (r1, phi1) = to_polar(x, y);
        let (r2, phi2) = to_polar(x - inclusion.x, y - inclusion.y);

        Ok(DoubleCircle {
            body_radius: body.radius,
            inclusion_radius: inclusion.radius,
            body_scale: mismatch(v0, body.sos),
            inclusion_scale: mismatch(v0, inclusion.sos),
            r1,
            phi1,
            r2,
            phi2,
        })
    }

    // (path through body only, path through inclusion) at angle theta.
    fn chords(&self, theta: f64) -> (f64, f64) {
        let body = ray_interval(self.body_radius, self.r1, self.phi1, theta);
        let inclusion = ray_interval(self.inclusion_radius, self.r2, self.phi2, theta);
        let overlap = match (body, inclusion) {
            (Some((b0, b1)), Some((i0, i1))) => (b1.min(i1) - b0.max(i0)).max(0.0),
            _ => 0.0,
        };
        (interval_length(body) - overlap, interval_length(inclusion))
    }
}

impl Wavefront for DoubleCircle {
    fn excess_delay(&self, thetas: &[f64]) -> Vec<f64> {
        thetas
            .iter()
            .map(|&theta| {
                let (body_only, inclusion) = self.chords(theta);
                self.body_scale * body_only + self.inclusion_scale * inclusion
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////
// Arbitrary speed-of-sound map
//
// Integrates (1 - v0 / SOS) along the straight ray from the point to
// the edge of the integration disc (normally the ring) at evenly spaced
// look angles, then fits a periodic spline through the results.
//

#[derive(Clone, Debug)]
pub struct SosField {
    spline: PeriodicSpline,
}

// Sample the speed-of-sound map and validate it for use by SosField.
pub fn sos_field(grid: &Grid, sos: Image) -> Result<BicubicField> {
    ensure_input!(
        sos.data.iter().all(|v| *v > 0.0 && v.is_finite()),
        "speed-of-sound map must be positive everywhere"
    );
    BicubicField::new(grid, sos)
}

impl SosField {
    pub fn at(field: &BicubicField, v0: f64, radius: f64, x: f64, y: f64) -> Result<SosField> {
        SosField::with_sampling(field, v0, radius, x, y, DEFAULT_ANGLES, DEFAULT_RAY_SAMPLES)
    }

    pub fn with_sampling(
        field: &BicubicField,
        v0: f64,
        radius: f64,
        x: f64,
        y: f64,
        angles: usize,
        samples: usize,
    ) -> Result<SosField> {
        check_speeds(&[v0])?;
        ensure_input!(samples >= 2, "need at least 2 samples per ray, got {}", samples);
        let (r, phi) = to_polar(x, y);
        if r >= radius {
            return Err(PactError::InvalidInput(format!(
                "point ({}, {}) lies outside the integration radius {}",
                x, y, radius
            )));
        }

        let delays = PeriodicSpline::knots(angles)
            .par_iter()
            .map(|&theta| {
                let length = chord_from_inside(radius, r, phi, theta);
                let (dir_x, dir_y) = (-theta.sin(), -theta.cos());
                let step = length / (samples - 1) as f64;

                // Trapezoidal rule over evenly spaced samples.
                let mut total = 0.0;
                let mut prev = None;
                for j in 0..samples {
                    let s = j as f64 * step;
                    let value = mismatch(v0, field.evaluate(x + s * dir_x, y + s * dir_y));
                    if let Some(prev) = prev {
                        total += 0.5 * (prev + value) * step;
                    }
                    prev = Some(value);
                }
                total
            })
            .collect::<Vec<_>>();

        Ok(SosField {
            spline: PeriodicSpline::new(delays)?,
        })
    }
}

impl Wavefront for SosField {
    fn excess_delay(&self, thetas: &[f64]) -> Vec<f64> {
        thetas.iter().map(|t| self.spline.evaluate(*t)).collect()
    }
}

////////////////////////////////////////////////////////////////////////
// C0 over a grid
//

// Evaluate model(x, y).c0() at every grid point. Rows are computed in
// parallel; each pixel is independent.
pub fn c0_field<W, F>(grid: &Grid, model: F) -> Result<Image>
where
    W: Wavefront,
    F: Fn(f64, f64) -> Result<W> + Sync,
{
    let width = grid.width();
    let rows = (0..grid.height())
        .into_par_iter()
        .map(|t| {
            let y = grid.y(t);
            (0..width)
                .map(|s| model(grid.x(s), y).map(|m| m.c0()))
                .collect::<Result<Vec<f64>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    debug!("built {}x{} C0 field", width, grid.height());
    Ok(Image {
        width,
        height: grid.height(),
        data: rows.into_iter().flatten().collect(),
    })
}
