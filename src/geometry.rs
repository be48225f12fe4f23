///
// Geometry
//
// Ring array layout, the Cartesian reconstruction grid, and the small
// calibration grid the wavefront model is usually evaluated on.
//
// The origin is the centre of the ring. Polar angles are measured from
// the +y axis towards +x, i.e. phi = atan2(x, y), which is the
// convention the transducer angles use too.
//

use std::f64::consts::PI;

use crate::pact_error::Result;
use crate::pact_image::Image;

// Relative tolerance used when checking grid vectors are uniformly spaced.
const SPACING_TOLERANCE: f64 = 1e-6;

// n evenly spaced values from a to b inclusive. The last value is
// exactly b, and n == 1 gives [a].
pub fn linspace(a: f64, b: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![a],
        _ => {
            let step_count = (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { b } else { a + (b - a) * (i as f64 / step_count) })
                .collect()
        }
    }
}

pub fn to_polar(x: f64, y: f64) -> (f64, f64) {
    ((x * x + y * y).sqrt(), x.atan2(y))
}

////////////////////////////////////////////////////////////////////////
// Ring array
//

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ring {
    pub radius: f64,
    pub transducers: usize,
}

impl Ring {
    pub fn new(radius: f64, transducers: usize) -> Result<Ring> {
        ensure_input!(radius > 0.0, "ring radius must be positive, got {}", radius);
        ensure_input!(transducers > 0, "ring must have at least one transducer");
        Ok(Ring {
            radius,
            transducers,
        })
    }

    // Transducers run counter-clockwise, the first one sitting one
    // angular step round from zero.
    pub fn angle(&self, k: usize) -> f64 {
        2.0 * PI / self.transducers as f64 * (k + 1) as f64
    }

    pub fn angles(&self) -> Vec<f64> {
        (0..self.transducers).map(|k| self.angle(k)).collect()
    }

    pub fn position(&self, k: usize) -> (f64, f64) {
        let angle = self.angle(k) - PI;
        (self.radius * angle.sin(), self.radius * angle.cos())
    }

    pub fn positions(&self) -> Vec<(f64, f64)> {
        (0..self.transducers).map(|k| self.position(k)).collect()
    }
}

////////////////////////////////////////////////////////////////////////
// Reconstruction grid
//

// Grid point (x_vec[s], y_vec[t]) is image pixel (column s, row t).
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    x_vec: Vec<f64>,
    y_vec: Vec<f64>,
}

fn check_axis(name: &str, values: &[f64]) -> Result<()> {
    ensure_input!(!values.is_empty(), "{} must not be empty", name);
    ensure_input!(
        values.iter().all(|v| v.is_finite()),
        "{} must only contain finite values",
        name
    );
    if values.len() < 2 {
        return Ok(());
    }
    let step = values[1] - values[0];
    ensure_input!(step > 0.0, "{} must be strictly increasing", name);
    for pair in values.windows(2) {
        let this_step = pair[1] - pair[0];
        ensure_input!(this_step > 0.0, "{} must be strictly increasing", name);
        ensure_input!(
            (this_step - step).abs() <= SPACING_TOLERANCE * step,
            "{} must be uniformly spaced",
            name
        );
    }
    Ok(())
}

impl Grid {
    pub fn new(x_vec: Vec<f64>, y_vec: Vec<f64>) -> Result<Grid> {
        check_axis("x_vec", &x_vec)?;
        check_axis("y_vec", &y_vec)?;
        Ok(Grid { x_vec, y_vec })
    }

    // A width x height grid covering (-half_extent..half_extent) on
    // both axes.
    pub fn centred(width: usize, height: usize, half_extent: f64) -> Result<Grid> {
        ensure_input!(half_extent > 0.0, "grid extent must be positive, got {}", half_extent);
        ensure_input!(width > 1 && height > 1, "grid must be at least 2x2");
        Grid::new(
            linspace(-half_extent, half_extent, width),
            linspace(-half_extent, half_extent, height),
        )
    }

    pub fn width(&self) -> usize {
        self.x_vec.len()
    }

    pub fn height(&self) -> usize {
        self.y_vec.len()
    }

    pub fn x(&self, s: usize) -> f64 {
        self.x_vec[s]
    }

    pub fn y(&self, t: usize) -> f64 {
        self.y_vec[t]
    }

    pub fn x_vec(&self) -> &[f64] {
        &self.x_vec
    }

    pub fn y_vec(&self) -> &[f64] {
        &self.y_vec
    }

    // Closest grid indices (s, t) to a physical point, clamped to the grid.
    pub fn nearest(&self, x: f64, y: f64) -> (usize, usize) {
        (nearest_index(&self.x_vec, x), nearest_index(&self.y_vec, y))
    }
}

fn nearest_index(values: &[f64], v: f64) -> usize {
    if values.len() < 2 {
        return 0;
    }
    let step = values[1] - values[0];
    let idx = ((v - values[0]) / step).round();
    idx.max(0.0).min((values.len() - 1) as f64) as usize
}

////////////////////////////////////////////////////////////////////////
// Calibration grid
//
// Maps integer (row, column) indices of a small square grid to physical
// coordinates. Index (half_extent, half_extent) is the ring centre, and
// neighbouring indices are pitch / divisor apart.
//

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationGrid {
    pub half_extent: usize,
    pub divisor: f64,
    pub pitch: f64,
}

impl CalibrationGrid {
    pub const DEFAULT_HALF_EXTENT: usize = 12;
    pub const DEFAULT_DIVISOR: f64 = 4.0;

    pub fn new(pitch: f64) -> CalibrationGrid {
        CalibrationGrid {
            half_extent: Self::DEFAULT_HALF_EXTENT,
            divisor: Self::DEFAULT_DIVISOR,
            pitch,
        }
    }

    pub fn size(&self) -> usize {
        2 * self.half_extent + 1
    }

    // Returns (x, y, r, phi). Row i grows downwards, so y falls with i.
    pub fn get_coordinates(&self, i: usize, j: usize) -> (f64, f64, f64, f64) {
        let half = self.half_extent as f64;
        let x = (j as f64 - half) * self.pitch / self.divisor;
        let y = (half - i as f64) * self.pitch / self.divisor;
        let (r, phi) = to_polar(x, y);
        (x, y, r, phi)
    }

    // Radius and homogeneous-model C0 at index (i, j), for a body of
    // the given radius and speed of sound v1 in background v0. C0 is
    // floored at zero, which only matters well outside the body.
    pub fn get_r_c0(&self, i: usize, j: usize, radius: f64, v0: f64, v1: f64) -> (f64, f64) {
        let (_, _, r, _) = self.get_coordinates(i, j);
        let c0 = (1.0 - v0 / v1) * radius * (1.0 - (r * r) / (4.0 * radius * radius));
        (r, c0.max(0.0))
    }

    // The same points as a reconstruction grid. Grid row t is
    // calibration row size - 1 - t, as grid rows run upwards.
    pub fn grid(&self) -> Result<Grid> {
        let n = self.size();
        let x_vec = (0..n).map(|j| self.get_coordinates(0, j).0).collect();
        let y_vec = (0..n).map(|t| self.get_coordinates(n - 1 - t, 0).1).collect();
        Grid::new(x_vec, y_vec)
    }

    // get_r_c0 over the whole grid, laid out to match grid().
    pub fn c0_image(&self, radius: f64, v0: f64, v1: f64) -> Image {
        let n = self.size();
        Image::from_fn(n, n, |s, t| self.get_r_c0(n - 1 - t, s, radius, v0, v1).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_linspace() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_eq!(linspace(3.0, 5.0, 1), vec![3.0]);
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(*linspace(-0.1, 0.3, 7).last().unwrap(), 0.3);
    }

    #[test]
    fn test_ring_positions() {
        let ring = Ring::new(2.0, 4).unwrap();
        // First transducer at angle pi/2, so it sits at (sin(-pi/2), cos(-pi/2)) * R.
        let expected = [(-2.0, 0.0), (0.0, 2.0), (2.0, 0.0), (0.0, -2.0)];
        for (k, &(ex, ey)) in expected.iter().enumerate() {
            let (x, y) = ring.position(k);
            assert_abs_diff_eq!(x, ex, epsilon = 1e-12);
            assert_abs_diff_eq!(y, ey, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_ring_position_matches_look_angle() {
        // The transducer at look angle theta sits at -R * (sin theta, cos theta).
        let ring = Ring::new(0.05, 64).unwrap();
        for k in 0..ring.transducers {
            let theta = ring.angle(k);
            let (x, y) = ring.position(k);
            assert_abs_diff_eq!(x, -0.05 * theta.sin(), epsilon = 1e-15);
            assert_abs_diff_eq!(y, -0.05 * theta.cos(), epsilon = 1e-15);
        }
    }

    #[test]
    fn test_ring_rejects_bad_input() {
        assert!(Ring::new(0.0, 8).is_err());
        assert!(Ring::new(1.0, 0).is_err());
    }

    #[test]
    fn test_grid_validation() {
        assert!(Grid::new(vec![0.0, 1.0, 2.0], vec![5.0]).is_ok());
        assert!(Grid::new(vec![], vec![0.0]).is_err());
        assert!(Grid::new(vec![0.0, 1.0, 0.5], vec![0.0]).is_err());
        assert!(Grid::new(vec![0.0, 1.0, 3.0], vec![0.0]).is_err());
        assert!(Grid::new(vec![2.0, 1.0, 0.0], vec![0.0]).is_err());
        assert!(Grid::new(vec![0.0], vec![0.0, f64::NAN]).is_err());
    }

    #[test]
    fn test_grid_centred() {
        let grid = Grid::centred(5, 3, 1.0).unwrap();
        assert_eq!(grid.x_vec(), &[-1.0, -0.5, 0.0, 0.5, 1.0]);
        assert_eq!(grid.y_vec(), &[-1.0, 0.0, 1.0]);
        assert_eq!(grid.nearest(0.3, -0.6), (3, 0));
        assert_eq!(grid.nearest(9.0, -9.0), (4, 0));
    }

    #[test]
    fn test_calibration_coordinates() {
        let cal = CalibrationGrid::new(4e-3);
        assert_eq!(cal.size(), 25);

        let (x, y, r, _) = cal.get_coordinates(12, 12);
        assert_eq!((x, y, r), (0.0, 0.0, 0.0));

        // One row up is +y, one column right is +x.
        let (x, y, r, phi) = cal.get_coordinates(11, 12);
        assert_abs_diff_eq!(x, 0.0);
        assert_abs_diff_eq!(y, 1e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(r, 1e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(phi, 0.0);

        let (x, _, _, phi) = cal.get_coordinates(12, 13);
        assert_abs_diff_eq!(x, 1e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(phi, PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_calibration_explicit_layout() {
        let cal = CalibrationGrid {
            half_extent: 2,
            divisor: 1.0,
            pitch: 0.5,
        };
        let (x, y, _, _) = cal.get_coordinates(0, 4);
        assert_eq!((x, y), (1.0, 1.0));
    }

    #[test]
    fn test_calibration_as_grid() {
        let cal = CalibrationGrid::new(4e-3);
        let grid = cal.grid().unwrap();
        assert_eq!((grid.width(), grid.height()), (25, 25));
        assert_abs_diff_eq!(grid.x(0), -12e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(grid.y(0), -12e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(grid.y(24), 12e-3, epsilon = 1e-15);

        // Image pixel (s, t) is calibration index (24 - t, s).
        let image = cal.c0_image(0.05, 1480.0, 1520.0);
        assert_eq!(image[(3, 20)], cal.get_r_c0(4, 3, 0.05, 1480.0, 1520.0).1);
        assert_eq!(image.argmax().0, 12);
        assert_eq!(image.argmax().1, 12);
    }

    #[test]
    fn test_r_c0() {
        let cal = CalibrationGrid::new(4e-3);
        let (radius, v0, v1) = (0.05, 1480.0, 1520.0);

        let (r, c0) = cal.get_r_c0(12, 12, radius, v0, v1);
        assert_eq!(r, 0.0);
        assert_abs_diff_eq!(c0, (1.0 - v0 / v1) * radius, epsilon = 1e-15);

        // C0 shrinks away from the centre.
        let (_, c0_off) = cal.get_r_c0(0, 0, radius, v0, v1);
        assert!(c0_off < c0);

        // Slower body gives a negative raw C0, which is floored.
        let (_, c0_slow) = cal.get_r_c0(12, 12, radius, v1, v0);
        assert_eq!(c0_slow, 0.0);
    }
}
