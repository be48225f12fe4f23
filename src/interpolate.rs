//
// Interpolation
//
// Two interpolants are needed by the heterogeneous wavefront model: a
// smooth 2-D surface through a speed-of-sound map sampled on a regular
// grid, and a periodic curve through excess delays sampled at evenly
// spaced look angles.
//

use nalgebra::base::{DMatrix, DVector};
use std::f64::consts::PI;

use crate::geometry::Grid;
use crate::pact_image::Image;
use crate::pact_error::{PactError, Result};

////////////////////////////////////////////////////////////////////////
// 2-D field
//
// Bicubic convolution with Catmull-Rom weights. It interpolates the
// samples, reproduces linear fields exactly away from the edges, and
// is C1: the slope at each sample is the central difference of its
// neighbours, shared by the cells either side.
//
// Queries outside the sampled rectangle are clamped to its edge, and
// indices past the edge repeat the edge sample.
//

#[derive(Clone, Debug)]
pub struct BicubicField {
    x0: f64,
    y0: f64,
    dx: f64,
    dy: f64,
    values: Image,
}

// Catmull-Rom weights for the samples at -1, 0, 1, 2, at fraction u
// between samples 0 and 1.
fn catmull_rom_weights(u: f64) -> [f64; 4] {
    let u2 = u * u;
    let u3 = u2 * u;
    [
        0.5 * (-u3 + 2.0 * u2 - u),
        0.5 * (3.0 * u3 - 5.0 * u2 + 2.0),
        0.5 * (-3.0 * u3 + 4.0 * u2 + u),
        0.5 * (u3 - u2),
    ]
}

// Split a coordinate into (cell index, fraction) along an axis with n
// samples starting at v0 with spacing step.
fn locate(v: f64, v0: f64, step: f64, n: usize) -> (usize, f64) {
    let pos = ((v - v0) / step).max(0.0).min((n - 1) as f64);
    let cell = (pos.floor() as usize).min(n - 2);
    (cell, pos - cell as f64)
}

impl BicubicField {
    // values[(s, t)] is the sample at (grid.x(s), grid.y(t)).
    pub fn new(grid: &Grid, values: Image) -> Result<BicubicField> {
        if values.width != grid.width() || values.height != grid.height() {
            return Err(PactError::ShapeMismatch {
                what: "sampled field",
                expected: format!("{}x{}", grid.width(), grid.height()),
                actual: format!("{}x{}", values.width, values.height),
            });
        }
        ensure_input!(
            grid.width() >= 2 && grid.height() >= 2,
            "field needs at least 2x2 samples, got {}x{}",
            grid.width(),
            grid.height()
        );
        Ok(BicubicField {
            x0: grid.x(0),
            y0: grid.y(0),
            dx: grid.x(1) - grid.x(0),
            dy: grid.y(1) - grid.y(0),
            values,
        })
    }

    pub fn values(&self) -> &Image {
        &self.values
    }

    fn sample(&self, s: isize, t: isize) -> f64 {
        let s = s.max(0).min(self.values.width as isize - 1) as usize;
        let t = t.max(0).min(self.values.height as isize - 1) as usize;
        self.values[(s, t)]
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let (s, u) = locate(x, self.x0, self.dx, self.values.width);
        let (t, v) = locate(y, self.y0, self.dy, self.values.height);
        let wx = catmull_rom_weights(u);
        let wy = catmull_rom_weights(v);

        let mut total = 0.0;
        for (j, wy_j) in wy.iter().enumerate() {
            let row = t as isize + j as isize - 1;
            let mut row_total = 0.0;
            for (i, wx_i) in wx.iter().enumerate() {
                row_total += wx_i * self.sample(s as isize + i as isize - 1, row);
            }
            total += wy_j * row_total;
        }
        total
    }
}

////////////////////////////////////////////////////////////////////////
// Periodic cubic spline
//
// Knots at theta_i = 2 pi i / n. The second derivatives M_i satisfy the
// cyclic system
//
//   M_{i-1} + 4 M_i + M_{i+1} = 6 (y_{i+1} - 2 y_i + y_{i-1}) / h^2
//
// which is strictly diagonally dominant, so LU never fails for n >= 3.
//

#[derive(Clone, Debug)]
pub struct PeriodicSpline {
    step: f64,
    values: Vec<f64>,
    second_derivs: Vec<f64>,
}

impl PeriodicSpline {
    pub fn new(values: Vec<f64>) -> Result<PeriodicSpline> {
        let n = values.len();
        ensure_input!(n >= 3, "periodic spline needs at least 3 knots, got {}", n);
        let step = 2.0 * PI / n as f64;

        let mut system = DMatrix::from_element(n, n, 0.0f64);
        let mut rhs = DVector::from_element(n, 0.0f64);
        for i in 0..n {
            let prev = (i + n - 1) % n;
            let next = (i + 1) % n;
            system[(i, prev)] += 1.0;
            system[(i, i)] += 4.0;
            system[(i, next)] += 1.0;
            rhs[i] = 6.0 * (values[next] - 2.0 * values[i] + values[prev]) / (step * step);
        }

        let second_derivs = system
            .lu()
            .solve(&rhs)
            .ok_or_else(|| PactError::InvalidInput("periodic spline system is singular".to_string()))?;

        Ok(PeriodicSpline {
            step,
            values,
            second_derivs: second_derivs.iter().copied().collect(),
        })
    }

    // Knot angles for n evenly spaced samples over one period.
    pub fn knots(n: usize) -> Vec<f64> {
        let step = 2.0 * PI / n as f64;
        (0..n).map(|i| i as f64 * step).collect()
    }

    pub fn evaluate(&self, theta: f64) -> f64 {
        let n = self.values.len();
        let t = theta.rem_euclid(2.0 * PI);
        let i = ((t / self.step).floor() as usize).min(n - 1);
        let j = (i + 1) % n;
        let u = t / self.step - i as f64;

        let h2 = self.step * self.step;
        let (mi, mj) = (self.second_derivs[i], self.second_derivs[j]);
        let a = 1.0 - u;
        mi * a * a * a * h2 / 6.0
            + mj * u * u * u * h2 / 6.0
            + (self.values[i] - mi * h2 / 6.0) * a
            + (self.values[j] - mj * h2 / 6.0) * u
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn field_from<F: Fn(f64, f64) -> f64>(grid: &Grid, f: F) -> BicubicField {
        let values = Image::from_fn(grid.width(), grid.height(), |s, t| f(grid.x(s), grid.y(t)));
        BicubicField::new(grid, values).unwrap()
    }

    #[test]
    fn test_weights_partition_unity() {
        for u in [0.0, 0.1, 0.5, 0.77, 1.0] {
            let sum: f64 = catmull_rom_weights(u).iter().sum();
            assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-15);
        }
        assert_eq!(catmull_rom_weights(0.0), [0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_field_interpolates_samples() {
        let grid = Grid::centred(7, 5, 1.0).unwrap();
        let field = field_from(&grid, |x, y| (3.0 * x).sin() + y * y);
        for t in 0..grid.height() {
            for s in 0..grid.width() {
                assert_abs_diff_eq!(
                    field.evaluate(grid.x(s), grid.y(t)),
                    field.values()[(s, t)],
                    epsilon = 1e-12
                );
            }
        }
    }

    #[test]
    fn test_field_reproduces_linear_interior() {
        let grid = Grid::centred(9, 9, 1.0).unwrap();
        let field = field_from(&grid, |x, y| 2.0 * x - 3.0 * y + 0.5);
        // Stay at least one cell in from the edge.
        for &(x, y) in &[(0.1, 0.2), (-0.6, 0.33), (0.7, -0.7), (0.0, 0.0)] {
            assert_abs_diff_eq!(field.evaluate(x, y), 2.0 * x - 3.0 * y + 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_field_constant_everywhere() {
        let grid = Grid::centred(4, 6, 0.02).unwrap();
        let field = field_from(&grid, |_, _| 1540.0);
        for &(x, y) in &[(0.0, 0.0), (0.019, -0.02), (0.5, 0.5), (-1.0, 0.01)] {
            assert_abs_diff_eq!(field.evaluate(x, y), 1540.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_field_continuous_across_cells() {
        let grid = Grid::centred(6, 6, 1.0).unwrap();
        let field = field_from(&grid, |x, y| (2.0 * x).cos() * (1.0 + y));
        // Approach an interior sample line from both sides.
        let x_line = grid.x(2);
        let eps = 1e-9;
        for &y in &[-0.7, 0.1, 0.45] {
            let left = field.evaluate(x_line - eps, y);
            let right = field.evaluate(x_line + eps, y);
            assert_abs_diff_eq!(left, right, epsilon = 1e-7);

            // Slopes match too.
            let d = 1e-5;
            let slope_left = (field.evaluate(x_line, y) - field.evaluate(x_line - d, y)) / d;
            let slope_right = (field.evaluate(x_line + d, y) - field.evaluate(x_line, y)) / d;
            assert_abs_diff_eq!(slope_left, slope_right, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_field_shape_mismatch() {
        let grid = Grid::centred(4, 4, 1.0).unwrap();
        assert!(BicubicField::new(&grid, Image::zeros(4, 5)).is_err());
    }

    #[test]
    fn test_spline_interpolates_knots() {
        let values = vec![1.0, 3.0, -2.0, 0.5, 4.0];
        let spline = PeriodicSpline::new(values.clone()).unwrap();
        for (theta, v) in PeriodicSpline::knots(5).iter().zip(values.iter()) {
            assert_abs_diff_eq!(spline.evaluate(*theta), *v, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_spline_periodic() {
        let spline = PeriodicSpline::new(vec![1.0, 3.0, -2.0, 0.5]).unwrap();
        for &theta in &[0.3, 1.9, 4.0, 6.1] {
            let v = spline.evaluate(theta);
            assert_abs_diff_eq!(spline.evaluate(theta + 2.0 * PI), v, epsilon = 1e-12);
            assert_abs_diff_eq!(spline.evaluate(theta - 4.0 * PI), v, epsilon = 1e-12);
        }
        // Continuous across the wrap point.
        assert_abs_diff_eq!(spline.evaluate(2.0 * PI - 1e-10), spline.evaluate(0.0), epsilon = 1e-8);
    }

    #[test]
    fn test_spline_smooth_curve() {
        let n = 32;
        let knots = PeriodicSpline::knots(n);
        let spline = PeriodicSpline::new(knots.iter().map(|t| t.sin() + 0.5 * (2.0 * t).cos()).collect()).unwrap();
        for i in 0..100 {
            let theta = i as f64 * 0.0731;
            let expected = theta.sin() + 0.5 * (2.0 * theta).cos();
            assert_abs_diff_eq!(spline.evaluate(theta), expected, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_spline_too_few_knots() {
        assert!(PeriodicSpline::new(vec![1.0, 2.0]).is_err());
    }
}
