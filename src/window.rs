//
// Gaussian window
//
// Square Gaussian kernel, used to smooth the C0 field before it drives
// the attention weights.
//

use itertools::iproduct;

use crate::pact_image::Image;
use crate::pact_error::Result;

// size x size Gaussian centred on the middle of the square, scaled so
// its mean is 1.
pub fn get_gaussian_window(sigma: f64, size: usize) -> Result<Image> {
    ensure_input!(sigma > 0.0, "window sigma must be positive, got {}", sigma);
    ensure_input!(size > 0, "window size must be positive");

    let c = (size - 1) as f64 / 2.0;
    let window = Image::from_fn(size, size, |x, y| {
        let (dx, dy) = (x as f64 - c, y as f64 - c);
        (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    });
    let mean = window.mean();
    Ok(window.scale_values(1.0 / mean))
}

// Convolve with the kernel, dividing by the kernel weight that fell
// inside the image. Constant images stay constant, edges included.
pub fn smooth(image: &Image, kernel: &Image) -> Image {
    let (cx, cy) = (kernel.width as isize / 2, kernel.height as isize / 2);
    Image::from_fn(image.width, image.height, |x, y| {
        let mut total = 0.0;
        let mut weight = 0.0;
        for (ky, kx) in iproduct!(0..kernel.height, 0..kernel.width) {
            let sx = x as isize + kx as isize - cx;
            let sy = y as isize + ky as isize - cy;
            if sx < 0 || sy < 0 || sx >= image.width as isize || sy >= image.height as isize {
                continue;
            }
            let k = kernel[(kx, ky)];
            total += k * image[(sx as usize, sy as usize)];
            weight += k;
        }
        if weight > 0.0 {
            total / weight
        } else {
            image[(x, y)]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_window_mean_one() {
        for &(sigma, size) in &[(1.0, 5), (2.5, 8), (0.3, 3), (10.0, 1)] {
            let window = get_gaussian_window(sigma, size).unwrap();
            assert_eq!((window.width, window.height), (size, size));
            assert_abs_diff_eq!(window.mean(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_window_symmetric() {
        let window = get_gaussian_window(1.5, 6).unwrap();
        for (x, y) in iproduct!(0..6, 0..6) {
            assert_abs_diff_eq!(window[(x, y)], window[(5 - x, y)], epsilon = 1e-15);
            assert_abs_diff_eq!(window[(x, y)], window[(x, 5 - y)], epsilon = 1e-15);
            assert_abs_diff_eq!(window[(x, y)], window[(y, x)], epsilon = 1e-15);
        }
    }

    #[test]
    fn test_window_peak_centre() {
        let window = get_gaussian_window(1.0, 7).unwrap();
        let (x, y, _) = window.argmax();
        assert_eq!((x, y), (3, 3));
        assert_abs_diff_eq!(window[(4, 3)] / window[(3, 3)], (-0.5f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_window_rejects_bad_input() {
        assert!(get_gaussian_window(0.0, 5).is_err());
        assert!(get_gaussian_window(-1.0, 5).is_err());
        assert!(get_gaussian_window(1.0, 0).is_err());
    }

    #[test]
    fn test_smooth_keeps_constant() {
        let image = Image::from_fn(6, 4, |_, _| 0.7);
        let smoothed = smooth(&image, &get_gaussian_window(1.0, 5).unwrap());
        for v in smoothed.data.iter() {
            assert_abs_diff_eq!(*v, 0.7, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_smooth_spreads_spike() {
        let mut image = Image::zeros(9, 9);
        image[(4, 4)] = 1.0;
        let smoothed = smooth(&image, &get_gaussian_window(1.0, 3).unwrap());
        assert!(smoothed[(4, 4)] < 1.0);
        assert!(smoothed[(3, 4)] > 0.0);
        assert_eq!(smoothed[(3, 4)], smoothed[(5, 4)]);
        assert_eq!(smoothed[(0, 0)], 0.0);
        assert_abs_diff_eq!(smoothed.data.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }
}
