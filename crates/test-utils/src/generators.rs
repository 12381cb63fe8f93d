//! Test data generators for creating synthetic surface-like data.
//!
//! These generators create predictable, verifiable data patterns that can
//! be used across the test suite.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Creates a test buffer with predictable values.
///
/// Each cell value is calculated as `col * 1000 + row`, which makes it easy
/// to verify that data is being read and written correctly.
///
/// # Arguments
///
/// * `width` - Number of columns
/// * `height` - Number of rows
///
/// # Returns
///
/// A `Vec<f64>` in row-major order (row 0 first, then row 1, etc.)
pub fn create_test_buffer(width: usize, height: usize) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            data.push((col * 1000 + row) as f64);
        }
    }
    data
}

/// Creates a planar surface `a + bx * xi + by * eta` in normalised
/// coordinates `xi = 2 col / (width - 1) - 1`, `eta = 2 row / (height - 1) - 1`.
pub fn create_plane_buffer(width: usize, height: usize, a: f64, bx: f64, by: f64) -> Vec<f64> {
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let xi = if width > 1 {
                2.0 * col as f64 / (width - 1) as f64 - 1.0
            } else {
                0.0
            };
            let eta = if height > 1 {
                2.0 * row as f64 / (height - 1) as f64 - 1.0
            } else {
                0.0
            };
            data.push(a + bx * xi + by * eta);
        }
    }
    data
}

/// Creates a Gaussian bump centred in the buffer.
///
/// Values range from near 0 at the edges to `amplitude` at the centre,
/// a pattern similar to a real surface protrusion.
pub fn create_bump_buffer(width: usize, height: usize, amplitude: f64) -> Vec<f64> {
    let cx = (width as f64 - 1.0) / 2.0;
    let cy = (height as f64 - 1.0) / 2.0;
    let sx = width as f64 / 4.0;
    let sy = height as f64 / 4.0;
    let mut data = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let dx = (col as f64 - cx) / sx;
            let dy = (row as f64 - cy) / sy;
            data.push(amplitude * (-0.5 * (dx * dx + dy * dy)).exp());
        }
    }
    data
}

/// Creates uniformly random values in `[-1, 1)` from a fixed seed, so test
/// runs are reproducible.
pub fn create_noise_buffer(width: usize, height: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..width * height)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect()
}

/// Creates a reproducible random bit pattern with the given fill fraction.
///
/// Returns one `bool` per pixel in row-major order.
pub fn create_random_bits(width: usize, height: usize, fill: f64, seed: u64) -> Vec<bool> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..width * height).map(|_| rng.gen_bool(fill)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_buffer() {
        let data = create_test_buffer(10, 5);
        assert_eq!(data.len(), 50);
        assert_eq!(data[0], 0.0);
        assert_eq!(data[1], 1000.0);
        assert_eq!(data[10], 1.0);
    }

    #[test]
    fn test_plane_corners() {
        let data = create_plane_buffer(4, 4, 1.5, 1.5, 0.0);
        assert!((data[0] - 0.0).abs() < 1e-12);
        assert!((data[3] - 3.0).abs() < 1e-12);
        assert!((data[12] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn test_bump_peak_at_centre() {
        let data = create_bump_buffer(9, 9, 2.0);
        let centre = data[4 * 9 + 4];
        assert!((centre - 2.0).abs() < 1e-12);
        assert!(data[0] < centre);
    }

    #[test]
    fn test_noise_reproducible() {
        assert_eq!(create_noise_buffer(8, 8, 42), create_noise_buffer(8, 8, 42));
        assert_ne!(create_noise_buffer(8, 8, 42), create_noise_buffer(8, 8, 43));
    }

    #[test]
    fn test_random_bits_fraction() {
        let bits = create_random_bits(100, 100, 0.3, 7);
        let set = bits.iter().filter(|&&b| b).count();
        assert!(set > 2000 && set < 4000);
    }
}
