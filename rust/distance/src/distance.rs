//! Squared Euclidean kernels.
//!
//! Every distance in docsim is a squared L2 distance. Rankings never need the
//! square root, so none of these functions take it.

use simsimd::SpatialSimilarity;

pub fn squared_euclidean_scalar(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0;
    for i in 0..a.len() {
        sum += (a[i] - b[i]).powi(2);
    }
    sum
}

/// Squared L2 distance between two equal-length slices.
///
/// Dispatches to simsimd and falls back to the scalar loop when simsimd
/// declines the input (mismatched lengths are the caller's bug).
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    match f32::sqeuclidean(a, b) {
        Some(distance) => distance as f32,
        None => squared_euclidean_scalar(a, b),
    }
}

/// `a - b`, component-wise.
pub fn subtract(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| x - y).collect()
}

/// `a + b`, component-wise.
pub fn add(a: &[f32], b: &[f32]) -> Vec<f32> {
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_squared_euclidean_known_values() {
        assert_eq!(squared_euclidean_scalar(&[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert!((squared_euclidean(&[0.0, 0.0], &[3.0, 4.0]) - 25.0).abs() < 1e-5);
        assert_eq!(squared_euclidean(&[], &[]), 0.0);
    }

    #[test]
    fn test_residual_round_trip() {
        let vector = [1.5_f32, -2.0, 3.25];
        let centroid = [0.5_f32, 1.0, -1.0];
        let residual = subtract(&vector, &centroid);
        assert_eq!(residual, vec![1.0, -3.0, 4.25]);
        assert_eq!(add(&centroid, &residual), vector.to_vec());
    }

    proptest! {
        #[test]
        fn test_simd_matches_scalar(
            pairs in proptest::collection::vec((-100.0f32..100.0, -100.0f32..100.0), 0..64)
        ) {
            let (a, b): (Vec<f32>, Vec<f32>) = pairs.into_iter().unzip();
            let fast = squared_euclidean(&a, &b);
            let slow = squared_euclidean_scalar(&a, &b);
            prop_assert!((fast - slow).abs() <= 1e-3 * slow.max(1.0));
        }
    }
}
