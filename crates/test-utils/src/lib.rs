//! Shared test utilities for the urban-heat workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Synthetic grid and observation generators
//! - Source specs and a local backend builder for pipeline tests
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{assert_approx_eq, LocalFixture};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}

/// Asserts every pixel of a grid is defined and approximately `expected`.
///
/// ```ignore
/// assert_grid_all!(grid, 21.5, 1e-9);
/// ```
#[macro_export]
macro_rules! assert_grid_all {
    ($grid:expr, $expected:expr, $epsilon:expr) => {{
        for (index, value) in $grid.values().iter().enumerate() {
            match value {
                Some(v) => $crate::assert_approx_eq!(*v, $expected, $epsilon),
                None => panic!("pixel {} is masked, expected {:?}", index, $expected),
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assert_approx_eq_passes() {
        assert_approx_eq!(1.0001, 1.0, 0.001);
        assert_approx_eq!(0.0, 0.0, 0.0001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_fails() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }

    #[test]
    fn test_assert_grid_all_passes() {
        let grid = constant_grid(3, 2, 7.0);
        assert_grid_all!(grid, 7.0, 1e-12);
    }

    #[test]
    #[should_panic(expected = "is masked")]
    fn test_assert_grid_all_rejects_masked() {
        let grid = masked_grid(3, 2, 7.0, &[4]);
        assert_grid_all!(grid, 7.0, 1e-12);
    }
}
