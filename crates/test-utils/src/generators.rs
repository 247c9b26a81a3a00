//! Test data generators for synthetic surface-temperature data.
//!
//! Every grid covers the global extent, matching [`crate::LocalFixture`].

use chrono::NaiveDate;
use raster_graph::Grid;
use thermal_common::{days_in_month, BoundingBox};

fn grid(width: usize, height: usize, values: Vec<Option<f64>>) -> Grid {
    Grid::new(width, height, BoundingBox::global(), values).expect("generated grid shape")
}

/// Creates a grid with every pixel set to `value`.
///
/// # Example
///
/// ```
/// use test_utils::constant_grid;
///
/// let grid = constant_grid(4, 2, 12.5);
/// assert_eq!(grid.values().len(), 8);
/// assert!(grid.is_complete());
/// ```
pub fn constant_grid(width: usize, height: usize, value: f64) -> Grid {
    grid(width, height, vec![Some(value); width * height])
}

/// Creates a constant grid with the given row-major pixel indices masked.
///
/// Used to emulate cloud gaps in the primary source.
pub fn masked_grid(width: usize, height: usize, value: f64, masked: &[usize]) -> Grid {
    let values = (0..width * height)
        .map(|index| {
            if masked.contains(&index) {
                None
            } else {
                Some(value)
            }
        })
        .collect();
    grid(width, height, values)
}

/// Creates a grid with temperature-like values in Kelvin.
///
/// Values run from 250K at the top-left pixel towards 310K at the
/// bottom-right, like a smooth daytime gradient.
pub fn kelvin_gradient_grid(width: usize, height: usize) -> Grid {
    let mut values = Vec::with_capacity(width * height);
    for row in 0..height {
        for col in 0..width {
            let x_factor = col as f64 / width.max(1) as f64;
            let y_factor = row as f64 / height.max(1) as f64;
            values.push(Some(250.0 + x_factor * 30.0 + y_factor * 30.0));
        }
    }
    grid(width, height, values)
}

/// Every calendar day of `year`-`month`.
///
/// ```
/// use test_utils::days_of_month;
///
/// assert_eq!(days_of_month(2024, 2).len(), 29);
/// assert_eq!(days_of_month(2023, 2).len(), 28);
/// ```
pub fn days_of_month(year: i32, month: u32) -> Vec<NaiveDate> {
    let days = days_in_month(year, month).expect("valid month");
    (1..=days)
        .filter_map(|day| NaiveDate::from_ymd_opt(year, month, day))
        .collect()
}

/// A fixed date, panicking on an invalid one.
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_grid() {
        let grid = masked_grid(2, 2, 3.0, &[1, 2]);
        assert_eq!(grid.values(), &[Some(3.0), None, None, Some(3.0)]);
        assert_eq!(grid.masked_count(), 2);
    }

    #[test]
    fn test_kelvin_gradient_range() {
        let grid = kelvin_gradient_grid(10, 10);
        let values: Vec<f64> = grid.values().iter().flatten().copied().collect();
        assert_eq!(values.len(), 100);
        assert_eq!(values[0], 250.0);
        assert!(values.iter().all(|v| (250.0..310.0).contains(v)));
    }

    #[test]
    fn test_days_of_month_bounds() {
        let days = days_of_month(2023, 12);
        assert_eq!(days.first(), Some(&date(2023, 12, 1)));
        assert_eq!(days.last(), Some(&date(2023, 12, 31)));
    }
}
