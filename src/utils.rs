//! Utility functions for the sensortag-ble crate.

/// Convert Celsius to Fahrenheit.
///
/// # Example
///
/// ```
/// use sensortag_ble::celsius_to_fahrenheit;
///
/// let fahrenheit = celsius_to_fahrenheit(25.0);
/// assert!((fahrenheit - 77.0).abs() < 0.001);
/// ```
#[inline]
pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_celsius_to_fahrenheit() {
        assert!((celsius_to_fahrenheit(0.0) - 32.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(100.0) - 212.0).abs() < 0.001);
        assert!((celsius_to_fahrenheit(-40.0) - (-40.0)).abs() < 0.001);
        assert!((celsius_to_fahrenheit(24.56) - 76.208).abs() < 0.001);
    }
}
