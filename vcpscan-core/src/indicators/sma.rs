//! Rolling mean over a `period`-bar window; NaN until the window fills.

/// Rolling mean of an arbitrary series. Windows containing NaN yield NaN.
pub fn sma_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period {
        return result;
    }

    for i in (period - 1)..n {
        let window = &values[i + 1 - period..=i];
        if window.iter().any(|v| v.is_nan()) {
            continue;
        }
        result[i] = window.iter().sum::<f64>() / period as f64;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, closes, make_candles, volumes, DEFAULT_EPSILON};

    #[test]
    fn sma_3_known_values() {
        let candles = make_candles(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let result = sma_of_series(&closes(&candles), 3);
        assert!(result[1].is_nan());
        assert_approx(result[2], 2.0, DEFAULT_EPSILON);
        assert_approx(result[4], 4.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_of_volumes() {
        let mut candles = make_candles(&[1.0, 2.0, 3.0, 4.0]);
        candles[3].volume = 3000.0;
        let result = sma_of_series(&volumes(&candles), 2);
        assert_approx(result[2], 1000.0, DEFAULT_EPSILON);
        assert_approx(result[3], 2000.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_nan_window_recovers() {
        let result = sma_of_series(&[1.0, f64::NAN, 3.0, 4.0, 5.0], 2);
        assert!(result[1].is_nan());
        assert!(result[2].is_nan());
        assert_approx(result[3], 3.5, DEFAULT_EPSILON);
    }
}
