//! Swing high extraction.
//!
//! A swing high at `i` is strictly above the `width` highs before it and at least
//! as high as the `width` highs after it, so a flat top yields one swing (its
//! first bar). Points without `width` bars on both sides are never swings.

use crate::domain::Candle;

pub fn swing_highs(candles: &[Candle], width: usize) -> Vec<usize> {
    let n = candles.len();
    if width == 0 || n < 2 * width + 1 {
        return Vec::new();
    }
    (width..n - width)
        .filter(|&i| {
            let h = candles[i].high;
            let left = candles[i - width..i].iter().all(|c| h > c.high);
            let right = candles[i + 1..=i + width].iter().all(|c| c.high <= h);
            left && right
        })
        .collect()
}
