use super::ema::ema;

/// MACD line, signal line and histogram at the last bar.
///
/// The MACD line is fast EMA minus slow EMA over the full series; the signal
/// line is an EMA of that difference series. Returns zeros when the series
/// is not longer than the slow period.
pub fn macd(close: &[f64], fast: usize, slow: usize, signal: usize) -> (f64, f64, f64) {
    if close.len() <= slow {
        return (0.0, 0.0, 0.0);
    }

    let fast_ema = ema(close, fast);
    let slow_ema = ema(close, slow);

    let macd_line: Vec<f64> = fast_ema
        .iter()
        .zip(&slow_ema)
        .map(|(f, s)| f - s)
        .collect();

    let signal_line = ema(&macd_line, signal);

    let macd_value = *macd_line.last().unwrap_or(&0.0);
    let signal_value = *signal_line.last().unwrap_or(&0.0);
    (macd_value, signal_value, macd_value - signal_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_when_too_short() {
        assert_eq!(macd(&[1.0, 2.0, 3.0], 2, 4, 2), (0.0, 0.0, 0.0));
    }

    #[test]
    fn rising_series_has_positive_macd() {
        let close: Vec<f64> = (1..=30).map(|i| i as f64).collect();
        let (m, s, h) = macd(&close, 2, 4, 2);
        assert!(m > 0.0, "macd = {m}");
        assert!(s > 0.0, "signal = {s}");
        assert!((h - (m - s)).abs() < 1e-12);
    }

    #[test]
    fn histogram_is_macd_minus_signal() {
        let close: Vec<f64> = (0..20).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let (m, s, h) = macd(&close, 2, 4, 2);
        assert!((h - (m - s)).abs() < 1e-12);
    }
}
