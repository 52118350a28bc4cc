/// Stochastic oscillator (%K, %D) at the last bar.
///
/// Raw %K over `k_period` highs/lows, slowed by a `slowing`-wide mean, %D as
/// a `d_period`-wide mean of the slowed %K. Returns the neutral (50, 50)
/// when the series cannot fill the windows.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    d_period: usize,
    slowing: usize,
) -> (f64, f64) {
    let n = close.len();
    if k_period == 0 || d_period == 0 || slowing == 0 || n <= k_period {
        return (50.0, 50.0);
    }

    let raw_len = n - k_period + 1;
    if raw_len < slowing || raw_len - slowing + 1 < d_period {
        return (50.0, 50.0);
    }

    let mut raw_k = Vec::with_capacity(raw_len);
    for i in 0..raw_len {
        let window_high = high[i..i + k_period]
            .iter()
            .cloned()
            .fold(f64::MIN, f64::max);
        let window_low = low[i..i + k_period]
            .iter()
            .cloned()
            .fold(f64::MAX, f64::min);

        if window_high - window_low > 0.0 {
            raw_k.push((close[i + k_period - 1] - window_low) / (window_high - window_low) * 100.0);
        } else {
            raw_k.push(50.0);
        }
    }

    let slowed: Vec<f64> = raw_k
        .windows(slowing)
        .map(|w| w.iter().sum::<f64>() / slowing as f64)
        .collect();

    let d: Vec<f64> = slowed
        .windows(d_period)
        .map(|w| w.iter().sum::<f64>() / d_period as f64)
        .collect();

    let k_value = *slowed.last().unwrap_or(&50.0);
    let d_value = *d.last().unwrap_or(&50.0);
    (k_value, d_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_when_too_short() {
        assert_eq!(stochastic(&[1.0], &[0.5], &[0.8], 2, 2, 2), (50.0, 50.0));
    }

    #[test]
    fn close_at_window_high_reads_100() {
        // Closes sit exactly on the highs of their windows.
        let high = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let low = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let close = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let (k, d) = stochastic(&high, &low, &close, 2, 2, 2);
        assert!((k - 100.0).abs() < 1e-9);
        assert!((d - 100.0).abs() < 1e-9);
    }

    #[test]
    fn flat_window_is_neutral() {
        let flat = [3.0; 8];
        let (k, d) = stochastic(&flat, &flat, &flat, 2, 2, 2);
        assert_eq!(k, 50.0);
        assert_eq!(d, 50.0);
    }
}
