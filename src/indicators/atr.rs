/// Average True Range: simple mean of the trailing `period` true ranges.
///
/// TR[i] = max(high-low, |high-prev_close|, |low-prev_close|). Returns 0.0
/// when fewer than `period + 1` bars are available.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> f64 {
    let n = close.len();
    if period == 0 || n <= period || high.len() != n || low.len() != n {
        return 0.0;
    }

    let mut tr = Vec::with_capacity(n - 1);
    for i in 1..n {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        tr.push(hl.max(hc).max(lc));
    }

    if tr.len() < period {
        return 0.0;
    }

    tr[tr.len() - period..].iter().sum::<f64>() / period as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_when_too_short() {
        assert_eq!(atr(&[1.0, 2.0], &[0.5, 1.5], &[0.8, 1.8], 3), 0.0);
    }

    #[test]
    fn mean_of_trailing_true_ranges() {
        // TRs: bar1 max(8, 6, 2) = 8, bar2 max(9, 1, 8) = 9.
        let high = [105.0, 108.0, 107.0];
        let low = [95.0, 100.0, 98.0];
        let close = [102.0, 106.0, 99.0];
        let value = atr(&high, &low, &close, 2);
        assert!((value - 8.5).abs() < 1e-12);
    }

    #[test]
    fn gap_counts_against_previous_close() {
        // Gap up: TR = |115 - 100| = 15, not high-low = 7.
        let high = [102.0, 115.0];
        let low = [97.0, 108.0];
        let close = [100.0, 112.0];
        let value = atr(&high, &low, &close, 1);
        assert!((value - 15.0).abs() < 1e-12);
    }
}
