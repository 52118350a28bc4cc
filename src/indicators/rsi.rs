/// Relative Strength Index over the trailing `period` price changes.
///
/// Gains and losses are summed over the last `period` changes (no Wilder
/// smoothing). Returns the neutral 50.0 when the series is too short and
/// 100.0 when the window contains no losses.
pub fn rsi(close: &[f64], period: usize) -> f64 {
    if period == 0 || close.len() <= period {
        return 50.0;
    }

    let changes: Vec<f64> = close.windows(2).map(|w| w[1] - w[0]).collect();

    let mut sum_gain = 0.0;
    let mut sum_loss = 0.0;
    for &change in &changes[changes.len() - period..] {
        if change > 0.0 {
            sum_gain += change;
        } else {
            sum_loss -= change;
        }
    }

    if sum_loss == 0.0 {
        return 100.0;
    }

    let rs = sum_gain / sum_loss;
    100.0 - (100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_when_too_short() {
        assert_eq!(rsi(&[1.0, 2.0], 2), 50.0);
    }

    #[test]
    fn all_gains_saturate_at_100() {
        assert_eq!(rsi(&[1.0, 2.0, 3.0, 4.0], 2), 100.0);
    }

    #[test]
    fn all_losses_pin_at_zero() {
        let value = rsi(&[4.0, 3.0, 2.0, 1.0], 2);
        assert!(value.abs() < 1e-12);
    }

    #[test]
    fn balanced_window_is_50() {
        // Last two changes: +1 then -1.
        let value = rsi(&[2.0, 1.0, 2.0, 1.0], 2);
        assert!((value - 50.0).abs() < 1e-9);
    }
}
