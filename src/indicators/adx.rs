/// Directional index over the trailing window.
///
/// Computes +DI/-DI from the last `period` directional movements against the
/// simple-mean ATR of the same window and returns the resulting DX. This is
/// the raw DX of the window, not a smoothed DX average. Returns 0.0 when the
/// series is too short or the window shows no directional movement.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> f64 {
    let n = close.len();
    if period == 0 || n <= period + 1 || high.len() != n || low.len() != n {
        return 0.0;
    }

    let mut tr = Vec::with_capacity(n - 1);
    let mut plus_dm = Vec::with_capacity(n - 1);
    let mut minus_dm = Vec::with_capacity(n - 1);

    for i in 1..n {
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        tr.push(hl.max(hc).max(lc));

        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];
        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    let atr: f64 = tr[tr.len() - period..].iter().sum::<f64>() / period as f64;
    if atr == 0.0 {
        return 0.0;
    }

    let plus_sum: f64 = plus_dm[plus_dm.len() - period..].iter().sum();
    let minus_sum: f64 = minus_dm[minus_dm.len() - period..].iter().sum();
    let plus_di = (plus_sum / atr) * 100.0 / period as f64;
    let minus_di = (minus_sum / atr) * 100.0 / period as f64;

    if plus_di + minus_di > 0.0 {
        ((plus_di - minus_di).abs() / (plus_di + minus_di)) * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_when_too_short() {
        assert_eq!(adx(&[1.0, 2.0], &[0.5, 1.5], &[0.8, 1.8], 2), 0.0);
    }

    #[test]
    fn one_sided_trend_maxes_out() {
        // Strictly rising highs and lows: all movement is +DM, so DX = 100.
        let high = [1.0, 2.0, 3.0, 4.0, 5.0];
        let low = [0.5, 1.5, 2.5, 3.5, 4.5];
        let close = [0.8, 1.8, 2.8, 3.8, 4.8];
        let value = adx(&high, &low, &close, 2);
        assert!((value - 100.0).abs() < 1e-9, "dx = {value}");
    }

    #[test]
    fn flat_market_has_no_direction() {
        let flat = [2.0; 6];
        assert_eq!(adx(&flat, &flat, &flat, 2), 0.0);
    }
}
