/// Bollinger bands (upper, middle, lower) at the last bar.
///
/// Middle band is the simple mean of the trailing `period` closes; the band
/// width is `deviations` population standard deviations. Collapses to the
/// last close when the series is too short.
pub fn bollinger(close: &[f64], period: usize, deviations: f64) -> (f64, f64, f64) {
    let last = *close.last().unwrap_or(&0.0);
    if period == 0 || close.len() <= period {
        return (last, last, last);
    }

    let window = &close[close.len() - period..];
    let sma = window.iter().sum::<f64>() / period as f64;

    let variance = window
        .iter()
        .map(|c| {
            let d = c - sma;
            d * d
        })
        .sum::<f64>()
        / period as f64;
    let stddev = variance.sqrt();

    (sma + stddev * deviations, sma, sma - stddev * deviations)
}
