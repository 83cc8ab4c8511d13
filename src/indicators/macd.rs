// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
// MACD line = EMA(fast) - EMA(slow); signal line = EMA(MACD line, signal_period);
// histogram = MACD line - signal line. Built on top of the same EMA primitive
// used by the trend-alignment check in `ema.rs`.

use crate::indicators::ema::calculate_ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdResult {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the full MACD line, signal line and histogram series.
///
/// Returns `None` when there is not enough data to seed both EMAs and the
/// signal EMA (`slow_period + signal_period` closes, minimum).
pub fn calculate_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<Vec<MacdResult>> {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || fast_period >= slow_period {
        return None;
    }
    if closes.len() < slow_period + signal_period {
        return None;
    }

    let fast_ema = calculate_ema(closes, fast_period);
    let slow_ema = calculate_ema(closes, slow_period);

    // calculate_ema returns one value per input close once the period is
    // satisfied; align on the shorter (slow) series since it starts later.
    let offset = slow_ema.len().checked_sub(fast_ema.len())?;
    if fast_ema.len() < slow_ema.len() {
        return None;
    }

    let macd_line: Vec<f64> = slow_ema
        .iter()
        .enumerate()
        .map(|(i, slow)| fast_ema[i + offset] - slow)
        .collect();

    if macd_line.len() < signal_period {
        return None;
    }

    let signal_line = calculate_ema(&macd_line, signal_period);
    let sig_offset = macd_line.len().checked_sub(signal_line.len())?;

    let results: Vec<MacdResult> = signal_line
        .iter()
        .enumerate()
        .map(|(i, signal)| {
            let macd = macd_line[i + sig_offset];
            MacdResult {
                macd,
                signal: *signal,
                histogram: macd - signal,
            }
        })
        .collect();

    Some(results)
}

/// Convenience wrapper returning only the most recent MACD reading using the
/// conventional 12/26/9 parameters.
pub fn current_macd(closes: &[f64]) -> Option<MacdResult> {
    calculate_macd(closes, 12, 26, 9)?.last().copied()
}

/// Detect a bullish or bearish MACD/signal crossover between the last two
/// readings. Returns `Some(true)` for bullish (MACD crosses above signal),
/// `Some(false)` for bearish, `None` if there's no crossover or insufficient
/// data.
pub fn detect_crossover(results: &[MacdResult]) -> Option<bool> {
    if results.len() < 2 {
        return None;
    }
    let prev = results[results.len() - 2];
    let curr = results[results.len() - 1];

    let prev_diff = prev.macd - prev.signal;
    let curr_diff = curr.macd - curr.signal;

    if prev_diff <= 0.0 && curr_diff > 0.0 {
        Some(true)
    } else if prev_diff >= 0.0 && curr_diff < 0.0 {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rising_series(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn insufficient_data_returns_none() {
        assert!(calculate_macd(&[1.0, 2.0, 3.0], 12, 26, 9).is_none());
    }

    #[test]
    fn invalid_periods_returns_none() {
        let closes = rising_series(60);
        assert!(calculate_macd(&closes, 26, 12, 9).is_none());
        assert!(calculate_macd(&closes, 0, 26, 9).is_none());
    }

    #[test]
    fn rising_series_has_positive_macd() {
        let closes = rising_series(60);
        let result = current_macd(&closes).unwrap();
        assert!(result.macd > 0.0);
    }

    #[test]
    fn falling_then_rising_detects_bullish_crossover() {
        let mut closes: Vec<f64> = (0..40).map(|i| 100.0 - i as f64 * 0.5).collect();
        closes.extend((0..40).map(|i| 80.0 + i as f64 * 1.0));
        let series = calculate_macd(&closes, 12, 26, 9).unwrap();
        // A sustained reversal should eventually produce a bullish crossover
        // somewhere in the series.
        let any_bullish = (1..series.len()).any(|i| {
            detect_crossover(&series[i.saturating_sub(1)..=i]) == Some(true)
        });
        assert!(any_bullish);
    }

    #[test]
    fn detect_crossover_needs_two_points() {
        let single = vec![MacdResult { macd: 1.0, signal: 0.5, histogram: 0.5 }];
        assert!(detect_crossover(&single).is_none());
    }

    #[test]
    fn detect_crossover_no_cross_returns_none() {
        let series = vec![
            MacdResult { macd: 1.0, signal: 0.5, histogram: 0.5 },
            MacdResult { macd: 1.2, signal: 0.6, histogram: 0.6 },
        ];
        assert!(detect_crossover(&series).is_none());
    }
}
