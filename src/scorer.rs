// =============================================================================
// scorer.rs — HOW MUCH DOES THIS ORDER MATTER?
// =============================================================================
//
// A Rs 500 crore order is life-changing for a 1,000 crore company and a
// rounding error for a 5,00,000 crore one. The impact score captures that,
// then nudges it with a quality signal (ROCE) and two technical ones
// (price breakout, volume spike).
//
// Rules the score always obeys:
// - each term is capped on its own before summing
// - the total is clamped to [0, 100]
// - a missing input contributes zero, it never errors
// =============================================================================

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{FinancialSnapshot, PriceBar, PriceSignals};

/// Bars of history the breakout and volume checks look back over.
pub const LOOKBACK_BARS: usize = 20;
/// Fewer prior bars than this and the technical signals stay unknown.
pub const MIN_PRIOR_BARS: usize = 5;
/// Volume at least this multiple of the prior average is a spike.
pub const VOLUME_SPIKE_RATIO: f64 = 2.0;

/// Weights of the impact score. The defaults add up to exactly 100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImpactWeights {
    /// Points per percent of market cap.
    pub size_multiplier: f64,
    /// Ceiling of the size term.
    pub size_cap: f64,
    /// ROCE (percent) that earns the full quality term.
    pub roce_full_marks: f64,
    /// Ceiling of the quality term.
    pub roce_cap: f64,
    pub breakout_bonus: f64,
    pub volume_spike_bonus: f64,
}

impl Default for ImpactWeights {
    fn default() -> Self {
        Self {
            size_multiplier: 4.0,
            size_cap: 50.0,
            roce_full_marks: 30.0,
            roce_cap: 20.0,
            breakout_bonus: 15.0,
            volume_spike_bonus: 15.0,
        }
    }
}

/// Everything the scorer looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreInputs {
    pub order_value_cr: Option<f64>,
    pub market_cap_cr: Option<f64>,
    pub roce: Option<f64>,
    pub breakout: Option<bool>,
    pub volume_spike: Option<bool>,
}

impl ScoreInputs {
    pub fn new(order_value_cr: Option<f64>, snapshot: &FinancialSnapshot, signals: &PriceSignals) -> Self {
        Self {
            order_value_cr,
            market_cap_cr: snapshot.market_cap,
            roce: snapshot.roce,
            breakout: signals.breakout,
            volume_spike: signals.volume_spike,
        }
    }
}

/// Order value as a percent of market cap, rounded to 2 decimals.
/// `None` when either side is unknown or market cap is not positive.
pub fn order_pct_of_market_cap(order_value_cr: Option<f64>, market_cap_cr: Option<f64>) -> Option<f64> {
    match (order_value_cr, market_cap_cr) {
        (Some(order), Some(mcap)) if mcap > 0.0 && order.is_finite() => {
            Some(((order / mcap) * 100.0 * 100.0).round() / 100.0)
        }
        _ => None,
    }
}

/// Compute the impact score in [0, 100].
pub fn impact_score(inputs: &ScoreInputs, weights: &ImpactWeights) -> f64 {
    let size = order_pct_of_market_cap(inputs.order_value_cr, inputs.market_cap_cr)
        .map(|pct| capped(pct * weights.size_multiplier, weights.size_cap))
        .unwrap_or(0.0);

    let quality = match inputs.roce {
        Some(roce) if weights.roce_full_marks > 0.0 => {
            capped(roce / weights.roce_full_marks * weights.roce_cap, weights.roce_cap)
        }
        _ => 0.0,
    };

    let breakout = if inputs.breakout == Some(true) { weights.breakout_bonus.max(0.0) } else { 0.0 };
    let volume = if inputs.volume_spike == Some(true) { weights.volume_spike_bonus.max(0.0) } else { 0.0 };

    let total = size + quality + breakout + volume;
    if total.is_finite() {
        (total.clamp(0.0, 100.0) * 10.0).round() / 10.0
    } else {
        0.0
    }
}

/// Derive technical signals from daily bars (oldest first) around an order date.
///
/// The base bar is the last session on or before the order date; the reaction
/// bar is the session after it when one exists. Breakout compares the reaction
/// close with the highest high of the preceding bars, volume spike compares
/// its volume with their average.
pub fn price_signals(bars: &[PriceBar], order_date: Option<NaiveDate>) -> PriceSignals {
    let base = match order_date {
        Some(date) => bars.iter().rposition(|b| b.date <= date),
        None => bars.len().checked_sub(1),
    };
    let Some(base) = base else {
        return PriceSignals::default();
    };

    let next_day_move_pct = bars.get(base + 1).and_then(|next| {
        let close = bars[base].close;
        (close > 0.0).then(|| ((next.close - close) / close * 100.0 * 100.0).round() / 100.0)
    });

    let reaction = if base + 1 < bars.len() { base + 1 } else { base };
    let prior = &bars[reaction.saturating_sub(LOOKBACK_BARS)..reaction];
    if prior.len() < MIN_PRIOR_BARS {
        return PriceSignals {
            next_day_move_pct,
            ..Default::default()
        };
    }

    let bar = &bars[reaction];
    let prior_high = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let avg_volume = prior.iter().map(|b| b.volume).sum::<f64>() / prior.len() as f64;

    PriceSignals {
        breakout: Some(bar.close > prior_high),
        volume_spike: (avg_volume > 0.0).then(|| bar.volume >= VOLUME_SPIKE_RATIO * avg_volume),
        next_day_move_pct,
    }
}

/// Clamp a term to [0, cap]. NaN counts as zero.
fn capped(value: f64, cap: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, cap.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(order: Option<f64>, mcap: Option<f64>) -> ScoreInputs {
        ScoreInputs {
            order_value_cr: order,
            market_cap_cr: mcap,
            ..Default::default()
        }
    }

    #[test]
    fn test_pct_requires_both_operands() {
        assert_eq!(order_pct_of_market_cap(None, Some(1000.0)), None);
        assert_eq!(order_pct_of_market_cap(Some(10.0), None), None);
        assert_eq!(order_pct_of_market_cap(Some(10.0), Some(0.0)), None);
        assert_eq!(order_pct_of_market_cap(Some(10.0), Some(1000.0)), Some(1.0));
    }

    #[test]
    fn test_missing_inputs_score_zero() {
        let w = ImpactWeights::default();
        assert_eq!(impact_score(&ScoreInputs::default(), &w), 0.0);
        assert_eq!(impact_score(&inputs(Some(500.0), None), &w), 0.0);
    }

    #[test]
    fn test_monotonic_in_ratio() {
        let w = ImpactWeights::default();
        let mut last = -1.0;
        for order in [0.0, 1.0, 5.0, 10.0, 50.0, 100.0, 125.0, 500.0, 1e6, 1e12] {
            let score = impact_score(&inputs(Some(order), Some(1000.0)), &w);
            assert!(score >= last, "score dropped at order={order}: {score} < {last}");
            assert!(score <= 100.0);
            last = score;
        }
    }

    #[test]
    fn test_never_exceeds_100() {
        let w = ImpactWeights::default();
        let everything = ScoreInputs {
            order_value_cr: Some(1e15),
            market_cap_cr: Some(1.0),
            roce: Some(500.0),
            breakout: Some(true),
            volume_spike: Some(true),
        };
        assert_eq!(impact_score(&everything, &w), 100.0);

        let generous = ImpactWeights {
            breakout_bonus: 80.0,
            volume_spike_bonus: 80.0,
            ..w
        };
        assert_eq!(impact_score(&everything, &generous), 100.0);
    }

    #[test]
    fn test_terms_capped_individually() {
        let w = ImpactWeights::default();
        // Size term alone saturates at 50 no matter how large the order.
        assert_eq!(impact_score(&inputs(Some(1e9), Some(100.0)), &w), 50.0);
        // 2.5% of mcap -> 10 points, ROCE 15% -> 10 points, breakout +15.
        let mixed = ScoreInputs {
            order_value_cr: Some(25.0),
            market_cap_cr: Some(1000.0),
            roce: Some(15.0),
            breakout: Some(true),
            volume_spike: Some(false),
        };
        assert_eq!(impact_score(&mixed, &w), 35.0);
    }

    #[test]
    fn test_negative_roce_contributes_nothing() {
        let w = ImpactWeights::default();
        let loss_maker = ScoreInputs {
            order_value_cr: Some(25.0),
            market_cap_cr: Some(1000.0),
            roce: Some(-40.0),
            ..Default::default()
        };
        assert_eq!(impact_score(&loss_maker, &w), 10.0);
    }

    fn bars(closes: &[(f64, f64)]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, (close, volume))| PriceBar {
                date: start + chrono::Duration::days(i as i64),
                close: *close,
                high: *close + 1.0,
                volume: *volume,
            })
            .collect()
    }

    #[test]
    fn test_price_signals_breakout_and_spike() {
        let mut series = vec![(100.0, 1000.0); 20];
        series.push((100.0, 1000.0));
        series.push((110.0, 5000.0));
        let history = bars(&series);
        let order_date = history[20].date;
        let signals = price_signals(&history, Some(order_date));
        assert_eq!(signals.breakout, Some(true));
        assert_eq!(signals.volume_spike, Some(true));
        assert_eq!(signals.next_day_move_pct, Some(10.0));
    }

    #[test]
    fn test_price_signals_quiet_tape() {
        let history = bars(&vec![(100.0, 1000.0); 25]);
        let signals = price_signals(&history, None);
        assert_eq!(signals.breakout, Some(false));
        assert_eq!(signals.volume_spike, Some(false));
        assert_eq!(signals.next_day_move_pct, None);
    }

    #[test]
    fn test_price_signals_need_history() {
        let history = bars(&[(100.0, 1000.0), (101.0, 1200.0), (99.0, 900.0)]);
        let signals = price_signals(&history, Some(history[1].date));
        assert_eq!(signals.breakout, None);
        assert_eq!(signals.volume_spike, None);
        assert_eq!(signals.next_day_move_pct, Some(-1.98));

        let before_everything = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(price_signals(&history, Some(before_everything)), PriceSignals::default());
        assert_eq!(price_signals(&[], None), PriceSignals::default());
    }
}
