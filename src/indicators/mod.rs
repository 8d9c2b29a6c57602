// Technical indicators module
// Local pre-processing keeps raw kline series out of the reasoning prompt

pub mod moving_average;
pub mod rsi;

pub use moving_average::{calculate_sma, calculate_volatility};
pub use rsi::calculate_rsi;

use crate::api::Kline;
use crate::models::MarketSummary;

/// Build the indicator digest sent along with a wake event.
///
/// Works with whatever history is available; indicators that lack data are
/// simply left unset rather than failing the wake.
pub fn summarize_klines(klines: &[Kline]) -> MarketSummary {
    let closes: Vec<f64> = klines.iter().map(|k| k.close).collect();

    let rsi_14 = calculate_rsi(&closes, 14);
    let sma_20 = calculate_sma(&closes, 20);
    let volatility = calculate_volatility(&closes, 20);

    let (trend, price_vs_sma20_pct) = match (closes.last(), sma_20) {
        (Some(&price), Some(sma)) if sma > 0.0 => {
            let trend = if price > sma { "BULLISH" } else { "BEARISH" };
            let pct = (price - sma) / sma * 100.0;
            (Some(trend.to_string()), Some(pct))
        }
        _ => (None, None),
    };

    MarketSummary {
        rsi_14,
        sma_20,
        volatility,
        trend,
        price_vs_sma20_pct,
    }
}
