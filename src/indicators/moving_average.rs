/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Rolling standard deviation of the last `period` prices
pub fn calculate_volatility(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period < 2 {
        return None;
    }

    let window: Vec<f64> = prices.iter().rev().take(period).cloned().collect();
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / period as f64;

    Some(variance.sqrt())
}
