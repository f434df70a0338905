//! Feature extraction for the anomaly-scoring model.
//!
//! The layout is a fixed contract with [`crate::ml::ScoringModel`]
//! implementations; the daemon asserts the dimensions agree at startup.

use crate::event::TransactionEvent;
use crate::velocity::WindowEntry;

/// Fixed feature layout:
/// 0      ln(1 + amount)
/// 1, 2   hour-of-day sin / cos
/// 3      shipping/billing country mismatch (0 or 1)
/// 4..=8  payment-method one-hot (credit, debit, bank, paypal, crypto)
/// 9      account age in days
/// 10     user rolling-mean amount
/// 11     user rolling transaction count
pub const FEATURE_DIM: usize = 12;

pub type FeatureVector = [f64; FEATURE_DIM];

/// Population medians used to fill features whose source did not respond.
pub const POPULATION_MEDIANS: FeatureVector =
    [4.45, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 180.0, 85.0, 2.0];

/// Aggregates over the user's velocity window, excluding the current event.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingStats {
    pub mean_amount: f64,
    pub std_amount: f64,
    pub count: u32,
}

pub fn rolling_stats(window: &[WindowEntry]) -> RollingStats {
    if window.is_empty() {
        return RollingStats::default();
    }
    let n = window.len() as f64;
    let mean = window.iter().map(|e| e.amount).sum::<f64>() / n;
    let var = window.iter().map(|e| (e.amount - mean).powi(2)).sum::<f64>() / n;
    RollingStats { mean_amount: mean, std_amount: var.sqrt(), count: window.len() as u32 }
}

/// Build the model input. `stats` is `None` when the velocity window could
/// not be read; individual missing values fall back to population medians.
pub fn extract(event: &TransactionEvent, stats: Option<&RollingStats>) -> FeatureVector {
    let mut features = [0.0; FEATURE_DIM];
    features[0] = event.amount.ln_1p();
    let (sin, cos) = event.hour_cyclic();
    features[1] = sin;
    features[2] = cos;
    features[3] = if event.country_mismatch() { 1.0 } else { 0.0 };
    features[4 + event.payment_method.one_hot_index()] = 1.0;
    features[9] = event
        .account_age_days
        .map(f64::from)
        .unwrap_or(POPULATION_MEDIANS[9]);
    match stats {
        Some(s) => {
            features[10] =
                if s.count > 0 { s.mean_amount } else { POPULATION_MEDIANS[10] };
            features[11] = f64::from(s.count);
        }
        None => {
            features[10] = POPULATION_MEDIANS[10];
            features[11] = POPULATION_MEDIANS[11];
        }
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::testutil::event;
    use crate::event::PaymentMethod;
    use chrono::Utc;

    #[test]
    fn one_hot_is_exclusive() {
        let mut e = event("o1", "u1", 20.0);
        e.payment_method = PaymentMethod::Crypto;
        let f = extract(&e, None);
        assert_eq!(f[4..9], [0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn missing_sources_use_medians() {
        let mut e = event("o1", "u1", 20.0);
        e.account_age_days = None;
        let f = extract(&e, None);
        assert_eq!(f[9], POPULATION_MEDIANS[9]);
        assert_eq!(f[10], POPULATION_MEDIANS[10]);
        assert_eq!(f[11], POPULATION_MEDIANS[11]);
    }

    #[test]
    fn empty_window_reports_zero_count_with_median_mean() {
        let e = event("o1", "u1", 20.0);
        let stats = rolling_stats(&[]);
        let f = extract(&e, Some(&stats));
        assert_eq!(f[11], 0.0);
        assert_eq!(f[10], POPULATION_MEDIANS[10]);
    }

    #[test]
    fn rolling_stats_mean_and_std() {
        let now = Utc::now();
        let entries: Vec<WindowEntry> = [10.0, 20.0, 30.0]
            .iter()
            .enumerate()
            .map(|(i, amount)| WindowEntry {
                order_id: format!("o{i}"),
                amount: *amount,
                timestamp: now,
            })
            .collect();
        let stats = rolling_stats(&entries);
        assert_eq!(stats.count, 3);
        assert!((stats.mean_amount - 20.0).abs() < 1e-9);
        assert!((stats.std_amount - 8.1649).abs() < 1e-3);
    }
}
