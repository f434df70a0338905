//! Anomaly-scoring model adapter.
//!
//! The pipeline consumes a pretrained model purely through
//! [`ScoringModel`]; evaluation must be side-effect free so workers can
//! share one instance without coordination. [`IsolationScorer`] is the
//! packaged default: a deterministic isolation-style scorer blended with a
//! small rule ensemble.

use crate::features::{FeatureVector, FEATURE_DIM};

/// Black-box scoring interface over a feature vector.
pub trait ScoringModel: Send + Sync {
    /// Anomaly probability in [0, 1]; higher means more fraud-like.
    fn predict_score(&self, features: &FeatureVector) -> f64;

    /// Dimension the model was fitted on. The daemon refuses to start when
    /// this disagrees with the extractor layout.
    fn expected_features(&self) -> usize {
        FEATURE_DIM
    }
}

/// Reference center and scale for the amount feature (ln space).
const AMOUNT_CENTER: f64 = 4.45;
const AMOUNT_SCALE: f64 = 1.2;
const HOUR_SCALE: f64 = 2.0;
/// Empirical payment-method mix (credit, debit, bank, paypal, crypto).
const PAYMENT_MIX: [f64; 5] = [0.40, 0.30, 0.15, 0.13, 0.02];
const ACCOUNT_AGE_KNEE_DAYS: f64 = 90.0;
/// Ratio (in ln space) the amount may sit above the user's rolling mean
/// before it counts as deviation; 0.7 is roughly double.
const MEAN_MARGIN: f64 = 0.7;
const COUNT_KNEE: f64 = 5.0;

const LOGISTIC_CENTER: f64 = 0.55;
const LOGISTIC_STEEPNESS: f64 = 6.0;

const ML_BLEND: f64 = 0.65;
const RULE_BLEND: f64 = 0.35;

#[derive(Debug, Default, Clone, Copy)]
pub struct IsolationScorer;

impl IsolationScorer {
    pub fn new() -> Self {
        Self
    }

    /// Root-mean-square deviation of the feature vector from the
    /// population reference, squashed to a probability.
    fn isolation_probability(features: &FeatureVector) -> f64 {
        let mut sq = 0.0;
        sq += ((features[0] - AMOUNT_CENTER) / AMOUNT_SCALE).powi(2);
        sq += (features[1] / HOUR_SCALE).powi(2);
        sq += (features[2] / HOUR_SCALE).powi(2);
        sq += features[3].powi(2);
        for (i, base) in PAYMENT_MIX.iter().enumerate() {
            sq += (features[4 + i] - base).powi(2);
        }
        // Only young accounts count as deviation; tenure is not anomalous.
        sq += (((ACCOUNT_AGE_KNEE_DAYS - features[9]) / ACCOUNT_AGE_KNEE_DAYS).max(0.0)).powi(2);
        // The amount is judged against the user's own rolling mean, not
        // the population; wealthy-but-consistent spenders stay quiet.
        if features[11] > 0.0 {
            let ratio = features[0] - (1.0 + features[10]).ln();
            sq += (ratio - MEAN_MARGIN).max(0.0).powi(2);
        }
        sq += (((features[11] - COUNT_KNEE) / COUNT_KNEE).max(0.0)).powi(2);

        let distance = (sq / FEATURE_DIM as f64).sqrt();
        logistic(LOGISTIC_STEEPNESS * (distance - LOGISTIC_CENTER))
    }

    /// Hand-written rules the fitted model underweights on sparse inputs.
    fn rule_score(features: &FeatureVector) -> f64 {
        let amount = features[0].exp_m1();
        let account_age = features[9];
        let rolling_mean = features[10];
        let rolling_count = features[11];
        let credit_card = features[4] > 0.5;

        let mut score: f64 = 0.0;
        if account_age < 7.0 && amount > 200.0 {
            score += 0.35;
        }
        if rolling_count == 0.0 && amount > 300.0 {
            score += 0.30;
        }
        if account_age < 7.0 && credit_card {
            score += 0.25;
        }
        if rolling_mean > 0.0 && rolling_count > 0.0 && amount > rolling_mean * 3.0 {
            score += 0.15;
        }
        score.min(1.0)
    }
}

impl ScoringModel for IsolationScorer {
    fn predict_score(&self, features: &FeatureVector) -> f64 {
        let blended = ML_BLEND * Self::isolation_probability(features)
            + RULE_BLEND * Self::rule_score(features);
        blended.clamp(0.0, 1.0)
    }
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::testutil::event;
    use crate::event::PaymentMethod;
    use crate::features::{extract, RollingStats};

    fn score(e: &crate::event::TransactionEvent, stats: Option<&RollingStats>) -> f64 {
        IsolationScorer::new().predict_score(&extract(e, stats))
    }

    #[test]
    fn scores_stay_in_unit_interval() {
        let scorer = IsolationScorer::new();
        assert!((0.0..=1.0).contains(&scorer.predict_score(&[0.0; FEATURE_DIM])));
        assert!((0.0..=1.0).contains(&scorer.predict_score(&[1e6; FEATURE_DIM])));
    }

    #[test]
    fn mature_account_ordinary_amount_scores_low() {
        let e = event("o1", "u1", 45.0);
        let stats = RollingStats::default();
        assert!(score(&e, Some(&stats)) < 0.30);
    }

    #[test]
    fn new_account_large_amount_scores_high() {
        let mut e = event("o1", "u1", 750.0);
        e.account_age_days = Some(1);
        e.payment_method = PaymentMethod::CreditCard;
        let stats = RollingStats::default();
        let s = score(&e, Some(&stats));
        assert!(s > 0.6, "expected elevated score, got {s}");
    }

    #[test]
    fn new_account_outranks_mature_for_same_amount() {
        let mut fresh = event("o1", "u1", 400.0);
        fresh.account_age_days = Some(2);
        let mut mature = event("o2", "u2", 400.0);
        mature.account_age_days = Some(900);
        let stats = RollingStats { mean_amount: 120.0, std_amount: 40.0, count: 6 };
        assert!(score(&fresh, Some(&stats)) > score(&mature, Some(&stats)));
    }

    #[test]
    fn amount_far_above_rolling_mean_raises_score() {
        let e = event("o1", "u1", 600.0);
        let calm = RollingStats { mean_amount: 550.0, std_amount: 60.0, count: 8 };
        let spiky = RollingStats { mean_amount: 50.0, std_amount: 10.0, count: 8 };
        assert!(score(&e, Some(&spiky)) > score(&e, Some(&calm)));
    }

    #[test]
    fn deterministic() {
        let e = event("o1", "u1", 123.45);
        assert_eq!(score(&e, None), score(&e, None));
    }
}
