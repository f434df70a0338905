//! Transaction event schema and validation.
//!
//! Every event entering the pipeline is validated here; a payload that fails
//! produces a MANUAL_REVIEW decision with reason `malformed_event` rather
//! than an error, so the consumer never wedges on bad input.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub const MAX_ID_LEN: usize = 100;
pub const MAX_AMOUNT: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    BankTransfer,
    Paypal,
    Crypto,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditCard => "credit_card",
            Self::DebitCard => "debit_card",
            Self::BankTransfer => "bank_transfer",
            Self::Paypal => "paypal",
            Self::Crypto => "crypto",
        }
    }

    /// Position in the one-hot slice of the feature vector.
    pub fn one_hot_index(&self) -> usize {
        match self {
            Self::CreditCard => 0,
            Self::DebitCard => 1,
            Self::BankTransfer => 2,
            Self::Paypal => 3,
            Self::Crypto => 4,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single transaction event consumed from the input topic.
///
/// `order_id` is stable across redeliveries; two events sharing it are
/// duplicates and collapse to the first decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionEvent {
    pub order_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    pub payment_method: PaymentMethod,
    pub currency: String,
    pub shipping_country: String,
    pub billing_country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_age_days: Option<u32>,
}

impl TransactionEvent {
    /// Parse and validate a raw JSON payload.
    pub fn from_json(payload: &[u8]) -> Result<Self, PipelineError> {
        let event: Self = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::InvalidEvent(e.to_string()))?;
        event.validate()?;
        Ok(event)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        validate_id("order_id", &self.order_id)?;
        validate_id("user_id", &self.user_id)?;
        if !self.amount.is_finite() || self.amount <= 0.0 || self.amount >= MAX_AMOUNT {
            return Err(PipelineError::InvalidEvent(format!(
                "amount {} outside (0, {})",
                self.amount, MAX_AMOUNT
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(PipelineError::InvalidEvent("currency is empty".into()));
        }
        Ok(())
    }

    pub fn country_mismatch(&self) -> bool {
        !self.shipping_country.eq_ignore_ascii_case(&self.billing_country)
    }

    /// Hour-of-day encoded as a point on the unit circle, so 23:00 and
    /// 00:00 land next to each other in feature space.
    pub fn hour_cyclic(&self) -> (f64, f64) {
        let hour = f64::from(self.timestamp.hour());
        let angle = hour / 24.0 * std::f64::consts::TAU;
        (angle.sin(), angle.cos())
    }

    /// Human-readable description used as the similarity query against the
    /// fraud-pattern knowledge base.
    pub fn describe(&self) -> String {
        let mut parts = vec![
            format!("transaction amount ${:.2} in {}", self.amount, self.currency),
            format!("payment method {}", self.payment_method),
        ];
        if let Some(age) = self.account_age_days {
            parts.push(format!("account age {age} days"));
        }
        if self.country_mismatch() {
            parts.push(format!(
                "shipping {} differs from billing {}",
                self.shipping_country, self.billing_country
            ));
        }
        if let Some(ip) = &self.ip_address {
            parts.push(format!("from IP {ip}"));
        }
        parts.join(", ")
    }
}

fn validate_id(field: &'static str, value: &str) -> Result<(), PipelineError> {
    if value.trim().is_empty() {
        return Err(PipelineError::InvalidEvent(format!("{field} is empty")));
    }
    if value.len() > MAX_ID_LEN {
        return Err(PipelineError::InvalidEvent(format!(
            "{field} exceeds {MAX_ID_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub mod testutil {
    use super::*;
    use chrono::TimeZone;

    /// A plain, valid event suitable as a baseline in tests.
    pub fn event(order_id: &str, user_id: &str, amount: f64) -> TransactionEvent {
        TransactionEvent {
            order_id: order_id.to_string(),
            user_id: user_id.to_string(),
            ip_address: Some("203.0.113.7".to_string()),
            amount,
            timestamp: Utc.with_ymd_and_hms(2025, 6, 12, 14, 30, 0).unwrap(),
            payment_method: PaymentMethod::DebitCard,
            currency: "USD".to_string(),
            shipping_country: "US".to_string(),
            billing_country: "US".to_string(),
            device_fingerprint: None,
            account_age_days: Some(730),
        }
    }
}
