//! Reputation records shared between the memory store and the detectors.
//!
//! The orchestrator is the only writer of flags; detection stages read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    ConfirmedFraud,
    ManualReview,
    VelocityAbuse,
    CardTesting,
}

impl FlagReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfirmedFraud => "confirmed_fraud",
            Self::ManualReview => "manual_review",
            Self::VelocityAbuse => "velocity_abuse",
            Self::CardTesting => "card_testing",
        }
    }
}

/// Per-user reputation, keyed by `user:{id}` in the memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReputation {
    pub flagged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_reason: Option<FlagReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flagged_at: Option<DateTime<Utc>>,
    /// Monotonic count of flag events; never reset by TTL expiry of the
    /// flag itself within the record's lifetime.
    pub fraud_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_at: Option<DateTime<Utc>>,
}

impl UserReputation {
    pub fn clean() -> Self {
        Self {
            flagged: false,
            flag_reason: None,
            flagged_at: None,
            fraud_count: 0,
            last_review_at: None,
        }
    }

    /// A live flag set by a blocking decision, whatever detector led it.
    /// Drives the hard-flag short circuit and the block override; a
    /// manual-review flag raises the historical signal but does not count.
    pub fn fraud_flagged(&self) -> bool {
        self.flagged
            && matches!(
                self.flag_reason,
                Some(
                    FlagReason::ConfirmedFraud
                        | FlagReason::VelocityAbuse
                        | FlagReason::CardTesting
                )
            )
    }

    pub fn reviewed_within(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.last_review_at.map(|at| now - at <= window).unwrap_or(false)
    }
}

/// Per-IP reputation, keyed by `ip:{addr}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpReputation {
    pub flagged: bool,
    pub fraud_case_count: u32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}
