use chrono::Duration;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::app::domain::frame::ConfirmationRequest;
use crate::app::domain::types::{ConfirmationId, Timestamp};

pub const DEFAULT_CONFIRMATION_TTL_SECS: i64 = 300;
pub const MAX_CONFIRMATION_TTL_SECS: i64 = 86_400;

/// A write action the server is holding until the user approves or rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub confirmation_id: ConfirmationId,
    pub message: String,
    pub action: String,
    pub expires_at: Timestamp,
}

impl PendingConfirmation {
    /// A TTL that would push the expiry past the representable range falls
    /// back to the default TTL.
    pub fn from_request(request: ConfirmationRequest, now: Timestamp, ttl: Duration) -> Self {
        let expires_at = now
            .checked_add_signed(ttl)
            .or_else(|| now.checked_add_signed(Duration::seconds(DEFAULT_CONFIRMATION_TTL_SECS)))
            .unwrap_or(now);
        Self {
            confirmation_id: request.confirmation_id,
            message: request.message,
            action: request.action,
            expires_at,
        }
    }

    /// Time left before the confirmation lapses. Never negative.
    pub fn remaining(&self, now: Timestamp) -> std::time::Duration {
        (self.expires_at - now)
            .to_std()
            .unwrap_or(std::time::Duration::ZERO)
    }

    /// Whole seconds left, rounded up, for countdown readouts.
    pub fn remaining_secs(&self, now: Timestamp) -> u64 {
        let remaining = self.remaining(now);
        remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationDecision {
    Confirmed,
    Rejected,
}

impl ConfirmationDecision {
    pub fn is_approved(self) -> bool {
        self == ConfirmationDecision::Confirmed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationOutcome {
    Confirmed,
    Rejected,
    Expired,
}

impl ConfirmationOutcome {
    /// Transcript line recording how the confirmation ended.
    pub fn transcript_text(self, action: &str) -> String {
        let subject = if action.is_empty() {
            "Action".to_string()
        } else {
            format!("Action '{action}'")
        };
        match self {
            ConfirmationOutcome::Confirmed => format!("{subject} confirmed and executed"),
            ConfirmationOutcome::Rejected => format!("{subject} cancelled"),
            ConfirmationOutcome::Expired => {
                format!("{subject} cancelled: confirmation expired")
            }
        }
    }
}

impl From<ConfirmationDecision> for ConfirmationOutcome {
    fn from(decision: ConfirmationDecision) -> Self {
        match decision {
            ConfirmationDecision::Confirmed => ConfirmationOutcome::Confirmed,
            ConfirmationDecision::Rejected => ConfirmationOutcome::Rejected,
        }
    }
}

/// Formats a remaining duration as `m:ss` for countdown readouts.
pub fn format_countdown(remaining: std::time::Duration) -> String {
    let secs = remaining.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
