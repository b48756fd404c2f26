use crate::error::DeserializationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length for loan and user identifiers
pub const MAX_ID_LEN: usize = 255;

/// Smallest amount that survives rounding to cents as a positive value
pub const MIN_AMOUNT: f64 = 0.005;

/// Largest amount that fits `NUMERIC(14,2)` after rounding
pub const MAX_AMOUNT: f64 = 999_999_999_999.99;

/// Loan lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Approved,
    Pending,
    Rejected,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 3] = [LoanStatus::Approved, LoanStatus::Pending, LoanStatus::Rejected];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Approved => "approved",
            LoanStatus::Pending => "pending",
            LoanStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(LoanStatus::Approved),
            "pending" => Ok(LoanStatus::Pending),
            "rejected" => Ok(LoanStatus::Rejected),
            other => Err(format!("unknown loan status '{}'", other)),
        }
    }
}

/// One loan lifecycle fact, as carried on the bus and stored in `loan_events`
///
/// Wire form is a flat JSON object with exactly these five fields. `amount`
/// is kept as `f64` in memory and stored as `NUMERIC(14,2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanEvent {
    pub loan_id: String,
    pub user_id: String,
    pub amount: f64,
    pub status: LoanStatus,
    /// Seconds since the Unix epoch at generation time
    pub timestamp: i64,
}

impl LoanEvent {
    /// Check field invariants that JSON typing alone does not enforce
    pub fn validate(&self) -> Result<(), DeserializationError> {
        validate_id("loan_id", &self.loan_id)?;
        validate_id("user_id", &self.user_id)?;

        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(DeserializationError::Invalid(format!(
                "amount must be a positive number, got {}",
                self.amount
            )));
        }
        if self.amount < MIN_AMOUNT {
            return Err(DeserializationError::Invalid(format!(
                "amount {} rounds to zero cents",
                self.amount
            )));
        }
        if self.amount > MAX_AMOUNT {
            return Err(DeserializationError::Invalid(format!(
                "amount {} exceeds maximum of {}",
                self.amount, MAX_AMOUNT
            )));
        }

        if self.timestamp < 0 {
            return Err(DeserializationError::Invalid(format!(
                "timestamp must not be negative, got {}",
                self.timestamp
            )));
        }

        Ok(())
    }

    /// Decode and validate a bus payload
    pub fn from_payload(payload: &[u8]) -> Result<Self, DeserializationError> {
        if payload.is_empty() {
            return Err(DeserializationError::EmptyPayload);
        }
        let event: LoanEvent = serde_json::from_slice(payload)?;
        event.validate()?;
        Ok(event)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

fn validate_id(field: &str, value: &str) -> Result<(), DeserializationError> {
    if value.trim().is_empty() {
        return Err(DeserializationError::Invalid(format!(
            "{} cannot be empty",
            field
        )));
    }
    if value.len() > MAX_ID_LEN {
        return Err(DeserializationError::Invalid(format!(
            "{} exceeds maximum length of {} characters",
            field, MAX_ID_LEN
        )));
    }
    Ok(())
}
