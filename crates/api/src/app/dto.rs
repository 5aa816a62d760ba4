use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use pinke_core::DomainError;

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_no: String,
    pub amount_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    pub payment_id: String,
    pub amount_cents: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub title: String,
    pub required_members: i32,
    #[serde(default)]
    pub joined_members: i32,
    pub deadline: DateTime<Utc>,
}

impl CreateGroupRequest {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("title must not be empty"));
        }
        if self.required_members <= 0 {
            return Err(DomainError::validation("required_members must be positive"));
        }
        if self.joined_members < 0 {
            return Err(DomainError::validation("joined_members must not be negative"));
        }
        Ok(())
    }
}

// -------------------------
// Path helpers
// -------------------------

/// Parse a typed id from a path segment, mapping failures to a 400 response.
pub fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: FromStr<Err = DomainError>,
{
    raw.parse::<T>().map_err(errors::domain_error_to_response)
}
