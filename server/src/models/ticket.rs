use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::shard::ShardId;

/// Opaque ticket identifier, unique across every shard.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Available,
    Reserved,
    Sold,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Sold => "sold",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ticket status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for TicketStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "available" => Ok(Self::Available),
            "reserved" => Ok(Self::Reserved),
            "sold" => Ok(Self::Sold),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Canonical in-memory listing, independent of the shard it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub shard: ShardId,
    pub title: String,
    pub description: Option<String>,
    pub category: String,
    pub category_label: String,
    pub price: Decimal,
    pub quantity: i32,
    pub status: TicketStatus,
    pub event_id: Option<String>,
    pub event_date: Option<DateTime<Utc>>,
    pub venue: Option<String>,
    pub seat: Option<String>,
    pub file_path: Option<String>,
    pub owner_id: Uuid,
    pub seller_id: Option<Uuid>,
    pub buyer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Ticket {
    pub fn is_owned_by(&self, profile_id: Uuid) -> bool {
        self.owner_id == profile_id
    }

    pub fn is_available(&self) -> bool {
        self.status == TicketStatus::Available
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_case_insensitively() {
        assert_eq!("Available".parse::<TicketStatus>(), Ok(TicketStatus::Available));
        assert_eq!(" SOLD ".parse::<TicketStatus>(), Ok(TicketStatus::Sold));
        assert!("pending".parse::<TicketStatus>().is_err());
    }

    #[test]
    fn test_ticket_id_serializes_as_plain_string() {
        let id = TicketId::new("abc-123");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("abc-123"));
    }
}
