//! Raw shard row to canonical [`Ticket`] conversion.
//!
//! The nine ticket tables grew apart over time: some carry `seat_info`
//! instead of `seat`, older rows use `user_id` for the owner, and dates arrive
//! in more than one text format. Everything optional is defaulted; a row that
//! cannot yield a trustworthy ticket is reported as a [`NormalizeError`] and
//! the caller decides whether to skip it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::shard::ShardId;
use crate::models::{Ticket, TicketId, TicketStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("malformed row: {0}")]
    Malformed(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid value for '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("inconsistent ownership: {0}")]
    InconsistentOwnership(&'static str),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawTicketRow {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    category: Option<String>,
    category_label: Option<String>,
    categories: Option<CategoryJoin>,
    price: Option<Decimal>,
    quantity: Option<i64>,
    status: Option<String>,
    event_id: Option<Value>,
    event_date: Option<String>,
    venue: Option<String>,
    seat: Option<String>,
    seat_info: Option<String>,
    file_path: Option<String>,
    owner_id: Option<String>,
    user_id: Option<String>,
    seller_id: Option<String>,
    buyer_id: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CategoryJoin {
    name: Option<String>,
}

pub fn normalize(shard: ShardId, row: Value) -> Result<Ticket, NormalizeError> {
    let raw: RawTicketRow =
        serde_json::from_value(row).map_err(|e| NormalizeError::Malformed(e.to_string()))?;

    let id = non_empty(raw.id).ok_or(NormalizeError::MissingField("id"))?;
    let title = non_empty(raw.title).ok_or(NormalizeError::MissingField("title"))?;

    let price = raw.price.ok_or(NormalizeError::MissingField("price"))?;
    if price < Decimal::ZERO {
        return Err(NormalizeError::InvalidField {
            field: "price",
            reason: format!("{price} is negative"),
        });
    }

    let quantity = match raw.quantity {
        None => 1,
        Some(q) => match i32::try_from(q) {
            Ok(q) if q >= 1 => q,
            _ => {
                return Err(NormalizeError::InvalidField {
                    field: "quantity",
                    reason: format!("{q} is not a positive count"),
                })
            }
        },
    };

    let status = match non_empty(raw.status) {
        None => TicketStatus::Available,
        Some(s) => s
            .parse::<TicketStatus>()
            .map_err(|e| NormalizeError::InvalidField {
                field: "status",
                reason: e.to_string(),
            })?,
    };

    let owner_id = parse_uuid("owner_id", non_empty(raw.owner_id).or(non_empty(raw.user_id)))?
        .ok_or(NormalizeError::MissingField("owner_id"))?;
    let seller_id = parse_uuid("seller_id", non_empty(raw.seller_id))?;
    let buyer_id = parse_uuid("buyer_id", non_empty(raw.buyer_id))?;

    match status {
        TicketStatus::Sold if buyer_id != Some(owner_id) => {
            return Err(NormalizeError::InconsistentOwnership(
                "sold ticket must be owned by its buyer",
            ))
        }
        TicketStatus::Available if buyer_id.is_some() => {
            return Err(NormalizeError::InconsistentOwnership(
                "available ticket cannot have a buyer",
            ))
        }
        _ => {}
    }

    let created_at = non_empty(raw.created_at)
        .ok_or(NormalizeError::MissingField("created_at"))
        .and_then(|s| {
            parse_timestamp(&s).ok_or(NormalizeError::InvalidField {
                field: "created_at",
                reason: format!("unparseable timestamp '{s}'"),
            })
        })?;

    // A bad event date only costs the ticket its place in date ordering.
    let event_date = non_empty(raw.event_date).and_then(|s| {
        let parsed = parse_timestamp(&s);
        if parsed.is_none() {
            tracing::debug!(ticket_id = %id, value = %s, "Ignoring unparseable event date");
        }
        parsed
    });

    let category =
        non_empty(raw.category).unwrap_or_else(|| shard.canonical_category().to_string());
    let category_label = non_empty(raw.category_label)
        .or_else(|| raw.categories.and_then(|c| non_empty(c.name)))
        .unwrap_or_else(|| shard.canonical_category().to_string());

    Ok(Ticket {
        id: TicketId::new(id),
        shard,
        title,
        description: non_empty(raw.description),
        category,
        category_label,
        price,
        quantity,
        status,
        event_id: raw.event_id.and_then(event_id_text),
        event_date,
        venue: non_empty(raw.venue),
        seat: non_empty(raw.seat).or(non_empty(raw.seat_info)),
        file_path: non_empty(raw.file_path),
        owner_id,
        seller_id,
        buyer_id,
        created_at,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_uuid(field: &'static str, value: Option<String>) -> Result<Option<Uuid>, NormalizeError> {
    value
        .map(|v| {
            Uuid::parse_str(&v).map_err(|e| NormalizeError::InvalidField {
                field,
                reason: e.to_string(),
            })
        })
        .transpose()
}

fn event_id_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` (taken as UTC) and bare dates.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
        if let Ok(dt) = DateTime::parse_from_str(raw, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const OWNER: &str = "5b0c8a4e-1f2d-4c3b-9a8e-7d6c5b4a3f21";
    const BUYER: &str = "8f14e45f-ceea-4671-9d4c-2b1a0e9f8d7c";

    fn row() -> Value {
        json!({
            "id": "t-1",
            "title": "Show A",
            "price": 25,
            "status": "available",
            "owner_id": OWNER,
            "created_at": "2024-05-01T10:00:00+00:00"
        })
    }

    #[test]
    fn test_minimal_row_gets_defaults() {
        let ticket = normalize(ShardId::Concerts, row()).unwrap();
        assert_eq!(ticket.id.as_str(), "t-1");
        assert_eq!(ticket.quantity, 1);
        assert_eq!(ticket.category, "Concerts");
        assert_eq!(ticket.category_label, "Concerts");
        assert_eq!(ticket.price, Decimal::new(25, 0));
        assert!(ticket.file_path.is_none());
        assert!(ticket.event_date.is_none());
        assert_eq!(ticket.shard, ShardId::Concerts);
    }

    #[test]
    fn test_legacy_column_names_are_coalesced() {
        let mut value = row();
        let obj = value.as_object_mut().unwrap();
        obj.remove("owner_id");
        obj.insert("user_id".into(), json!(OWNER));
        obj.insert("seat_info".into(), json!("Row 4, Seat 12"));
        obj.insert("categories".into(), json!({ "name": "Koncerti" }));
        obj.insert("event_date".into(), json!("2024-07-14 20:00:00"));

        let ticket = normalize(ShardId::Concerts, value).unwrap();
        assert_eq!(ticket.owner_id.to_string(), OWNER);
        assert_eq!(ticket.seat.as_deref(), Some("Row 4, Seat 12"));
        assert_eq!(ticket.category_label, "Koncerti");
        assert_eq!(ticket.event_date.unwrap().to_rfc3339(), "2024-07-14T20:00:00+00:00");
    }

    #[test]
    fn test_unparseable_event_date_is_dropped_not_fatal() {
        let mut value = row();
        value["event_date"] = json!("next friday");
        let ticket = normalize(ShardId::Sports, value).unwrap();
        assert!(ticket.event_date.is_none());
    }

    #[test]
    fn test_missing_required_fields_are_reported() {
        let mut value = row();
        value.as_object_mut().unwrap().remove("title");
        assert_eq!(
            normalize(ShardId::Other, value),
            Err(NormalizeError::MissingField("title"))
        );

        let mut value = row();
        value.as_object_mut().unwrap().remove("owner_id");
        assert_eq!(
            normalize(ShardId::Other, value),
            Err(NormalizeError::MissingField("owner_id"))
        );
    }

    #[test]
    fn test_negative_price_and_bad_status_are_rejected() {
        let mut value = row();
        value["price"] = json!(-5);
        assert!(matches!(
            normalize(ShardId::Other, value),
            Err(NormalizeError::InvalidField { field: "price", .. })
        ));

        let mut value = row();
        value["status"] = json!("pending");
        assert!(matches!(
            normalize(ShardId::Other, value),
            Err(NormalizeError::InvalidField { field: "status", .. })
        ));
    }

    #[test]
    fn test_sold_ticket_must_belong_to_buyer() {
        let mut value = row();
        value["status"] = json!("sold");
        value["buyer_id"] = json!(BUYER);
        assert!(matches!(
            normalize(ShardId::Other, value.clone()),
            Err(NormalizeError::InconsistentOwnership(_))
        ));

        value["owner_id"] = json!(BUYER);
        let ticket = normalize(ShardId::Other, value).unwrap();
        assert_eq!(ticket.status, TicketStatus::Sold);
        assert_eq!(ticket.buyer_id, Some(ticket.owner_id));
    }

    #[test]
    fn test_non_object_row_is_malformed() {
        assert!(matches!(
            normalize(ShardId::Other, json!([1, 2, 3])),
            Err(NormalizeError::Malformed(_))
        ));
    }
}
