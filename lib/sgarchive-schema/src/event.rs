//! The flat event record stored in every Parquet file, and the fixed
//! column order/types it maps to on disk.

use serde::{Deserialize, Serialize};

/// One decoded/encoded SendGrid event. Every field but `email`, `timestamp`,
/// and `event` is optional, per spec.md §3.
///
/// `r#type` is spelled `event_type` here (a struct field can't be a bare
/// Rust keyword without the raw-identifier prefix, and `event_type` reads
/// better at call sites); the on-disk and wire name is still `type`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    pub email: String,
    pub timestamp: i64,
    pub event: String,

    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sg_event_id: Option<String>,
    #[serde(default)]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub sg_template_id: Option<String>,
    #[serde(default)]
    pub smtp_id: Option<String>,
    #[serde(default)]
    pub useragent: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub attempt: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub bounce_classification: Option<String>,
    #[serde(default)]
    pub marketing_campaign_name: Option<String>,
    #[serde(default)]
    pub pool_name: Option<String>,

    #[serde(default)]
    pub tls: Option<i32>,
    #[serde(default)]
    pub asm_group_id: Option<i32>,
    #[serde(default)]
    pub marketing_campaign_id: Option<i32>,
    #[serde(default)]
    pub pool_id: Option<i32>,

    #[serde(default)]
    pub send_at: Option<i64>,
}

/// The shape the SendGrid Event Webhook actually POSTs: identical to
/// [`Event`] except `pool` arrives as a nested `{id, name}` object rather
/// than the flattened `pool_id`/`pool_name` columns the archive stores.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    pub email: String,
    pub timestamp: i64,
    pub event: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sg_event_id: Option<String>,
    #[serde(default)]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub sg_template_id: Option<String>,
    #[serde(default)]
    pub smtp_id: Option<String>,
    #[serde(default)]
    pub useragent: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub attempt: Option<String>,
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub bounce_classification: Option<String>,
    #[serde(default)]
    pub marketing_campaign_name: Option<String>,
    #[serde(default)]
    pub pool: Option<WirePool>,
    #[serde(default)]
    pub tls: Option<i32>,
    #[serde(default)]
    pub asm_group_id: Option<i32>,
    #[serde(default)]
    pub marketing_campaign_id: Option<i32>,
    #[serde(default)]
    pub send_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WirePool {
    #[serde(default)]
    pub id: Option<i32>,
    #[serde(default)]
    pub name: Option<String>,
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        Self {
            email: wire.email,
            timestamp: wire.timestamp,
            event: wire.event,
            category: wire.category,
            sg_event_id: wire.sg_event_id,
            sg_message_id: wire.sg_message_id,
            sg_template_id: wire.sg_template_id,
            smtp_id: wire.smtp_id,
            useragent: wire.useragent,
            ip: wire.ip,
            url: wire.url,
            reason: wire.reason,
            status: wire.status,
            response: wire.response,
            attempt: wire.attempt,
            event_type: wire.event_type,
            bounce_classification: wire.bounce_classification,
            marketing_campaign_name: wire.marketing_campaign_name,
            pool_name: wire.pool.as_ref().and_then(|p| p.name.clone()),
            tls: wire.tls,
            asm_group_id: wire.asm_group_id,
            marketing_campaign_id: wire.marketing_campaign_id,
            pool_id: wire.pool.as_ref().and_then(|p| p.id),
            send_at: wire.send_at,
        }
    }
}

/// Column names in the exact, fixed on-disk order. Never reorder these: the
/// on-disk schema must never change within a version prefix (spec.md §3).
pub const COLUMN_ORDER: &[&str] = &[
    "email",
    "timestamp",
    "event",
    "category",
    "sg_event_id",
    "sg_message_id",
    "sg_template_id",
    "smtp_id",
    "useragent",
    "ip",
    "url",
    "reason",
    "status",
    "response",
    "attempt",
    "type",
    "bounce_classification",
    "marketing_campaign_name",
    "pool_name",
    "tls",
    "asm_group_id",
    "marketing_campaign_id",
    "pool_id",
    "send_at",
];

/// The three columns a row group must have readable to contribute any
/// decoded rows at all (spec.md §4.3 "Read contract").
pub const REQUIRED_COLUMNS: &[&str] = &["email", "timestamp", "event"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_event_flattens_nested_pool() {
        let json = br#"{"email":"a@example.com","timestamp":1700000000,"event":"delivered","pool":{"id":7,"name":"marketing"}}"#;
        let wire: WireEvent = serde_json::from_slice(json).unwrap();
        let event: Event = wire.into();
        assert_eq!(event.pool_id, Some(7));
        assert_eq!(event.pool_name, Some("marketing".to_string()));
    }

    #[test]
    fn wire_event_tolerates_missing_pool() {
        let json = br#"{"email":"a@example.com","timestamp":1700000000,"event":"delivered"}"#;
        let wire: WireEvent = serde_json::from_slice(json).unwrap();
        let event: Event = wire.into();
        assert_eq!(event.pool_id, None);
        assert_eq!(event.pool_name, None);
    }
}
