//! Property Mapper
//!
//! Turns the caller's flat name/value pairs into typed message attributes.
//!
//! Attribute problems are soft: a bad value is dropped and the request goes on.
//! Correlation id and destination problems are hard and abort the request; see
//! [`validate_correlation_id`] and [`validate_destination`].

use crate::broker::{DeliveryMode, Message, PropertyValue};
use crate::error::BridgeError;
use thiserror::Error;

/// Names that steer the bridge itself and never become message attributes
/// (normalized spelling).
pub const CONTROL_HEADERS: &[&str] = &[
    "Jms-usr",
    "Jms-url",
    "Jms-qu1",
    "Jms-qu2",
    "Jms-psw",
    "Jms-publish-only",
    "Jms-timeout",
    "Jms-correlation-id",
    "Statistics",
    "Debug",
    "Content-type",
    "Accept",
    "Content-length",
    "Host",
    "Connection",
    "User-agent",
];

pub const MAX_CORRELATION_ID_BYTES: usize = 4096;
pub const MAX_TYPE_LENGTH: usize = 255;
pub const MAX_PRIORITY: i64 = 9;
pub const MAX_PROPERTY_NAME_LENGTH: usize = 256;
pub const MAX_PROPERTY_VALUE_BYTES: usize = 4096;

const DELIVERY_TIME_PROPERTY: &str = "JMSDeliveryTime";
const GROUP_SEQ_PROPERTY: &str = "JMSXGroupSeq";

/// Standard JMSX property names, matched after normalization
const KNOWN_JMSX: &[&str] = &[
    "JMSXGroupID",
    "JMSXGroupSeq",
    "JMSXUserID",
    "JMSXAppID",
    "JMSXDeliveryCount",
    "JMSXProducerTXID",
    "JMSXConsumerTXID",
    "JMSXRcvTimestamp",
    "JMSXState",
];

/// First character uppercase, the rest lowercase
pub fn normalize_key(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

pub fn is_control_header(normalized: &str) -> bool {
    CONTROL_HEADERS.contains(&normalized)
}

// ============================================================================
// Attribute model
// ============================================================================

/// A validated attribute ready to be put on a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    DeliveryMode(DeliveryMode),
    Type(String),
    /// Milliseconds; 0 means never
    Expiration(i64),
    Priority(u8),
    /// Named message property
    Property(String, PropertyValue),
}

impl AttributeValue {
    pub fn apply_to(&self, message: &mut Message) {
        match self {
            AttributeValue::DeliveryMode(mode) => message.delivery_mode = Some(*mode),
            AttributeValue::Type(tag) => message.message_type = Some(tag.clone()),
            AttributeValue::Expiration(ms) => message.expiration = Some(*ms),
            AttributeValue::Priority(p) => message.priority = Some(*p),
            AttributeValue::Property(name, value) => message.set_property(name.clone(), value.clone()),
        }
    }
}

/// Why an attribute was dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttributeError {
    #[error("delivery mode must be PERSISTENT, NON_PERSISTENT, 1 or 2")]
    InvalidDeliveryMode,

    #[error("type exceeds 255 characters ({0})")]
    TypeTooLong(usize),

    #[error("'{0}' is not an integer")]
    NotAnInteger(String),

    #[error("must be >= 0 milliseconds, got {0}")]
    NegativeMillis(i64),

    #[error("priority must be between 0 and 9, got {0}")]
    PriorityOutOfRange(i64),

    #[error("must be true or false")]
    NotABoolean,

    #[error("name exceeds 256 characters ({0})")]
    NameTooLong(usize),

    #[error("value exceeds 4096 bytes ({0})")]
    ValueTooLarge(usize),
}

/// One caller-supplied attribute and what became of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAttribute {
    /// Normalized external name
    pub name: String,
    pub raw: String,
    pub outcome: Result<AttributeValue, AttributeError>,
}

impl MessageAttribute {
    pub fn is_accepted(&self) -> bool {
        self.outcome.is_ok()
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Map caller name/value pairs to attributes.
///
/// Control names and names that are neither `Jmsx…`, `Jms_…` nor one of the
/// optional message headers are ignored entirely.
pub fn map_attributes<'a, I>(pairs: I) -> Vec<MessageAttribute>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .filter_map(|(name, raw)| {
            let name = normalize_key(name);
            if is_control_header(&name) || !is_attribute_name(&name) {
                return None;
            }
            let outcome = map_one(&name, raw);
            Some(MessageAttribute {
                name,
                raw: raw.to_string(),
                outcome,
            })
        })
        .collect()
}

/// Put every accepted attribute on `message`; returns how many were applied.
pub fn apply(message: &mut Message, attributes: &[MessageAttribute]) -> usize {
    let mut applied = 0;
    for attribute in attributes {
        match &attribute.outcome {
            Ok(value) => {
                value.apply_to(message);
                applied += 1;
            }
            Err(reason) => {
                tracing::debug!(
                    attribute = %attribute.name,
                    value = %attribute.raw,
                    reason = %reason,
                    "Skipping invalid message attribute"
                );
            }
        }
    }
    applied
}

fn is_attribute_name(name: &str) -> bool {
    name.starts_with("Jmsx") || name.starts_with("Jms_") || is_optional_header(name)
}

fn is_optional_header(name: &str) -> bool {
    matches!(
        name,
        "Jmsdeliverymode"
            | "Jmstype"
            | "Jmsexpiration"
            | "Jmspriority"
            | "Jmsdeliverytime"
            | "Jms_tibco_compress"
            | "Jms_tibco_preserve_undelivered"
    )
}

fn map_one(name: &str, raw: &str) -> Result<AttributeValue, AttributeError> {
    let length = name.chars().count();
    if length > MAX_PROPERTY_NAME_LENGTH {
        return Err(AttributeError::NameTooLong(length));
    }
    let value = raw.trim();

    match name {
        "Jmsdeliverymode" => {
            let mode = if value.eq_ignore_ascii_case("NON_PERSISTENT") || value == "1" {
                DeliveryMode::NonPersistent
            } else if value.eq_ignore_ascii_case("PERSISTENT") || value == "2" {
                DeliveryMode::Persistent
            } else {
                return Err(AttributeError::InvalidDeliveryMode);
            };
            Ok(AttributeValue::DeliveryMode(mode))
        }
        "Jmstype" => {
            let length = value.chars().count();
            if length > MAX_TYPE_LENGTH {
                return Err(AttributeError::TypeTooLong(length));
            }
            Ok(AttributeValue::Type(value.to_string()))
        }
        "Jmsexpiration" => Ok(AttributeValue::Expiration(non_negative_millis(value)?)),
        "Jmspriority" => {
            let priority = parse_integer(value)?;
            if !(0..=MAX_PRIORITY).contains(&priority) {
                return Err(AttributeError::PriorityOutOfRange(priority));
            }
            Ok(AttributeValue::Priority(priority as u8))
        }
        "Jmsdeliverytime" => Ok(AttributeValue::Property(
            DELIVERY_TIME_PROPERTY.to_string(),
            PropertyValue::Long(non_negative_millis(value)?),
        )),
        "Jms_tibco_compress" | "Jms_tibco_preserve_undelivered" => {
            let flag = if value.eq_ignore_ascii_case("true") {
                true
            } else if value.eq_ignore_ascii_case("false") {
                false
            } else {
                return Err(AttributeError::NotABoolean);
            };
            Ok(AttributeValue::Property(
                property_name(name),
                PropertyValue::Bool(flag),
            ))
        }
        _ => {
            let property = property_name(name);
            if property == GROUP_SEQ_PROPERTY {
                let seq = value
                    .parse::<i32>()
                    .map_err(|_| AttributeError::NotAnInteger(value.to_string()))?;
                return Ok(AttributeValue::Property(property, PropertyValue::Int(seq)));
            }
            if raw.len() > MAX_PROPERTY_VALUE_BYTES {
                return Err(AttributeError::ValueTooLarge(raw.len()));
            }
            Ok(AttributeValue::Property(
                property,
                PropertyValue::String(raw.to_string()),
            ))
        }
    }
}

fn parse_integer(value: &str) -> Result<i64, AttributeError> {
    value
        .parse::<i64>()
        .map_err(|_| AttributeError::NotAnInteger(value.to_string()))
}

fn non_negative_millis(value: &str) -> Result<i64, AttributeError> {
    let ms = parse_integer(value)?;
    if ms < 0 {
        return Err(AttributeError::NegativeMillis(ms));
    }
    Ok(ms)
}

/// Broker spelling of a normalized `Jmsx…` / `Jms_…` name
fn property_name(normalized: &str) -> String {
    if let Some(known) = KNOWN_JMSX
        .iter()
        .find(|known| known.eq_ignore_ascii_case(normalized))
    {
        return known.to_string();
    }
    match normalized.strip_prefix("Jmsx") {
        Some(rest) => format!("JMSX{}", rest.to_uppercase()),
        None => normalized.to_uppercase(),
    }
}

// ============================================================================
// Hard validation
// ============================================================================

/// Correlation ids must be non-blank and at most 4096 bytes
pub fn validate_correlation_id(correlation_id: &str) -> Result<(), BridgeError> {
    if correlation_id.trim().is_empty() {
        return Err(BridgeError::InvalidCorrelationId("empty".to_string()));
    }
    if correlation_id.len() > MAX_CORRELATION_ID_BYTES {
        return Err(BridgeError::InvalidCorrelationId(format!(
            "{} bytes exceeds the {} byte limit",
            correlation_id.len(),
            MAX_CORRELATION_ID_BYTES
        )));
    }
    Ok(())
}

/// Queue names must be non-blank and free of wildcard tokens
pub fn validate_destination(name: &str) -> Result<(), BridgeError> {
    let reason = if name.trim().is_empty() {
        "name is blank"
    } else if name.contains('*') || name.contains('>') {
        "wildcards are not allowed"
    } else {
        return Ok(());
    };
    Err(BridgeError::InvalidDestination {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(name: &str, value: &str) -> MessageAttribute {
        let mut mapped = map_attributes([(name, value)]);
        assert_eq!(mapped.len(), 1, "{} was not considered", name);
        mapped.remove(0)
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("JMS-QU1"), "Jms-qu1");
        assert_eq!(normalize_key("jmsxGroupID"), "Jmsxgroupid");
        assert_eq!(normalize_key(""), "");
    }

    #[test]
    fn test_control_and_unrelated_headers_ignored() {
        let mapped = map_attributes([
            ("JMS-URL", "memory://local"),
            ("JMS-CORRELATION-ID", "abc"),
            ("Content-Type", "application/json"),
            ("X-Custom", "1"),
        ]);
        assert!(mapped.is_empty());
    }

    #[test]
    fn test_priority_bounds() {
        for p in 0..=9 {
            let attr = single("JMSPriority", &p.to_string());
            assert_eq!(attr.outcome, Ok(AttributeValue::Priority(p as u8)));
        }
        assert_eq!(
            single("JMSPriority", "10").outcome,
            Err(AttributeError::PriorityOutOfRange(10))
        );
        assert_eq!(
            single("JMSPriority", "-1").outcome,
            Err(AttributeError::PriorityOutOfRange(-1))
        );
        assert!(single("JMSPriority", "high").outcome.is_err());
    }

    #[test]
    fn test_rejected_priority_leaves_message_untouched() {
        let mut message = Message::text("x");
        let attrs = map_attributes([("JMSPriority", "10"), ("JMSType", "Order")]);
        assert_eq!(apply(&mut message, &attrs), 1);
        assert_eq!(message.priority, None);
        assert_eq!(message.message_type.as_deref(), Some("Order"));
    }

    #[test]
    fn test_delivery_mode_values() {
        for (raw, mode) in [
            ("persistent", DeliveryMode::Persistent),
            (" NON_PERSISTENT ", DeliveryMode::NonPersistent),
            ("1", DeliveryMode::NonPersistent),
            ("2", DeliveryMode::Persistent),
        ] {
            assert_eq!(
                single("JMSDeliveryMode", raw).outcome,
                Ok(AttributeValue::DeliveryMode(mode))
            );
        }
        assert_eq!(
            single("JMSDeliveryMode", "3").outcome,
            Err(AttributeError::InvalidDeliveryMode)
        );
    }

    #[test]
    fn test_type_length_limit() {
        assert!(single("JMSType", &"t".repeat(255)).is_accepted());
        assert_eq!(
            single("JMSType", &"t".repeat(256)).outcome,
            Err(AttributeError::TypeTooLong(256))
        );
    }

    #[test]
    fn test_expiration_and_delivery_time() {
        assert_eq!(
            single("JMSExpiration", "60000").outcome,
            Ok(AttributeValue::Expiration(60000))
        );
        assert_eq!(
            single("JMSExpiration", "-5").outcome,
            Err(AttributeError::NegativeMillis(-5))
        );
        assert_eq!(
            single("JMSDeliveryTime", "1000").outcome,
            Ok(AttributeValue::Property(
                "JMSDeliveryTime".to_string(),
                PropertyValue::Long(1000)
            ))
        );
    }

    #[test]
    fn test_vendor_flags() {
        assert_eq!(
            single("JMS_TIBCO_COMPRESS", "TRUE").outcome,
            Ok(AttributeValue::Property(
                "JMS_TIBCO_COMPRESS".to_string(),
                PropertyValue::Bool(true)
            ))
        );
        assert_eq!(
            single("jms_tibco_preserve_undelivered", "yes").outcome,
            Err(AttributeError::NotABoolean)
        );
    }

    #[test]
    fn test_group_properties() {
        assert_eq!(
            single("JMSXGroupID", "orders-1").outcome,
            Ok(AttributeValue::Property(
                "JMSXGroupID".to_string(),
                PropertyValue::String("orders-1".to_string())
            ))
        );
        assert_eq!(
            single("JMSXGroupSeq", "7").outcome,
            Ok(AttributeValue::Property(
                "JMSXGroupSeq".to_string(),
                PropertyValue::Int(7)
            ))
        );
        assert!(single("JMSXGroupSeq", "seven").outcome.is_err());
    }

    #[test]
    fn test_passthrough_names_and_limits() {
        let attr = single("JMSXTrackingCode", "abc");
        assert_eq!(
            attr.outcome,
            Ok(AttributeValue::Property(
                "JMSXTRACKINGCODE".to_string(),
                PropertyValue::String("abc".to_string())
            ))
        );

        let attr = single("jms_custom_flag", "on");
        assert_eq!(
            attr.outcome,
            Ok(AttributeValue::Property(
                "JMS_CUSTOM_FLAG".to_string(),
                PropertyValue::String("on".to_string())
            ))
        );

        let too_big = "v".repeat(MAX_PROPERTY_VALUE_BYTES + 1);
        assert_eq!(
            single("Jms_big", &too_big).outcome,
            Err(AttributeError::ValueTooLarge(MAX_PROPERTY_VALUE_BYTES + 1))
        );

        let long_name = format!("Jms_{}", "n".repeat(MAX_PROPERTY_NAME_LENGTH));
        assert!(matches!(
            single(&long_name, "v").outcome,
            Err(AttributeError::NameTooLong(_))
        ));
    }

    #[test]
    fn test_each_attribute_fails_independently() {
        let mut message = Message::text("x");
        let attrs = map_attributes([
            ("JMSPriority", "4"),
            ("JMSExpiration", "soon"),
            ("JMSXGroupID", "g1"),
            ("JMS_TIBCO_COMPRESS", "maybe"),
        ]);
        assert_eq!(attrs.len(), 4);
        assert_eq!(apply(&mut message, &attrs), 2);
        assert_eq!(message.priority, Some(4));
        assert_eq!(message.expiration, None);
        assert_eq!(
            message.property("JMSXGroupID"),
            Some(&PropertyValue::String("g1".to_string()))
        );
        assert!(message.property("JMS_TIBCO_COMPRESS").is_none());
    }

    #[test]
    fn test_correlation_id_limit() {
        assert!(validate_correlation_id("abc").is_ok());
        assert!(validate_correlation_id(&"c".repeat(MAX_CORRELATION_ID_BYTES)).is_ok());
        assert!(matches!(
            validate_correlation_id(&"c".repeat(MAX_CORRELATION_ID_BYTES + 1)),
            Err(BridgeError::InvalidCorrelationId(_))
        ));
        assert!(validate_correlation_id("   ").is_err());
    }

    #[test]
    fn test_destination_validation() {
        assert!(validate_destination("Q1").is_ok());
        assert!(validate_destination("orders.in").is_ok());
        assert!(validate_destination(" ").is_err());
        assert!(validate_destination("orders.*").is_err());
        assert!(matches!(
            validate_destination("orders.>"),
            Err(BridgeError::InvalidDestination { .. })
        ));
    }
}
