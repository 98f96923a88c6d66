//! NIP-01 wire messages exchanged with relays.
//!
//! Both directions are JSON arrays whose first element names the message:
//!
//! - client → relay: `["REQ", <sub id>, <filter>...]`, `["CLOSE", <sub id>]`
//! - relay → client: `["EVENT", <sub id>, <event>]`, `["EOSE", <sub id>]`,
//!   `["CLOSED", <sub id>, <reason>]`, `["NOTICE", <message>]`,
//!   `["OK", <event id>, <accepted>, <message>]`

use serde_json::Value;

use crate::{Event, Filter, NostrError};

/// A message sent to a relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Open a subscription.
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// Close a subscription.
    Close { subscription_id: String },
}

impl ClientMessage {
    /// Serialize to the JSON array wire form.
    pub fn to_json(&self) -> Result<String, NostrError> {
        let value = match self {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut parts = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    parts.push(serde_json::to_value(filter)?);
                }
                Value::Array(parts)
            }
            ClientMessage::Close { subscription_id } => Value::Array(vec![
                Value::String("CLOSE".to_string()),
                Value::String(subscription_id.clone()),
            ]),
        };
        Ok(serde_json::to_string(&value)?)
    }
}

/// A message received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// An event matching a subscription.
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    /// End of stored events for a subscription.
    EndOfStoredEvents { subscription_id: String },
    /// The relay closed a subscription.
    Closed {
        subscription_id: String,
        message: String,
    },
    /// A human-readable notice.
    Notice { message: String },
    /// Result of publishing an event.
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
}

impl RelayMessage {
    /// Parse a relay message from its JSON array wire form.
    pub fn from_json(text: &str) -> Result<Self, NostrError> {
        let value: Value = serde_json::from_str(text)?;
        let Value::Array(parts) = value else {
            return Err(NostrError::InvalidMessage(format!("not an array: {text}")));
        };

        let string_at = |i: usize| -> Result<String, NostrError> {
            parts
                .get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| NostrError::InvalidMessage(format!("missing field {i}: {text}")))
        };

        match string_at(0)?.as_str() {
            "EVENT" => {
                let subscription_id = string_at(1)?;
                let raw = parts
                    .get(2)
                    .cloned()
                    .ok_or_else(|| NostrError::InvalidMessage(format!("EVENT without body: {text}")))?;
                let event: Event = serde_json::from_value(raw)?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event: Box::new(event),
                })
            }
            "EOSE" => Ok(RelayMessage::EndOfStoredEvents {
                subscription_id: string_at(1)?,
            }),
            "CLOSED" => Ok(RelayMessage::Closed {
                subscription_id: string_at(1)?,
                message: string_at(2).unwrap_or_default(),
            }),
            "NOTICE" => Ok(RelayMessage::Notice {
                message: string_at(1)?,
            }),
            "OK" => Ok(RelayMessage::Ok {
                event_id: string_at(1)?,
                accepted: parts.get(2).and_then(Value::as_bool).unwrap_or(false),
                message: string_at(3).unwrap_or_default(),
            }),
            other => Err(NostrError::InvalidMessage(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_req_serialization() {
        let msg = ClientMessage::Req {
            subscription_id: "sub1".to_string(),
            filters: vec![Filter::new().kinds([1]), Filter::new().ids(["x"])],
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"["REQ","sub1",{"kinds":[1]},{"ids":["x"]}]"#
        );
    }

    #[test]
    fn test_close_serialization() {
        let msg = ClientMessage::Close {
            subscription_id: "sub1".to_string(),
        };
        assert_eq!(msg.to_json().unwrap(), r#"["CLOSE","sub1"]"#);
    }

    #[test]
    fn test_parse_event() {
        let text = r#"["EVENT","sub1",{"id":"a","pubkey":"b","created_at":1,"kind":1,"tags":[],"content":"hi","sig":"s"}]"#;
        match RelayMessage::from_json(text).unwrap() {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(event.content, "hi");
            }
            other => panic!("expected EVENT, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_eose() {
        assert_eq!(
            RelayMessage::from_json(r#"["EOSE","sub1"]"#).unwrap(),
            RelayMessage::EndOfStoredEvents {
                subscription_id: "sub1".to_string()
            }
        );
    }

    #[test]
    fn test_parse_closed_and_notice() {
        assert_eq!(
            RelayMessage::from_json(r#"["CLOSED","sub1","rate-limited: slow down"]"#).unwrap(),
            RelayMessage::Closed {
                subscription_id: "sub1".to_string(),
                message: "rate-limited: slow down".to_string()
            }
        );
        assert_eq!(
            RelayMessage::from_json(r#"["NOTICE","hello"]"#).unwrap(),
            RelayMessage::Notice {
                message: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_parse_ok() {
        assert_eq!(
            RelayMessage::from_json(r#"["OK","id1",true,""]"#).unwrap(),
            RelayMessage::Ok {
                event_id: "id1".to_string(),
                accepted: true,
                message: String::new()
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(RelayMessage::from_json(r#"["AUTH","challenge"]"#).is_err());
        assert!(RelayMessage::from_json(r#"{"not":"array"}"#).is_err());
        assert!(RelayMessage::from_json(r#"["EVENT","sub1"]"#).is_err());
        assert!(RelayMessage::from_json("not json").is_err());
    }
}
