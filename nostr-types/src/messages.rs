//! Client and relay wire messages.
//!
//! Every frame is a JSON array whose first element names the message type.
//! Client messages are parsed by hand so that a malformed frame yields a
//! precise [`MessageError`] instead of a generic serde failure.

use serde_json::{json, Value};

use crate::{Event, Filter, MessageError};

/// Messages sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Box<Event>),
    /// `["REQ", <subscription id>, <filter>...]`
    Req {
        /// Client-chosen subscription id
        subscription_id: String,
        /// Filters (disjunction)
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <subscription id>]`
    Close {
        /// Subscription to cancel
        subscription_id: String,
    },
    /// `["COUNT", <subscription id>, <filter>...]` (NIP-45)
    Count {
        /// Client-chosen request id
        subscription_id: String,
        /// Filters (disjunction)
        filters: Vec<Filter>,
    },
    /// `["AUTH", <event>]` (NIP-42), carried opaquely
    Auth(Value),
    /// `["NEG-OPEN", <subscription id>, <filter>, <hex message>]` (NIP-77)
    NegOpen {
        /// Sync session id
        subscription_id: String,
        /// Filter selecting the relay-side set
        filter: Filter,
        /// Initial negentropy message, hex encoded
        message: String,
    },
    /// `["NEG-MSG", <subscription id>, <hex message>]`
    NegMsg {
        /// Sync session id
        subscription_id: String,
        /// Negentropy message, hex encoded
        message: String,
    },
    /// `["NEG-CLOSE", <subscription id>]`
    NegClose {
        /// Sync session id
        subscription_id: String,
    },
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(text)?;
        let items = value
            .as_array()
            .ok_or_else(|| MessageError::InvalidMessage("expected a JSON array".into()))?;
        let kind = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::InvalidMessage("missing message type".into()))?;

        match kind {
            "EVENT" => {
                let event = items
                    .get(1)
                    .ok_or_else(|| MessageError::InvalidMessage("EVENT without event".into()))?;
                let event: Event = serde_json::from_value(event.clone())?;
                Ok(Self::Event(Box::new(event)))
            }
            "REQ" => Ok(Self::Req {
                subscription_id: string_at(items, 1, "subscription id")?,
                filters: items[2..].iter().map(Filter::from_value).collect(),
            }),
            "COUNT" => Ok(Self::Count {
                subscription_id: string_at(items, 1, "subscription id")?,
                filters: items[2..].iter().map(Filter::from_value).collect(),
            }),
            "CLOSE" => Ok(Self::Close {
                subscription_id: string_at(items, 1, "subscription id")?,
            }),
            "AUTH" => Ok(Self::Auth(items.get(1).cloned().unwrap_or(Value::Null))),
            "NEG-OPEN" => {
                let filter = items
                    .get(2)
                    .ok_or_else(|| MessageError::InvalidMessage("NEG-OPEN without filter".into()))?;
                Ok(Self::NegOpen {
                    subscription_id: string_at(items, 1, "subscription id")?,
                    filter: Filter::from_value(filter),
                    message: string_at(items, 3, "negentropy message")?,
                })
            }
            "NEG-MSG" => Ok(Self::NegMsg {
                subscription_id: string_at(items, 1, "subscription id")?,
                message: string_at(items, 2, "negentropy message")?,
            }),
            "NEG-CLOSE" => Ok(Self::NegClose {
                subscription_id: string_at(items, 1, "subscription id")?,
            }),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req {
                subscription_id,
                filters,
            } => with_filters("REQ", subscription_id, filters),
            Self::Count {
                subscription_id,
                filters,
            } => with_filters("COUNT", subscription_id, filters),
            Self::Close { subscription_id } => json!(["CLOSE", subscription_id]),
            Self::Auth(payload) => json!(["AUTH", payload]),
            Self::NegOpen {
                subscription_id,
                filter,
                message,
            } => json!(["NEG-OPEN", subscription_id, filter, message]),
            Self::NegMsg {
                subscription_id,
                message,
            } => json!(["NEG-MSG", subscription_id, message]),
            Self::NegClose { subscription_id } => json!(["NEG-CLOSE", subscription_id]),
        };
        value.to_string()
    }
}

/// Messages sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// `["EVENT", <subscription id>, <event>]`
    Event {
        /// Subscription the event matched
        subscription_id: String,
        /// The event
        event: Box<Event>,
    },
    /// `["OK", <event id>, <accepted>, <message>]`
    Ok {
        /// Id of the event being acknowledged
        event_id: String,
        /// Whether the relay accepted it
        accepted: bool,
        /// Machine-readable prefix plus human text, may be empty
        message: String,
    },
    /// `["EOSE", <subscription id>]`
    Eose {
        /// Subscription whose stored events are exhausted
        subscription_id: String,
    },
    /// `["CLOSED", <subscription id>, <message>]`
    Closed {
        /// Subscription the relay refused or ended
        subscription_id: String,
        /// Reason
        message: String,
    },
    /// `["NOTICE", <message>]`
    Notice {
        /// Human-readable text
        message: String,
    },
    /// `["COUNT", <subscription id>, {"count": n}]`
    Count {
        /// Request id
        subscription_id: String,
        /// Number of matching stored events
        count: u64,
    },
    /// `["NEG-MSG", <subscription id>, <hex message>]`
    NegMsg {
        /// Sync session id
        subscription_id: String,
        /// Negentropy message, hex encoded
        message: String,
    },
    /// `["NEG-ERR", <subscription id>, <reason>]`
    NegErr {
        /// Sync session id
        subscription_id: String,
        /// `blocked: ...` or `error: ...`
        reason: String,
    },
}

impl RelayMessage {
    /// Shorthand for a NOTICE.
    pub fn notice(message: impl Into<String>) -> Self {
        Self::Notice {
            message: message.into(),
        }
    }

    /// Shorthand for a CLOSED.
    pub fn closed(subscription_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Closed {
            subscription_id: subscription_id.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an OK.
    pub fn ok(event_id: impl Into<String>, accepted: bool, message: impl Into<String>) -> Self {
        Self::Ok {
            event_id: event_id.into(),
            accepted,
            message: message.into(),
        }
    }

    /// Encode as a text frame.
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Event {
                subscription_id,
                event,
            } => json!(["EVENT", subscription_id, event]),
            Self::Ok {
                event_id,
                accepted,
                message,
            } => json!(["OK", event_id, accepted, message]),
            Self::Eose { subscription_id } => json!(["EOSE", subscription_id]),
            Self::Closed {
                subscription_id,
                message,
            } => json!(["CLOSED", subscription_id, message]),
            Self::Notice { message } => json!(["NOTICE", message]),
            Self::Count {
                subscription_id,
                count,
            } => json!(["COUNT", subscription_id, {"count": count}]),
            Self::NegMsg {
                subscription_id,
                message,
            } => json!(["NEG-MSG", subscription_id, message]),
            Self::NegErr {
                subscription_id,
                reason,
            } => json!(["NEG-ERR", subscription_id, reason]),
        };
        value.to_string()
    }

    /// Parse a text frame. Used by clients and tests.
    pub fn from_json(text: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(text)?;
        let items = value
            .as_array()
            .ok_or_else(|| MessageError::InvalidMessage("expected a JSON array".into()))?;
        let kind = items
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| MessageError::InvalidMessage("missing message type".into()))?;

        match kind {
            "EVENT" => {
                let event = items
                    .get(2)
                    .ok_or_else(|| MessageError::InvalidMessage("EVENT without event".into()))?;
                Ok(Self::Event {
                    subscription_id: string_at(items, 1, "subscription id")?,
                    event: Box::new(serde_json::from_value(event.clone())?),
                })
            }
            "OK" => Ok(Self::Ok {
                event_id: string_at(items, 1, "event id")?,
                accepted: items
                    .get(2)
                    .and_then(Value::as_bool)
                    .ok_or_else(|| MessageError::InvalidMessage("OK without status".into()))?,
                message: string_at(items, 3, "message").unwrap_or_default(),
            }),
            "EOSE" => Ok(Self::Eose {
                subscription_id: string_at(items, 1, "subscription id")?,
            }),
            "CLOSED" => Ok(Self::Closed {
                subscription_id: string_at(items, 1, "subscription id")?,
                message: string_at(items, 2, "message").unwrap_or_default(),
            }),
            "NOTICE" => Ok(Self::Notice {
                message: string_at(items, 1, "message")?,
            }),
            "COUNT" => Ok(Self::Count {
                subscription_id: string_at(items, 1, "subscription id")?,
                count: items
                    .get(2)
                    .and_then(|v| v.get("count"))
                    .and_then(Value::as_u64)
                    .ok_or_else(|| MessageError::InvalidMessage("COUNT without count".into()))?,
            }),
            "NEG-MSG" => Ok(Self::NegMsg {
                subscription_id: string_at(items, 1, "subscription id")?,
                message: string_at(items, 2, "negentropy message")?,
            }),
            "NEG-ERR" => Ok(Self::NegErr {
                subscription_id: string_at(items, 1, "subscription id")?,
                reason: string_at(items, 2, "reason")?,
            }),
            other => Err(MessageError::UnknownType(other.to_string())),
        }
    }
}

fn string_at(items: &[Value], index: usize, what: &str) -> Result<String, MessageError> {
    items
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| MessageError::InvalidMessage(format!("missing or invalid {what}")))
}

fn with_filters(kind: &str, subscription_id: &str, filters: &[Filter]) -> Value {
    let mut items = vec![json!(kind), json!(subscription_id)];
    items.extend(filters.iter().map(Filter::to_value));
    Value::Array(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Tag, UnsignedEvent};
    use secp256k1::{Keypair, SECP256K1};

    fn sample_event() -> Event {
        let keys = Keypair::from_seckey_slice(SECP256K1, &[0x42; 32]).unwrap();
        UnsignedEvent::new(1_700_000_000, 1, "hello")
            .tag(Tag::new(["t", "test"]))
            .sign(&keys)
    }

    #[test]
    fn parse_event() {
        let event = sample_event();
        let text = json!(["EVENT", event]).to_string();
        match ClientMessage::from_json(&text).unwrap() {
            ClientMessage::Event(parsed) => assert_eq!(*parsed, event),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parse_req_with_filters() {
        let msg = ClientMessage::from_json(r#"["REQ","sub1",{"kinds":[1]},{"authors":["ab"]}]"#)
            .unwrap();
        match msg {
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                assert_eq!(subscription_id, "sub1");
                assert_eq!(filters.len(), 2);
                assert_eq!(filters[0], Filter::new().kinds([1]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn req_with_bad_filter_still_parses() {
        let msg = ClientMessage::from_json(r#"["REQ","s",{"bogus":true}]"#).unwrap();
        let ClientMessage::Req { filters, .. } = msg else {
            panic!("expected REQ");
        };
        assert!(filters[0].is_unsatisfiable());
    }

    #[test]
    fn parse_close_count_and_neg() {
        assert_eq!(
            ClientMessage::from_json(r#"["CLOSE","s"]"#).unwrap(),
            ClientMessage::Close {
                subscription_id: "s".into()
            }
        );
        assert!(matches!(
            ClientMessage::from_json(r#"["COUNT","c",{}]"#).unwrap(),
            ClientMessage::Count { .. }
        ));
        assert_eq!(
            ClientMessage::from_json(r#"["NEG-OPEN","n",{"kinds":[1]},"6100"]"#).unwrap(),
            ClientMessage::NegOpen {
                subscription_id: "n".into(),
                filter: Filter::new().kinds([1]),
                message: "6100".into(),
            }
        );
        assert_eq!(
            ClientMessage::from_json(r#"["NEG-CLOSE","n"]"#).unwrap(),
            ClientMessage::NegClose {
                subscription_id: "n".into()
            }
        );
    }

    #[test]
    fn malformed_frames() {
        assert!(matches!(
            ClientMessage::from_json("not json"),
            Err(MessageError::Json(_))
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"{"type":"REQ"}"#),
            Err(MessageError::InvalidMessage(_))
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"["REQ"]"#),
            Err(MessageError::InvalidMessage(_))
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"["PING"]"#),
            Err(MessageError::UnknownType(t)) if t == "PING"
        ));
        assert!(matches!(
            ClientMessage::from_json(r#"["EVENT",{"id":1}]"#),
            Err(MessageError::Json(_))
        ));
    }

    #[test]
    fn relay_message_encoding() {
        assert_eq!(
            RelayMessage::ok("abcd", true, "").to_json(),
            r#"["OK","abcd",true,""]"#
        );
        assert_eq!(
            RelayMessage::Eose {
                subscription_id: "s".into()
            }
            .to_json(),
            r#"["EOSE","s"]"#
        );
        assert_eq!(
            RelayMessage::Count {
                subscription_id: "c".into(),
                count: 3
            }
            .to_json(),
            r#"["COUNT","c",{"count":3}]"#
        );
        assert_eq!(
            RelayMessage::NegErr {
                subscription_id: "n".into(),
                reason: "blocked: too many".into()
            }
            .to_json(),
            r#"["NEG-ERR","n","blocked: too many"]"#
        );
    }

    #[test]
    fn relay_message_parse_back() {
        let event = sample_event();
        let msg = RelayMessage::Event {
            subscription_id: "s".into(),
            event: Box::new(event),
        };
        assert_eq!(RelayMessage::from_json(&msg.to_json()).unwrap(), msg);

        let closed = RelayMessage::closed("s", "error: too many filters");
        assert_eq!(RelayMessage::from_json(&closed.to_json()).unwrap(), closed);
    }

    #[test]
    fn client_message_encoding() {
        let msg = ClientMessage::Req {
            subscription_id: "s".into(),
            filters: vec![Filter::new().kinds([1]).limit(5)],
        };
        assert_eq!(msg.to_json(), r#"["REQ","s",{"kinds":[1],"limit":5}]"#);
        assert_eq!(ClientMessage::from_json(&msg.to_json()).unwrap(), msg);
    }
}
