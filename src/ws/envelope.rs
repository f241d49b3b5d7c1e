//! Wire schema shared by every feed.

use bon::Builder;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{PickFirst, TimestampMilliSeconds, serde_as, skip_serializing_none};
use uuid::Uuid;

use super::error::WsError;
use crate::Result;
use crate::serde_helpers::{StringFromAny, deserialize_payload};

/// Heartbeat probe sent by the client.
pub const PING: &str = "ping";
/// Heartbeat acknowledgment, consumed by the heartbeat monitor.
pub const PONG: &str = "pong";
/// Full subscription set sent after every open.
pub const SUBSCRIBE: &str = "subscribe";
/// Server acknowledgment of a `subscribe`, consumed by the subscription registry.
pub const SUBSCRIPTION_CONFIRMED: &str = "subscription_confirmed";
/// Snapshot request for per-camera and system status feeds.
pub const GET_STATUS: &str = "get_status";
/// Snapshot request for the dashboard summary feed.
pub const GET_SUMMARY: &str = "get_summary";

/// Inbound message types the client consumes itself.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ControlType {
    /// Heartbeat acknowledgment
    Pong,
    /// Subscription acknowledgment
    SubscriptionConfirmed,
}

impl ControlType {
    /// Classify an inbound message type, returning `None` for caller-facing types.
    #[must_use]
    pub fn reserved(msg_type: &str) -> Option<Self> {
        match msg_type {
            PONG => Some(Self::Pong),
            SUBSCRIPTION_CONFIRMED => Some(Self::SubscriptionConfirmed),
            _ => None,
        }
    }
}

/// Decoded `{type, payload, timestamp, id?, source?}` wrapper around every message.
///
/// Inbound timestamps may be RFC 3339 strings or epoch milliseconds; a missing timestamp
/// is filled with the receive time. Outbound envelopes always carry RFC 3339.
#[skip_serializing_none]
#[serde_as]
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct MessageEnvelope {
    /// Message type used as the dispatch key
    #[serde(rename = "type")]
    #[builder(into)]
    pub msg_type: String,
    /// Type-specific body, opaque to the client
    #[serde(default)]
    #[builder(default)]
    pub payload: Value,
    /// When the message was produced
    #[serde_as(as = "PickFirst<(_, TimestampMilliSeconds<i64>)>")]
    #[serde(default = "Utc::now")]
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Optional message identifier
    #[serde_as(as = "Option<StringFromAny>")]
    #[builder(into)]
    pub id: Option<String>,
    /// Optional producer identifier (camera id, model name, ...)
    #[serde_as(as = "Option<StringFromAny>")]
    #[builder(into)]
    pub source: Option<String>,
}

impl MessageEnvelope {
    /// Build an outbound message with a fresh time-ordered id.
    #[must_use]
    pub fn outbound<S: Into<String>>(msg_type: S, payload: Value) -> Self {
        Self::builder()
            .msg_type(msg_type)
            .payload(payload)
            .id(Uuid::now_v7().to_string())
            .build()
    }

    /// Heartbeat probe.
    #[must_use]
    pub fn ping() -> Self {
        Self::outbound(PING, Value::Null)
    }

    /// Subscription request carrying the complete set of data types.
    #[must_use]
    pub fn subscribe(types: &[String]) -> Self {
        Self::outbound(SUBSCRIBE, Value::from(types.to_vec()))
    }

    /// Reserved control type of this message, if any.
    #[must_use]
    pub fn control_type(&self) -> Option<ControlType> {
        ControlType::reserved(&self.msg_type)
    }

    /// Decode the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        deserialize_payload(self.payload.clone())
    }

    /// Encode as a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decode one text frame into envelopes.
///
/// A frame holds either a single envelope or a JSON array of envelopes. Blank frames
/// (server keepalives) decode to nothing.
pub fn decode_frame(text: &str) -> Result<Vec<MessageEnvelope>> {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let envelopes = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(WsError::MessageParse)?
    } else {
        let envelope: MessageEnvelope =
            serde_json::from_str(trimmed).map_err(WsError::MessageParse)?;
        vec![envelope]
    };

    Ok(envelopes)
}
