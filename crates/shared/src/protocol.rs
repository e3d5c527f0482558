use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::{GeoPoint, MusicianId, RequestId, UserId},
    error::ErrorCode,
};

/// Named events exchanged over the realtime channel. The names are the wire
/// contract shared with the platform backend.
pub mod events {
    /// Outbound: start a musician search for an event.
    pub const NEW_EVENT_REQUEST: &str = "new_event_request";
    /// Outbound: the client abandoned an in-flight search.
    pub const REQUEST_CANCELLED: &str = "request_cancelled";
    /// Inbound: a musician accepted the request.
    pub const MUSICIAN_ACCEPTED: &str = "musician_accepted";
    /// Inbound: the search exhausted without a match.
    pub const MUSICIAN_NOT_FOUND: &str = "musician_not_found";
    /// Inbound: another musician claimed the request first.
    pub const MUSICIAN_REQUEST_TAKEN: &str = "musician_request_taken";
    /// Inbound: default name for transport-level failure events.
    pub const REQUEST_ERROR: &str = "request_error";
}

/// Generic named-event envelope carried over the websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// A caller-supplied search request. `id` is the correlation key for every
/// event the server sends back; the rest is forwarded opaquely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicianRequest {
    pub id: RequestId,
    pub instrument: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Musician {
    pub id: MusicianId,
    pub name: String,
    pub instrument: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MusicianAcceptedPayload {
    pub request_id: RequestId,
    pub musician: Musician,
}

/// Payload of `musician_not_found` and `musician_request_taken`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestResolvedPayload {
    pub request_id: RequestId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestErrorPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCancelledPayload {
    pub request_id: RequestId,
}
