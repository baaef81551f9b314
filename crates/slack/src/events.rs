//! Events API payload model.
//!
//! A Socket Mode `events_api` frame carries a payload that nests two tagged
//! unions: the outer Events API envelope (`event_callback`, `url_verification`,
//! `app_rate_limited`) and, for callbacks, the inner event keyed by its own
//! `type`. Both are decoded into closed enums here so that unknown shapes end up
//! in an explicit variant (or a [`DecodeError`]) instead of panicking later.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventsApiEnvelope {
    /// `event_callback`; the only outer type that must be acknowledged.
    Callback(CallbackEvent),
    UrlVerification,
    AppRateLimited,
}

impl EventsApiEnvelope {
    pub fn decode(payload: &Value) -> Result<Self, DecodeError> {
        let raw = RawEventsApiPayload::deserialize(payload).map_err(DecodeError::Envelope)?;

        match raw.outer_type.as_str() {
            "event_callback" => {
                let event = raw.event.as_ref().ok_or(DecodeError::MissingInnerEvent)?;
                Ok(Self::Callback(CallbackEvent {
                    team_id: raw.team_id,
                    event_id: raw.event_id,
                    inner: InnerEvent::decode(event)?,
                }))
            }
            "url_verification" => Ok(Self::UrlVerification),
            "app_rate_limited" => Ok(Self::AppRateLimited),
            other => Err(DecodeError::UnsupportedOuterType(other.to_owned())),
        }
    }

    pub fn outer_type(&self) -> &'static str {
        match self {
            Self::Callback(_) => "event_callback",
            Self::UrlVerification => "url_verification",
            Self::AppRateLimited => "app_rate_limited",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackEvent {
    pub team_id: Option<String>,
    pub event_id: Option<String>,
    pub inner: InnerEvent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InnerEvent {
    AppMention(AppMentionEvent),
    Message(MessageEvent),
    MemberJoinedChannel(MemberJoinedChannelEvent),
    Unrecognized { event_type: String },
}

impl InnerEvent {
    pub fn decode(event: &Value) -> Result<Self, DecodeError> {
        let event_type = event
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingInnerEventType)?;

        let inner_error =
            |source| DecodeError::InnerEvent { event_type: event_type.to_owned(), source };
        match event_type {
            "app_mention" => {
                AppMentionEvent::deserialize(event).map(Self::AppMention).map_err(inner_error)
            }
            "message" => MessageEvent::deserialize(event).map(Self::Message).map_err(inner_error),
            "member_joined_channel" => MemberJoinedChannelEvent::deserialize(event)
                .map(Self::MemberJoinedChannel)
                .map_err(inner_error),
            other => Ok(Self::Unrecognized { event_type: other.to_owned() }),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            Self::AppMention(_) => "app_mention",
            Self::Message(_) => "message",
            Self::MemberJoinedChannel(_) => "member_joined_channel",
            Self::Unrecognized { event_type } => event_type,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AppMentionEvent {
    pub channel: String,
    #[serde(rename = "ts")]
    pub timestamp: String,
    /// `bot_id` of the author; empty when a human mentioned the app.
    #[serde(rename = "bot_id", default, deserialize_with = "empty_if_null")]
    pub author_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MessageEvent {
    pub channel: String,
    #[serde(rename = "ts")]
    pub timestamp: String,
    #[serde(rename = "bot_id", default, deserialize_with = "empty_if_null")]
    pub author_id: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub text: String,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl MessageEvent {
    /// Slack omits `subtype` on ordinary messages; an explicit `"message"`
    /// counts as ordinary too. Edits, deletes, joins and topic changes do not.
    pub fn is_plain(&self) -> bool {
        self.subtype.as_deref().unwrap_or("message") == "message"
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct MemberJoinedChannelEvent {
    #[serde(rename = "user")]
    pub user_id: String,
    #[serde(rename = "channel")]
    pub channel_id: String,
}

/// A `chat.postMessage` request produced by the dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyAction {
    pub channel: String,
    pub thread_ts: Option<String>,
    pub text: String,
}

impl ReplyAction {
    pub fn in_thread(
        channel: impl Into<String>,
        thread_ts: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self { channel: channel.into(), thread_ts: Some(thread_ts.into()), text: text.into() }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("events api payload is malformed: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("unsupported events api envelope type `{0}`")]
    UnsupportedOuterType(String),
    #[error("event_callback payload has no inner event")]
    MissingInnerEvent,
    #[error("inner event has no `type` field")]
    MissingInnerEventType,
    #[error("inner `{event_type}` event is malformed: {source}")]
    InnerEvent {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawEventsApiPayload {
    #[serde(rename = "type")]
    outer_type: String,
    #[serde(default)]
    team_id: Option<String>,
    #[serde(default)]
    event_id: Option<String>,
    #[serde(default)]
    event: Option<Value>,
}

fn empty_if_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Option::unwrap_or_default)
}
