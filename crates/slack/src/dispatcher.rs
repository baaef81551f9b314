//! Event dispatch: the single consumer of a session's event stream.
//!
//! For every `events_api` request the dispatcher decodes the Events API
//! envelope, acknowledges `event_callback` envelopes exactly once (before any
//! reply is attempted, and regardless of how the reply goes), then routes the
//! inner event to at most one [`ReplyAction`]. Nothing that happens here can
//! stop the session; failures are logged and the loop moves on.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::client::MessagePoster;
use crate::events::{EventsApiEnvelope, InnerEvent, ReplyAction};
use crate::socket::{Acknowledger, SessionEvents, SocketRequest, TransportEvent};

pub const MENTION_REPLY: &str = "Yes, hello.";

/// What an inner event asks the bot to do. Pure; no I/O.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Reply(ReplyAction),
    /// Recognized event that deliberately gets no reply.
    Suppressed { event_type: &'static str, reason: &'static str },
    MemberJoined { user_id: String, channel_id: String },
    Ignored { event_type: String },
}

pub fn route(event: &InnerEvent) -> Route {
    match event {
        InnerEvent::AppMention(mention) if mention.author_id.is_empty() => Route::Reply(
            ReplyAction::in_thread(&mention.channel, &mention.timestamp, MENTION_REPLY),
        ),
        InnerEvent::AppMention(_) => {
            Route::Suppressed { event_type: "app_mention", reason: "authored by a bot" }
        }
        InnerEvent::Message(message) if !message.author_id.is_empty() => {
            Route::Suppressed { event_type: "message", reason: "authored by a bot" }
        }
        InnerEvent::Message(message) if !message.is_plain() => {
            Route::Suppressed { event_type: "message", reason: "not a plain message" }
        }
        InnerEvent::Message(message) => Route::Reply(ReplyAction::in_thread(
            &message.channel,
            &message.timestamp,
            format!("message: {}", message.text),
        )),
        InnerEvent::MemberJoinedChannel(joined) => Route::MemberJoined {
            user_id: joined.user_id.clone(),
            channel_id: joined.channel_id.clone(),
        },
        InnerEvent::Unrecognized { event_type } => {
            Route::Ignored { event_type: event_type.clone() }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Lifecycle, hello, refresh and other non-request frames: logged only.
    Observed,
    /// The payload failed to decode; not acknowledged.
    Dropped,
    /// Decoded, but not an `event_callback`; not acknowledged.
    Unsupported { outer_type: &'static str },
    /// Acknowledged callback that needed no reply.
    Processed,
    Replied(ReplyAction),
    ReplyFailed(ReplyAction),
}

pub struct EventDispatcher {
    acknowledger: Arc<dyn Acknowledger>,
    poster: Arc<dyn MessagePoster>,
}

impl EventDispatcher {
    pub fn new(acknowledger: Arc<dyn Acknowledger>, poster: Arc<dyn MessagePoster>) -> Self {
        Self { acknowledger, poster }
    }

    /// Consumes `events` in order until the session closes the stream.
    /// Returns the number of events handled.
    pub async fn run(&self, mut events: SessionEvents) -> u64 {
        let mut handled = 0_u64;
        while let Some(event) = events.recv().await {
            debug!(event_name = "dispatch.event.received", kind = event.kind(), "transport event");
            self.handle(event).await;
            handled += 1;
        }
        info!(event_name = "dispatch.loop.finished", handled, "event stream closed");
        handled
    }

    pub async fn handle(&self, event: TransportEvent) -> DispatchOutcome {
        match event {
            TransportEvent::Connecting { attempt } => {
                info!(
                    event_name = "dispatch.lifecycle.connecting",
                    attempt, "connecting to slack with socket mode"
                );
                DispatchOutcome::Observed
            }
            TransportEvent::ConnectionError { attempt, error } => {
                info!(
                    event_name = "dispatch.lifecycle.connection_error",
                    attempt,
                    error = %error,
                    "connection failed; retrying later"
                );
                DispatchOutcome::Observed
            }
            TransportEvent::Connected { attempt } => {
                info!(
                    event_name = "dispatch.lifecycle.connected",
                    attempt, "connected to slack with socket mode"
                );
                DispatchOutcome::Observed
            }
            TransportEvent::Hello => {
                debug!(event_name = "dispatch.lifecycle.hello", "hello received");
                DispatchOutcome::Observed
            }
            TransportEvent::Other { event_type } if event_type == "disconnect" => {
                info!(
                    event_name = "dispatch.lifecycle.refresh",
                    "slack requested a connection refresh"
                );
                DispatchOutcome::Observed
            }
            TransportEvent::Other { event_type } => {
                error!(
                    event_name = "dispatch.event.unexpected",
                    event_type = %event_type,
                    "unexpected event type received"
                );
                DispatchOutcome::Observed
            }
            TransportEvent::EventsApi(request) => self.handle_request(request).await,
        }
    }

    async fn handle_request(&self, request: SocketRequest) -> DispatchOutcome {
        let envelope = match EventsApiEnvelope::decode(&request.payload) {
            Ok(envelope) => envelope,
            Err(decode_error) => {
                warn!(
                    event_name = "dispatch.envelope.malformed",
                    envelope_id = %request.envelope_id,
                    error = %decode_error,
                    "dropping events api envelope that failed to decode"
                );
                return DispatchOutcome::Dropped;
            }
        };

        let callback = match envelope {
            EventsApiEnvelope::Callback(callback) => callback,
            other => {
                info!(
                    event_name = "dispatch.envelope.unsupported",
                    envelope_id = %request.envelope_id,
                    outer_type = other.outer_type(),
                    "unsupported events api envelope received"
                );
                return DispatchOutcome::Unsupported { outer_type: other.outer_type() };
            }
        };

        debug!(
            event_name = "dispatch.envelope.received",
            envelope_id = %request.envelope_id,
            event_id = callback.event_id.as_deref().unwrap_or_default(),
            team_id = callback.team_id.as_deref().unwrap_or_default(),
            inner_type = callback.inner.event_type(),
            "event received"
        );
        self.acknowledge(&request.envelope_id).await;

        match route(&callback.inner) {
            Route::Reply(reply) => self.reply(reply).await,
            Route::Suppressed { event_type, reason } => {
                debug!(event_name = "dispatch.event.suppressed", event_type, reason, "no reply");
                DispatchOutcome::Processed
            }
            Route::MemberJoined { user_id, channel_id } => {
                info!(
                    event_name = "dispatch.event.member_joined",
                    user = %user_id,
                    channel = %channel_id,
                    "user joined to channel"
                );
                DispatchOutcome::Processed
            }
            Route::Ignored { event_type } => {
                debug!(
                    event_name = "dispatch.event.ignored",
                    event_type = %event_type,
                    "ignoring unrecognized inner event"
                );
                DispatchOutcome::Processed
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) {
        match self.acknowledger.ack(envelope_id).await {
            Ok(()) => debug!(event_name = "dispatch.envelope.acked", envelope_id, "acknowledged"),
            Err(ack_error) => error!(
                event_name = "dispatch.envelope.ack_failed",
                envelope_id,
                error = %ack_error,
                "failed acknowledging envelope"
            ),
        }
    }

    async fn reply(&self, reply: ReplyAction) -> DispatchOutcome {
        match self.poster.post_message(&reply).await {
            Ok(posted) => {
                debug!(
                    event_name = "dispatch.reply.posted",
                    channel = %reply.channel,
                    ts = %posted.ts,
                    "reply posted"
                );
                DispatchOutcome::Replied(reply)
            }
            Err(post_error) => {
                error!(
                    event_name = "dispatch.reply.failed",
                    channel = %reply.channel,
                    error = %post_error,
                    "failed posting message"
                );
                DispatchOutcome::ReplyFailed(reply)
            }
        }
    }
}
