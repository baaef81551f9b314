use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use replybot_slack::client::{MessagePoster, PostedMessage, SlackApiError};
use replybot_slack::events::ReplyAction;
use replybot_slack::socket::{
    ReconnectPolicy, SessionState, SocketModeSession, SocketTransport, TransportError,
};
use replybot_slack::SocketModeRunner;
use serde_json::json;
use tokio::sync::{watch, Mutex};

struct ScriptedSocket {
    connects: Mutex<VecDeque<Result<(), TransportError>>>,
    frames: Mutex<VecDeque<Option<String>>>,
    acks: Mutex<Vec<String>>,
}

impl ScriptedSocket {
    fn new(connects: usize, frames: Vec<Option<String>>) -> Self {
        Self {
            connects: Mutex::new((0..connects).map(|_| Ok(())).collect()),
            frames: Mutex::new(frames.into()),
            acks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SocketTransport for ScriptedSocket {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connects
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Connect("connection refused".to_owned())))
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        let next = self.frames.lock().await.pop_front();
        match next {
            Some(frame) => Ok(frame),
            None => std::future::pending().await,
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        self.acks.lock().await.push(envelope_id.to_owned());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPoster {
    posts: Mutex<Vec<ReplyAction>>,
}

#[async_trait]
impl MessagePoster for RecordingPoster {
    async fn post_message(&self, reply: &ReplyAction) -> Result<PostedMessage, SlackApiError> {
        self.posts.lock().await.push(reply.clone());
        Ok(PostedMessage { channel: Some(reply.channel.clone()), ts: "1.1".to_owned() })
    }
}

fn events_api(envelope_id: &str, event: serde_json::Value) -> Option<String> {
    let frame = json!({
        "type": "events_api",
        "envelope_id": envelope_id,
        "payload": {"type": "event_callback", "team_id": "T1", "event": event},
    });
    Some(frame.to_string())
}

fn no_delay(max_retries: u32) -> ReconnectPolicy {
    ReconnectPolicy { max_retries: Some(max_retries), base_delay_ms: 0, max_delay_ms: 0 }
}

#[tokio::test]
async fn runner_acks_callbacks_and_posts_replies_until_retries_run_out() {
    let socket = Arc::new(ScriptedSocket::new(
        1,
        vec![
            Some(json!({"type": "hello"}).to_string()),
            events_api("env-1", json!({"type": "app_mention", "channel": "C1", "ts": "100.1"})),
            events_api(
                "env-2",
                json!({"type": "app_mention", "channel": "C1", "ts": "100.2", "bot_id": "B123"}),
            ),
            events_api(
                "env-3",
                json!({"type": "message", "channel": "C2", "ts": "200.5", "text": "hi there"}),
            ),
            events_api(
                "env-4",
                json!({"type": "member_joined_channel", "user": "U9", "channel": "C3"}),
            ),
            events_api("env-5", json!({"type": "message"})),
            None,
        ],
    ));
    let poster = Arc::new(RecordingPoster::default());
    let session = SocketModeSession::new(socket.clone(), no_delay(0));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let report = SocketModeRunner::new(session, poster.clone())
        .start(shutdown_rx)
        .await
        .expect("runner should finish");

    assert_eq!(report.final_state, SessionState::Terminated);
    // connecting, connected, hello, five requests, then a failed reconnect.
    assert_eq!(report.events_handled, 10);
    assert_eq!(*socket.acks.lock().await, vec!["env-1", "env-2", "env-3", "env-4"]);
    assert_eq!(
        *poster.posts.lock().await,
        vec![
            ReplyAction::in_thread("C1", "100.1", "Yes, hello."),
            ReplyAction::in_thread("C2", "200.5", "message: hi there"),
        ]
    );
}

#[tokio::test]
async fn runner_stops_on_shutdown_signal() {
    let socket = Arc::new(ScriptedSocket::new(1, vec![Some(json!({"type": "hello"}).to_string())]));
    let poster = Arc::new(RecordingPoster::default());
    let session = SocketModeSession::new(socket, ReconnectPolicy::default());
    let mut state = session.subscribe_state();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let running = tokio::spawn(SocketModeRunner::new(session, poster.clone()).start(shutdown_rx));
    state.wait_for(|state| *state == SessionState::Connected).await.expect("connected");
    shutdown_tx.send(true).expect("shutdown");

    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("runner should stop promptly")
        .expect("runner task")
        .expect("runner result");

    assert_eq!(report.final_state, SessionState::Terminated);
    assert!(poster.posts.lock().await.is_empty());
}

#[tokio::test]
async fn runner_refuses_a_session_whose_events_were_taken() {
    let socket = Arc::new(ScriptedSocket::new(0, vec![]));
    let mut session = SocketModeSession::new(socket, no_delay(0));
    let _events = session.events();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = SocketModeRunner::new(session, Arc::new(RecordingPoster::default()));
    let result = runner.start(shutdown_rx).await;

    assert!(matches!(result, Err(replybot_slack::RunnerError::EventsTaken)));
}
