use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::info;

use crate::client::MessagePoster;
use crate::dispatcher::EventDispatcher;
use crate::socket::{SessionState, SocketModeSession};

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("session event stream was already taken")]
    EventsTaken,
    #[error("{task} task panicked or was cancelled: {source}")]
    Join {
        task: &'static str,
        #[source]
        source: JoinError,
    },
}

/// Summary of a finished run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunReport {
    pub events_handled: u64,
    pub final_state: SessionState,
}

/// Wires a [`SocketModeSession`] to an [`EventDispatcher`]: one task per side,
/// joined by the session's event channel.
pub struct SocketModeRunner {
    session: SocketModeSession,
    poster: Arc<dyn MessagePoster>,
}

impl SocketModeRunner {
    pub fn new(session: SocketModeSession, poster: Arc<dyn MessagePoster>) -> Self {
        Self { session, poster }
    }

    /// Runs until the session terminates, either because `shutdown` flipped or
    /// because reconnecting gave up, and the dispatcher has drained what the
    /// session produced.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> Result<RunReport, RunnerError> {
        let Self { mut session, poster } = self;

        let events = session.events().ok_or(RunnerError::EventsTaken)?;
        let state = session.subscribe_state();
        let dispatcher = EventDispatcher::new(Arc::new(session.acknowledger()), poster);

        info!(event_name = "system.runner.started", "socket mode runner started");
        let session_task = tokio::spawn(session.start(shutdown));
        let dispatcher_task = tokio::spawn(async move { dispatcher.run(events).await });

        session_task.await.map_err(|source| RunnerError::Join { task: "session", source })?;
        let events_handled = dispatcher_task
            .await
            .map_err(|source| RunnerError::Join { task: "dispatcher", source })?;

        let final_state = *state.borrow();
        info!(
            event_name = "system.runner.stopped",
            events_handled,
            final_state = ?final_state,
            "socket mode runner stopped"
        );
        Ok(RunReport { events_handled, final_state })
    }
}
