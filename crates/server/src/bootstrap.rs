use std::sync::Arc;

use replybot_core::config::{AppConfig, ConfigError, LoadOptions};
use replybot_slack::client::{MessagePoster, SlackWebClient};
use replybot_slack::socket::{ReconnectPolicy, SocketModeSession};
use replybot_slack::ws::WebSocketTransport;
use replybot_slack::SocketModeRunner;
use thiserror::Error;
use tracing::error;

pub struct Application {
    pub config: AppConfig,
    pub slack_runner: SocketModeRunner,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Loads and validates config, then builds the Slack side from it. Nothing
/// touches the network until the runner is started.
pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;

    let web_client = SlackWebClient::new(&config.slack.api_base_url, config.slack.bot_token.clone())
        .with_debug(config.slack.debug);
    let transport =
        Arc::new(WebSocketTransport::new(web_client.clone(), config.slack.app_token.clone()));
    let policy = ReconnectPolicy {
        max_retries: config.socket.max_retries,
        base_delay_ms: config.socket.base_delay_ms,
        max_delay_ms: config.socket.max_delay_ms,
    };
    let session =
        SocketModeSession::new(transport, policy).with_frame_logging(config.slack.debug);
    let poster: Arc<dyn MessagePoster> = Arc::new(web_client);

    Ok(Application { config, slack_runner: SocketModeRunner::new(session, poster) })
}

pub fn log_failure(failure: &BootstrapError) {
    error!(event_name = "system.bootstrap.failed", error = %failure, "startup failed");
}
