//! Slack Web API client.
//!
//! Only two methods are needed: `chat.postMessage` for replies (bot token) and
//! `apps.connections.open` for fetching a Socket Mode URL (app-level token).

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::events::ReplyAction;

#[derive(Debug, Error)]
pub enum SlackApiError {
    #[error("{method} request failed: {source}")]
    Request {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} response could not be parsed: {source}")]
    Response {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} returned error `{error}`")]
    Api { method: &'static str, error: String },
    #[error("{method} response is missing `{field}`")]
    MissingField { method: &'static str, field: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: Option<String>,
    pub ts: String,
}

/// Outbound side of the bot: executes a [`ReplyAction`].
#[async_trait]
pub trait MessagePoster: Send + Sync {
    async fn post_message(&self, reply: &ReplyAction) -> Result<PostedMessage, SlackApiError>;
}

#[derive(Clone, Debug)]
pub struct SlackWebClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: SecretString,
    debug: bool,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SlackApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl SlackWebClient {
    pub fn new(api_base: impl Into<String>, bot_token: SecretString) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_owned();
        Self { http: reqwest::Client::new(), api_base, bot_token, debug: false }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Opens a Socket Mode connection and returns the `wss://` URL to dial.
    pub async fn connections_open(
        &self,
        app_token: &SecretString,
    ) -> Result<String, SlackApiError> {
        const METHOD: &str = "apps.connections.open";

        let request = self
            .http
            .post(self.method_url(METHOD))
            .bearer_auth(app_token.expose_secret())
            .header("Content-Type", "application/x-www-form-urlencoded");
        let response = self.send(METHOD, request).await?;

        response.url.ok_or(SlackApiError::MissingField { method: METHOD, field: "url" })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    async fn send(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<SlackApiResponse, SlackApiError> {
        let response = request
            .send()
            .await
            .map_err(|source| SlackApiError::Request { method, source })?;
        let body: SlackApiResponse =
            response.json().await.map_err(|source| SlackApiError::Response { method, source })?;

        if !body.ok {
            let error = body.error.unwrap_or_else(|| "unknown".to_owned());
            warn!(method, error = %error, "slack web api call rejected");
            return Err(SlackApiError::Api { method, error });
        }

        if self.debug {
            debug!(method, "slack web api call succeeded");
        }
        Ok(body)
    }
}

#[async_trait]
impl MessagePoster for SlackWebClient {
    async fn post_message(&self, reply: &ReplyAction) -> Result<PostedMessage, SlackApiError> {
        const METHOD: &str = "chat.postMessage";

        let body = PostMessageRequest {
            channel: &reply.channel,
            thread_ts: reply.thread_ts.as_deref(),
            text: &reply.text,
        };
        if self.debug {
            debug!(channel = %reply.channel, thread_ts = ?reply.thread_ts, "posting message");
        }

        let request = self
            .http
            .post(self.method_url(METHOD))
            .bearer_auth(self.bot_token.expose_secret())
            .json(&body);
        let response = self.send(METHOD, request).await?;

        let ts = response.ts.ok_or(SlackApiError::MissingField { method: METHOD, field: "ts" })?;
        Ok(PostedMessage { channel: response.channel, ts })
    }
}
