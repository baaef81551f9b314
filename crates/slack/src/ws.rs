//! Socket Mode over a real WebSocket.
//!
//! Dialing is a two-step dance: `apps.connections.open` (app-level token)
//! hands back a one-time `wss://` URL, which is then opened with
//! tokio-tungstenite. Reads and writes are split so that acknowledgments from
//! the dispatcher never wait behind a pending read.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::client::SlackWebClient;
use crate::socket::{SocketTransport, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    client: SlackWebClient,
    app_token: SecretString,
    writer: Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
}

impl WebSocketTransport {
    pub fn new(client: SlackWebClient, app_token: SecretString) -> Self {
        Self { client, app_token, writer: Mutex::new(None), reader: Mutex::new(None) }
    }

    async fn send(&self, message: WsMessage) -> Result<(), String> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or_else(|| TransportError::NotConnected.to_string())?;
        sink.send(message).await.map_err(|error| error.to_string())
    }
}

#[async_trait]
impl SocketTransport for WebSocketTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let url = self
            .client
            .connections_open(&self.app_token)
            .await
            .map_err(|error| TransportError::Connect(error.to_string()))?;

        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|error| TransportError::Connect(format!("websocket handshake: {error}")))?;
        info!("websocket connected to slack socket mode");

        let (write, read) = stream.split();
        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        let mut reader = self.reader.lock().await;
        let stream = reader.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            match stream.next().await {
                None => return Ok(None),
                Some(Err(error)) => return Err(TransportError::Receive(error.to_string())),
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(text)),
                Some(Ok(WsMessage::Ping(data))) => {
                    self.send(WsMessage::Pong(data)).await.map_err(TransportError::Receive)?;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    info!(close_frame = ?frame, "websocket closed by slack");
                    return Ok(None);
                }
                Some(Ok(_)) => {}
            }
        }
    }

    async fn acknowledge(&self, envelope_id: &str) -> Result<(), TransportError> {
        let ack = serde_json::json!({ "envelope_id": envelope_id });
        self.send(WsMessage::Text(ack.to_string())).await.map_err(TransportError::Acknowledge)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.reader.lock().await.take();
        let Some(mut writer) = self.writer.lock().await.take() else {
            return Ok(());
        };
        debug!("closing socket mode websocket");
        writer.close().await.map_err(|error| TransportError::Disconnect(error.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message as WsMessage;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::WebSocketTransport;
    use crate::client::SlackWebClient;
    use crate::socket::{SocketTransport, TransportError};

    fn transport() -> WebSocketTransport {
        let client = SlackWebClient::new("http://127.0.0.1:9", "xoxb-test".to_owned().into());
        WebSocketTransport::new(client, "xapp-test".to_owned().into())
    }

    #[tokio::test]
    async fn reading_before_connect_is_an_error() {
        let result = transport().next_frame().await;
        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn acknowledging_before_connect_is_an_error() {
        let result = transport().acknowledge("env-1").await;
        assert_eq!(
            result,
            Err(TransportError::Acknowledge("transport is not connected".to_owned()))
        );
    }

    #[tokio::test]
    async fn disconnecting_an_idle_transport_is_a_no_op() {
        assert_eq!(transport().disconnect().await, Ok(()));
    }

    #[tokio::test]
    async fn connect_reports_connections_open_failures() {
        let result = transport().connect().await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn answers_pings_writes_acks_and_ends_on_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let api = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/apps.connections.open"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "url": format!("ws://{addr}")})),
            )
            .expect(1)
            .mount(&api)
            .await;

        let slack = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut socket = accept_async(stream).await.expect("handshake");
            socket.send(WsMessage::Ping(b"p".to_vec())).await.expect("send ping");
            let frame = json!({"type": "events_api", "envelope_id": "e1", "payload": {}});
            socket.send(WsMessage::Text(frame.to_string())).await.expect("send frame");

            let mut received = Vec::new();
            loop {
                let message = socket.next().await.expect("client frame").expect("read");
                let is_text = message.is_text();
                received.push(message);
                if is_text {
                    break;
                }
            }
            socket.close(None).await.expect("close");
            received
        });

        let client = SlackWebClient::new(api.uri(), "xoxb-test".to_owned().into());
        let transport = WebSocketTransport::new(client, "xapp-test".to_owned().into());
        transport.connect().await.expect("connect");

        let frame = transport.next_frame().await.expect("read").expect("frame");
        let frame: serde_json::Value = serde_json::from_str(&frame).expect("json frame");
        assert_eq!(frame["type"], "events_api");
        assert_eq!(frame["envelope_id"], "e1");

        transport.acknowledge("e1").await.expect("ack");
        let received = slack.await.expect("server task");

        assert!(
            received.iter().any(|message| matches!(message, WsMessage::Pong(data) if data == b"p")),
            "no pong in {received:?}"
        );
        assert_eq!(received.last(), Some(&WsMessage::Text(r#"{"envelope_id":"e1"}"#.to_owned())));
        assert_eq!(transport.next_frame().await, Ok(None));
    }
}
