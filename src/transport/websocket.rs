//! WebSocket transport: one JSON-RPC message per text frame.

use futures_util::future;
use futures_util::{SinkExt, StreamExt};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use super::{ChannelError, MessageSink, MessageStream};

/// Subprotocol requested during the handshake.
const SUBPROTOCOL: &str = "mcp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebSocketTransport {
    pub url: String,
}

impl WebSocketTransport {
    /// Complete the WebSocket handshake and split the socket into halves
    /// rmcp can drive.
    pub async fn connect(&self) -> Result<(MessageSink, MessageStream), ChannelError> {
        let mut request = self.url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

        let (socket, response) = connect_async(request).await?;
        tracing::debug!(url = %self.url, status = %response.status(), "WebSocket connected");

        let (write, read) = socket.split();
        let sink = write.with(|message: ClientJsonRpcMessage| {
            future::ready(
                serde_json::to_string(&message)
                    .map(|text| Message::Text(text.into()))
                    .map_err(ChannelError::from),
            )
        });
        let sink: MessageSink = Box::pin(sink);
        let stream: MessageStream = read.filter_map(|frame| future::ready(decode(frame))).boxed();

        Ok((sink, stream))
    }
}

fn decode(frame: Result<Message, tokio_tungstenite::tungstenite::Error>) -> Option<ServerJsonRpcMessage> {
    let parsed = match frame {
        Ok(Message::Text(text)) => serde_json::from_str(text.as_str()),
        Ok(Message::Binary(bytes)) => serde_json::from_slice(&bytes),
        Ok(_) => return None,
        Err(e) => {
            tracing::debug!(error = %e, "WebSocket read failed");
            return None;
        }
    };
    match parsed {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable WebSocket frame");
            None
        }
    }
}
