//! HTTP event-stream transport.
//!
//! The downstream keeps a `text/event-stream` response open. Its first
//! `endpoint` event names the URL messages are POSTed to; responses come
//! back as `message` events on the stream.

use std::collections::BTreeMap;

use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures_util::{future, sink, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use url::Url;

use super::{ChannelError, MessageSink, MessageStream};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseTransport {
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

impl SseTransport {
    /// Open the event stream and wait for the message endpoint.
    pub async fn connect(&self) -> Result<(MessageSink, MessageStream), ChannelError> {
        let base = Url::parse(&self.url).map_err(|e| ChannelError::Protocol(e.to_string()))?;
        let headers = header_map(&self.headers)?;
        let http = reqwest::Client::builder().build()?;

        let response = http
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;
        let mut events = response.bytes_stream().eventsource().boxed();

        let endpoint = loop {
            let event = events
                .next()
                .await
                .ok_or(ChannelError::Closed)?
                .map_err(|e| ChannelError::Protocol(e.to_string()))?;
            if event.event == "endpoint" {
                break base
                    .join(event.data.trim())
                    .map_err(|e| ChannelError::Protocol(format!("bad endpoint event: {}", e)))?;
            }
        };
        tracing::debug!(endpoint = %endpoint, "Event stream endpoint received");

        let outgoing = sink::unfold(
            (http, endpoint, headers),
            |(http, endpoint, headers), message: ClientJsonRpcMessage| async move {
                http.post(endpoint.clone())
                    .headers(headers.clone())
                    .json(&message)
                    .send()
                    .await?
                    .error_for_status()?;
                Ok::<_, ChannelError>((http, endpoint, headers))
            },
        );
        let outgoing: MessageSink = Box::pin(outgoing);
        let incoming: MessageStream = events.filter_map(|event| future::ready(decode(event))).boxed();

        Ok((outgoing, incoming))
    }
}

fn decode(event: Result<Event, EventStreamError<reqwest::Error>>) -> Option<ServerJsonRpcMessage> {
    let event = match event {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(error = %e, "Event stream read failed");
            return None;
        }
    };
    if !event.event.is_empty() && event.event != "message" {
        tracing::debug!(event = %event.event, "Ignoring event-stream event");
        return None;
    }
    match serde_json::from_str(&event.data) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable event-stream message");
            None
        }
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ChannelError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ChannelError::Protocol(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ChannelError::Protocol(format!("invalid header value for '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}
