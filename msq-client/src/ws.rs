//! WebSocket transports for the change feed and the notification socket.
//!
//! Both speak JSON text frames. The change feed subscribes per table with
//! `{"type": "subscribe", "table": "boqs"}` and receives row changes; the
//! notification socket joins rooms with `{"event": "join", "rooms": [...]}`
//! and receives `{"event": "<name>", "data": {...}}`.

use crate::api_client::ApiClientError;
use crate::config::ClientConfig;
use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use msq_core::{NotifyError, RealtimeError, Table};
use msq_notify::{PushSocket, SocketFrame};
use msq_realtime::{ChangeEvent, ChangeFeed, ChannelMessage};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(endpoint: &str, access_token: Option<&str>) -> Result<Socket, ApiClientError> {
    let mut request = endpoint.into_client_request()?;
    if let Some(token) = access_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| ApiClientError::Config(e.to_string()))?;
        request.headers_mut().insert("authorization", value);
    }
    let (socket, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(socket)
}

enum Frame<'a> {
    Text(&'a str),
    Closed(String),
    Error(String),
    Skip,
}

fn classify(message: &Result<Message, WsError>) -> Frame<'_> {
    match message {
        Ok(Message::Text(text)) => Frame::Text(text),
        Ok(Message::Close(frame)) => Frame::Closed(
            frame
                .as_ref()
                .map(|f| f.reason.to_string())
                .filter(|reason| !reason.is_empty())
                .unwrap_or_else(|| "closed by server".to_string()),
        ),
        Ok(_) => Frame::Skip,
        Err(err) => Frame::Error(err.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct WsChangeFeed {
    endpoint: String,
    access_token: Option<String>,
}

impl WsChangeFeed {
    pub fn new(config: &ClientConfig, access_token: Option<String>) -> Self {
        Self {
            endpoint: config.realtime_ws_url.clone(),
            access_token,
        }
    }
}

#[async_trait]
impl ChangeFeed for WsChangeFeed {
    async fn open(&self, table: Table) -> Result<BoxStream<'static, ChannelMessage>, RealtimeError> {
        let connect_failed = |reason: String| RealtimeError::ConnectFailed { table, reason };
        let mut socket = connect(&self.endpoint, self.access_token.as_deref())
            .await
            .map_err(|e| connect_failed(e.to_string()))?;
        let subscribe = json!({"type": "subscribe", "table": table.as_str()});
        socket
            .send(Message::Text(subscribe.to_string()))
            .await
            .map_err(|e| connect_failed(e.to_string()))?;

        Ok(socket
            .filter_map(move |message| {
                future::ready(match classify(&message) {
                    Frame::Text(text) => decode_change_frame(table, text),
                    Frame::Closed(reason) => Some(ChannelMessage::Closed { reason }),
                    Frame::Error(message) => Some(ChannelMessage::Error { message }),
                    Frame::Skip => None,
                })
            })
            .boxed())
    }
}

/// Decode one change-feed text frame. Acks and malformed frames yield `None`.
pub(crate) fn decode_change_frame(table: Table, text: &str) -> Option<ChannelMessage> {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(%table, error = %err, "Dropping non-JSON change frame");
            return None;
        }
    };
    let payload = match value.get("type").and_then(Value::as_str) {
        Some("subscribed") | Some("heartbeat") => return None,
        Some("error") => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("channel error");
            return Some(ChannelMessage::Error {
                message: message.to_string(),
            });
        }
        Some("closed") => {
            let reason = value
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("closed by server");
            return Some(ChannelMessage::Closed {
                reason: reason.to_string(),
            });
        }
        Some("change") => value.get("payload").cloned().unwrap_or(Value::Null),
        _ => value,
    };
    match serde_json::from_value::<ChangeEvent>(payload) {
        Ok(event) => Some(ChannelMessage::Change(event)),
        Err(err) => {
            tracing::warn!(%table, error = %err, "Dropping malformed change event");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct WsPushSocket {
    endpoint: String,
    access_token: Option<String>,
}

impl WsPushSocket {
    pub fn new(config: &ClientConfig, access_token: Option<String>) -> Self {
        Self {
            endpoint: config.notify_ws_url.clone(),
            access_token,
        }
    }
}

#[async_trait]
impl PushSocket for WsPushSocket {
    async fn connect(&self, rooms: &[String]) -> Result<BoxStream<'static, SocketFrame>, NotifyError> {
        let mut socket = connect(&self.endpoint, self.access_token.as_deref())
            .await
            .map_err(|e| NotifyError::Connect(e.to_string()))?;
        let join = json!({"event": "join", "rooms": rooms});
        socket
            .send(Message::Text(join.to_string()))
            .await
            .map_err(|e| NotifyError::Connect(e.to_string()))?;

        Ok(socket
            .filter_map(|message| {
                future::ready(match classify(&message) {
                    Frame::Text(text) => decode_socket_frame(text),
                    Frame::Closed(reason) => Some(SocketFrame::Closed { reason }),
                    Frame::Error(message) => Some(SocketFrame::Error { message }),
                    Frame::Skip => None,
                })
            })
            .boxed())
    }
}

/// Decode `{"event": name, "data": payload}`. Frames without a name are dropped.
pub(crate) fn decode_socket_frame(text: &str) -> Option<SocketFrame> {
    let mut value: Value = serde_json::from_str(text)
        .map_err(|err| tracing::warn!(error = %err, "Dropping non-JSON socket frame"))
        .ok()?;
    let name = value.get("event").and_then(Value::as_str)?.to_string();
    let payload = value
        .get_mut("data")
        .map(Value::take)
        .unwrap_or(Value::Null);
    Some(SocketFrame::Event { name, payload })
}

#[cfg(test)]
mod tests {
    use super::*;
    use msq_realtime::ChangeKind;

    #[test]
    fn test_change_frames() {
        let bare = r#"{"table": "boqs", "eventType": "UPDATE", "new": {"boq_id": 1, "status": "Approved"}}"#;
        let Some(ChannelMessage::Change(event)) = decode_change_frame(Table::Boqs, bare) else {
            panic!("expected a change");
        };
        assert_eq!(event.event_type, ChangeKind::Update);

        let wrapped = r#"{"type": "change", "payload": {"table": "vendors", "eventType": "DELETE", "old": {"vendor_id": 3}}}"#;
        assert!(matches!(
            decode_change_frame(Table::Vendors, wrapped),
            Some(ChannelMessage::Change(_))
        ));

        assert_eq!(decode_change_frame(Table::Boqs, r#"{"type": "subscribed"}"#), None);
        assert_eq!(
            decode_change_frame(Table::Boqs, r#"{"type": "closed", "reason": "kicked"}"#),
            Some(ChannelMessage::Closed {
                reason: "kicked".to_string()
            })
        );
        assert!(matches!(
            decode_change_frame(Table::Boqs, r#"{"type": "error"}"#),
            Some(ChannelMessage::Error { .. })
        ));
        assert_eq!(decode_change_frame(Table::Boqs, "not json"), None);
        assert_eq!(decode_change_frame(Table::Boqs, r#"{"table": "projects"}"#), None);
    }

    #[test]
    fn test_socket_frames() {
        assert_eq!(
            decode_socket_frame(r#"{"event": "pr:approved", "data": {"cr_id": 4}}"#),
            Some(SocketFrame::Event {
                name: "pr:approved".to_string(),
                payload: json!({"cr_id": 4})
            })
        );
        assert_eq!(
            decode_socket_frame(r#"{"event": "ping"}"#),
            Some(SocketFrame::Event {
                name: "ping".to_string(),
                payload: Value::Null
            })
        );
        assert_eq!(decode_socket_frame(r#"{"data": {}}"#), None);
        assert_eq!(decode_socket_frame("{"), None);
    }

    #[test]
    fn test_close_reason() {
        let closed: Result<Message, WsError> = Ok(Message::Close(None));
        assert!(matches!(classify(&closed), Frame::Closed(reason) if reason == "closed by server"));
        let ping: Result<Message, WsError> = Ok(Message::Ping(Vec::new()));
        assert!(matches!(classify(&ping), Frame::Skip));
    }
}
