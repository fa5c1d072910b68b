//! WebSocket connector (tokio-tungstenite)

use super::connector::{Connector, Link, LinkEvent};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
    Error as WsError, Message,
};

/// Dials the real-time backend over WebSocket
///
/// An optional bearer token is sent in the `Authorization` header of the
/// upgrade request. A rejected handshake surfaces as
/// [`TransportError::Rejected`] so the transport can tell auth failures
/// from network failures.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    token: Option<String>,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn map_connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => TransportError::Rejected {
            status: response.status().as_u16(),
            reason: response
                .status()
                .canonical_reason()
                .unwrap_or("handshake rejected")
                .to_string(),
        },
        WsError::Url(e) => TransportError::Protocol(format!("invalid url: {e}")),
        WsError::HttpFormat(e) => TransportError::Protocol(format!("invalid request: {e}")),
        other => TransportError::Connect(other.to_string()),
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> TransportResult<Link> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(map_connect_error)?;

        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Protocol(format!("invalid token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_connect_error)?;
        let (mut ws_sink, mut ws_stream) = stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<LinkEvent>();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(text)).await {
                    tracing::debug!(error = %e, "WebSocket write failed");
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        tokio::spawn(async move {
            let mut closed = LinkEvent::Closed {
                code: None,
                reason: "stream ended".to_string(),
            };

            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(LinkEvent::Text(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        closed = match frame {
                            Some(frame) => LinkEvent::Closed {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.into_owned(),
                            },
                            None => LinkEvent::Closed {
                                code: None,
                                reason: "closed without frame".to_string(),
                            },
                        };
                        break;
                    }
                    Ok(Message::Binary(_)) => {
                        tracing::debug!("Ignoring binary frame");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "WebSocket error");
                        closed = LinkEvent::Closed {
                            code: None,
                            reason: e.to_string(),
                        };
                        break;
                    }
                }
            }

            let _ = in_tx.send(closed);
        });

        tracing::debug!(url = %self.url, "WebSocket link open");

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_fatal() {
        let connector = WebSocketConnector::new("ftp://example.com/realtime");
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_fatal(), "{err:?}");
    }

    #[tokio::test]
    async fn test_refused_connection_is_transient() {
        // Port 9 (discard) is closed on CI hosts.
        let connector = WebSocketConnector::new("ws://127.0.0.1:9/realtime").with_token("t");
        let err = connector.connect().await.unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
