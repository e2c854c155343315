// tokio-tungstenite backed stream transport

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use super::{StreamEvent, StreamSession, StreamTransport};
use crate::error::{MarketDataError, MarketResult};

// Close frame without a status code
const NO_STATUS_RECEIVED: u16 = 1005;

#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

pub struct TungsteniteSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait::async_trait]
impl StreamTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> MarketResult<Box<dyn StreamSession>> {
        let (ws, response) = connect_async(url)
            .await
            .map_err(|e| MarketDataError::Stream(format!("connect {}: {}", url, e)))?;
        info!(url, status = %response.status(), "WebSocket connected");
        Ok(Box::new(TungsteniteSession { ws }))
    }
}

#[async_trait::async_trait]
impl StreamSession for TungsteniteSession {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return Some(StreamEvent::Text(text)),
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code)).unwrap_or(NO_STATUS_RECEIVED);
                    debug!(code, "Server sent close frame");
                    return Some(StreamEvent::Closed { code });
                }
                Some(Ok(Message::Ping(data))) => {
                    trace!(len = data.len(), "Ping, sending pong");
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        return Some(StreamEvent::Error(e.to_string()));
                    }
                }
                Some(Ok(_)) => continue, // binary / pong / raw frames
                Some(Err(e)) => return Some(StreamEvent::Error(e.to_string())),
                None => return None,
            }
        }
    }

    async fn close(&mut self, code: u16) {
        let frame = CloseFrame { code: CloseCode::from(code), reason: "client shutdown".into() };
        if let Err(e) = self.ws.close(Some(frame)).await {
            debug!(error = %e, "Close handshake did not complete");
        }
    }
}
