use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use super::messages::ClientMessage;
use super::{
    join_writer, ServerMessage, SessionSetup, Transport, TransportConnector, TransportEvent,
    TransportSession, CONNECT_TIMEOUT, WRITER_DRAIN_TIMEOUT,
};
use crate::audio::OutboundFrame;
use crate::config::GeminiConfig;
use crate::error::{SessionError, SessionResult};

/// Direct WebSocket transport to the Gemini Live bidi endpoint
pub struct GeminiLiveConnector {
    endpoint: String,
    api_key: String,
    connect_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            endpoint,
            api_key,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Limit on the WebSocket handshake
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build from configuration; the key comes from the config or the named
    /// environment variable
    pub fn from_config(config: &GeminiConfig) -> anyhow::Result<Self> {
        let api_key = match &config.api_key {
            Some(key) if !key.is_empty() => key.clone(),
            _ => std::env::var(&config.api_key_env)
                .with_context(|| format!("Gemini API key not set (env {})", config.api_key_env))?,
        };
        Ok(Self::new(config.endpoint.clone(), api_key))
    }

    fn url(&self) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}key={}", self.endpoint, separator, self.api_key)
    }
}

/// Parse one inbound frame; setup confirmation becomes `Open`
fn parse_server_frame(payload: &[u8]) -> Option<TransportEvent> {
    match serde_json::from_slice::<ServerMessage>(payload) {
        Ok(message) if message.is_setup_complete() => Some(TransportEvent::Open),
        Ok(message) => {
            if message.go_away.is_some() {
                warn!("Server announced disconnect: {:?}", message.go_away);
            }
            Some(TransportEvent::Message(message))
        }
        Err(e) => {
            warn!("Failed to parse server message: {}", e);
            None
        }
    }
}

#[async_trait]
impl TransportConnector for GeminiLiveConnector {
    async fn connect(&self, setup: &SessionSetup) -> SessionResult<TransportSession> {
        info!("Connecting to Gemini Live at {} (model {})", self.endpoint, setup.model);

        let (ws, _response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url()))
            .await
            .map_err(|_| {
                SessionError::Transport(format!(
                    "Gemini Live connect timed out after {:?}",
                    self.connect_timeout
                ))
            })??;
        let (mut sink, mut stream) = ws.split();

        let setup_json = serde_json::to_string(&setup.to_message())
            .map_err(|e| SessionError::Transport(e.to_string()))?;
        sink.send(Message::Text(setup_json)).await?;

        info!("Gemini Live socket open, waiting for setup confirmation");

        let (events_tx, events_rx) = mpsc::channel(256);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();

        let writer_events = events_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize client message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    error!("Failed to send to Gemini Live: {}", e);
                    let _ = writer_events
                        .send(TransportEvent::Error(format!("send failed: {}", e)))
                        .await;
                    return;
                }
            }

            debug!("Closing Gemini Live socket");
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => parse_server_frame(text.as_bytes()),
                    Ok(Message::Binary(bytes)) => parse_server_frame(&bytes),
                    Ok(Message::Close(close)) => {
                        info!("Gemini Live closed the session: {:?}", close);
                        let _ = events_tx.send(TransportEvent::Close).await;
                        return;
                    }
                    Ok(_) => None,
                    Err(e) => {
                        let _ = events_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                if let Some(event) = event {
                    if events_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            let _ = events_tx.send(TransportEvent::Close).await;
        });

        Ok(TransportSession {
            transport: Box::new(GeminiLiveTransport {
                outbound_tx: Some(outbound_tx),
                writer: Some(writer),
                reader: Some(reader),
            }),
            events: events_rx,
        })
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

struct GeminiLiveTransport {
    outbound_tx: Option<mpsc::UnboundedSender<ClientMessage>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl Transport for GeminiLiveTransport {
    fn send_realtime_input(&mut self, frame: OutboundFrame) -> SessionResult<()> {
        let tx = self
            .outbound_tx
            .as_ref()
            .ok_or_else(|| SessionError::Transport("Transport is closed".to_string()))?;
        tx.send(ClientMessage::RealtimeInput((&frame).into()))
            .map_err(|_| SessionError::Transport("Gemini Live writer stopped".to_string()))
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.outbound_tx = None;
        if let Some(writer) = self.writer.take() {
            join_writer("Gemini Live", writer, WRITER_DRAIN_TIMEOUT).await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        info!("Gemini Live transport closed");
        Ok(())
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
