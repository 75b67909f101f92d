use async_nats::Client;
use async_trait::async_trait;
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, RelayEnvelope};
use super::{
    join_writer, ServerMessage, SessionSetup, Transport, TransportConnector, TransportEvent,
    TransportSession, CONNECT_TIMEOUT, WRITER_DRAIN_TIMEOUT,
};
use crate::audio::OutboundFrame;
use crate::error::{SessionError, SessionResult};

/// Relay transport over NATS
///
/// Client messages are published to `<prefix>.client.<session>`; server
/// messages are read from `<prefix>.server.<session>`. A bridge service on
/// the other side talks to the realtime endpoint.
pub struct NatsConnector {
    url: String,
    subject_prefix: String,
}

impl NatsConnector {
    pub fn new(url: String, subject_prefix: String) -> Self {
        Self { url, subject_prefix }
    }

    pub fn client_subject(&self, session_id: &str) -> String {
        format!("{}.client.{}", self.subject_prefix, session_id)
    }

    pub fn server_subject(&self, session_id: &str) -> String {
        format!("{}.server.{}", self.subject_prefix, session_id)
    }
}

fn envelope(session_id: &str, sequence: Option<u64>, message: ClientMessage) -> RelayEnvelope {
    RelayEnvelope {
        session_id: session_id.to_string(),
        sequence,
        timestamp: chrono::Utc::now().to_rfc3339(),
        message,
    }
}

#[async_trait]
impl TransportConnector for NatsConnector {
    async fn connect(&self, setup: &SessionSetup) -> SessionResult<TransportSession> {
        info!("Connecting to NATS at {}", self.url);

        let client = tokio::time::timeout(CONNECT_TIMEOUT, async_nats::connect(self.url.as_str()))
            .await
            .map_err(|_| {
                SessionError::Transport(format!("NATS connect timed out after {:?}", CONNECT_TIMEOUT))
            })?
            .map_err(|e| SessionError::Transport(format!("Failed to connect to NATS: {}", e)))?;

        info!("Connected to NATS successfully");

        let server_subject = self.server_subject(&setup.session_id);
        let mut subscriber = client
            .subscribe(server_subject.clone())
            .await
            .map_err(|e| SessionError::Transport(format!("Failed to subscribe: {}", e)))?;

        info!("Subscribed to {}", server_subject);

        let (events_tx, events_rx) = mpsc::channel(256);
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<RelayEnvelope>();

        // Setup goes first so the bridge can open the upstream session
        outbound_tx
            .send(envelope(&setup.session_id, None, setup.to_message()))
            .map_err(|e| SessionError::Transport(e.to_string()))?;

        let writer_client = client.clone();
        let client_subject = self.client_subject(&setup.session_id);
        let writer_events = events_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                let payload = match serde_json::to_vec(&envelope) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to serialize relay message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = writer_client.publish(client_subject.clone(), payload.into()).await {
                    error!("Failed to publish to {}: {}", client_subject, e);
                    let _ = writer_events
                        .send(TransportEvent::Error(format!("publish failed: {}", e)))
                        .await;
                    break;
                }

                debug!(
                    "Published to {} (sequence={:?})",
                    client_subject, envelope.sequence
                );
            }
        });

        let reader = tokio::spawn(async move {
            if events_tx.send(TransportEvent::Open).await.is_err() {
                return;
            }

            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ServerMessage>(&msg.payload) {
                    Ok(message) => {
                        if events_tx.send(TransportEvent::Message(message)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to parse server message: {}", e);
                    }
                }
            }

            info!("NATS subscription ended");
            let _ = events_tx.send(TransportEvent::Close).await;
        });

        Ok(TransportSession {
            transport: Box::new(NatsTransport {
                client,
                session_id: setup.session_id.clone(),
                outbound_tx: Some(outbound_tx),
                writer: Some(writer),
                reader: Some(reader),
            }),
            events: events_rx,
        })
    }

    fn name(&self) -> &str {
        "nats"
    }
}

async fn flush_within(client: &Client, limit: Duration) -> SessionResult<()> {
    tokio::time::timeout(limit, client.flush())
        .await
        .map_err(|_| SessionError::Transport(format!("NATS flush timed out after {:?}", limit)))?
        .map_err(|e| SessionError::Transport(format!("Failed to flush NATS: {}", e)))
}

struct NatsTransport {
    client: Client,
    session_id: String,
    outbound_tx: Option<mpsc::UnboundedSender<RelayEnvelope>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

#[async_trait]
impl Transport for NatsTransport {
    fn send_realtime_input(&mut self, frame: OutboundFrame) -> SessionResult<()> {
        let tx = self
            .outbound_tx
            .as_ref()
            .ok_or_else(|| SessionError::Transport("Transport is closed".to_string()))?;

        let message = ClientMessage::RealtimeInput((&frame).into());
        tx.send(envelope(&self.session_id, Some(frame.sequence), message))
            .map_err(|_| SessionError::Transport("NATS writer stopped".to_string()))
    }

    async fn close(&mut self) -> SessionResult<()> {
        info!("Closing NATS transport for {}", self.session_id);

        // Dropping the sender lets the writer drain what is queued
        self.outbound_tx = None;
        if let Some(writer) = self.writer.take() {
            join_writer("NATS", writer, WRITER_DRAIN_TIMEOUT).await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }

        flush_within(&self.client, WRITER_DRAIN_TIMEOUT).await
    }

    fn name(&self) -> &str {
        "nats"
    }
}
