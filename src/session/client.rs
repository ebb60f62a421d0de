use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{Result, StudioError};
use crate::signaling::SignalMessage;

/// Client side of the signaling transport.
///
/// Outbound messages go through an unbounded queue drained by a single
/// writer task, so everything this participant sends reaches the hub in
/// submission order. Inbound frames are decoded and surfaced on a channel;
/// undecodable frames are logged and skipped.
pub struct SignalingClient {
    outbound: Option<mpsc::UnboundedSender<SignalMessage>>,
    shutdown: Option<oneshot::Sender<()>>,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl SignalingClient {
    /// Connect to the hub's WebSocket endpoint (e.g. `ws://host:port/session`)
    pub async fn connect(
        url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SignalMessage>)> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| StudioError::transport(format!("connect {}: {}", url, e)))?;
        let (mut ws_sender, mut ws_receiver) = socket.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let writer = tokio::spawn(async move {
            loop {
                // biased: anything already queued flushes before shutdown
                // is acted on
                tokio::select! {
                    biased;
                    maybe = outbound_rx.recv() => {
                        let Some(message) = maybe else { break };
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to serialize signaling message");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sender.send(Message::Text(text)).await {
                            tracing::error!(error = %e, "Failed to send signaling message");
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            let _ = ws_sender.close().await;
        });

        let (inbound, inbound_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let reader = tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<SignalMessage>(&text) {
                        Ok(message) => {
                            if inbound.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                raw_message = %text,
                                "Dropping undecodable signaling frame"
                            );
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Signaling connection closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "Signaling transport error");
                        break;
                    }
                }
            }
        });

        Ok((
            Self {
                outbound: Some(outbound),
                shutdown: Some(shutdown_tx),
                writer: Some(writer),
                reader: Some(reader),
            },
            inbound_rx,
        ))
    }

    /// Queue a message for the hub
    pub fn send(&self, message: SignalMessage) -> Result<()> {
        let outbound = self
            .outbound
            .as_ref()
            .ok_or_else(|| StudioError::transport("signaling client closed"))?;
        outbound
            .send(message)
            .map_err(|_| StudioError::transport("signaling writer closed"))
    }

    /// Handle for components that send on this connection themselves
    pub fn sender(&self) -> Option<mpsc::UnboundedSender<SignalMessage>> {
        self.outbound.clone()
    }

    /// Close the connection, letting already-queued frames flush first
    pub async fn close(&mut self) {
        self.outbound.take();
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(writer) = self.writer.take() {
            let _ = writer.await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.abort();
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
