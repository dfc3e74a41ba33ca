use crate::client::utils::{is_access_denied_status, redact_url};
use crate::error::{ChatError, Result};
use crate::traits::{Connector, Link};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

/// Native socket transport over `tokio-tungstenite`.
pub struct WsConnector {
    outbound_buffer: usize,
}

impl WsConnector {
    pub fn new(outbound_buffer: usize) -> Self {
        Self {
            outbound_buffer: outbound_buffer.max(1),
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn open(&self, url: &url::Url) -> Result<Link> {
        tracing::info!("[Socket-Out] Connecting to {}", redact_url(url));

        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(map_connect_error)?;
        tracing::info!("[Socket] Upgrade response status: {}", response.status());

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.outbound_buffer);
        let (in_tx, in_rx) = async_channel::bounded(256);

        // Writer: drains the outbound queue until the sender side is dropped.
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                tracing::trace!("[Socket-Out] {} bytes", text.len());
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    tracing::warn!("[Socket-Out] Write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
            tracing::debug!("[Socket-Out] Writer stopped");
        });

        tokio::spawn(async move {
            while let Some(item) = source.next().await {
                match item {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(Ok(text.as_str().to_owned())).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            if in_tx.send(Ok(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(_) => tracing::warn!("[Socket] Dropping non-UTF-8 binary frame"),
                    },
                    Ok(WsMessage::Close(frame)) => {
                        tracing::info!("[Socket] Server closed the connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("[Socket] Stream error: {}", e);
                        let _ = in_tx
                            .send(Err(ChatError::TransientConnection(e.to_string())))
                            .await;
                        break;
                    }
                }
            }
            tracing::debug!("[Socket] Reader stopped");
        });

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn map_connect_error(err: tungstenite::Error) -> ChatError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if is_access_denied_status(status) {
                ChatError::Auth(format!("socket upgrade rejected with status {}", status))
            } else {
                ChatError::TransientConnection(format!(
                    "socket upgrade failed with status {}",
                    status
                ))
            }
        }
        other => ChatError::TransientConnection(other.to_string()),
    }
}
