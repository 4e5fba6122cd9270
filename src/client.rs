use crate::channel::{Connector, DuplexChannel};
use crate::event::{ChannelEvent, EventSender, SessionEvent};
use crate::types::{AudioFragment, InboundFrame};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_tungstenite::tungstenite::Message;

mod config;
pub(crate) mod consts;
mod stats;
mod utils;

pub use config::{ChannelConfig, ChannelConfigBuilder};
pub use stats::Stats;

type OutboundTx = tokio::sync::mpsc::Sender<Message>;

/// An open WebSocket to the voice service.
///
/// A writer task drains the outbound queue into the socket; a reader task posts every
/// inbound frame, and finally the close or error, to the session's event queue.
pub struct Connection {
    out_tx: Option<OutboundTx>,
    open: Arc<AtomicBool>,
    stats: Arc<Mutex<Stats>>,
    send_handle: tokio::task::JoinHandle<()>,
    recv_handle: tokio::task::JoinHandle<()>,
}

impl Connection {
    pub fn stats(&self) -> Result<Stats> {
        if let Ok(stats_guard) = self.stats.lock() {
            Ok(stats_guard.clone())
        } else {
            Err(anyhow::anyhow!("failed to get stats"))
        }
    }
}

impl DuplexChannel for Connection {
    fn is_open(&self) -> bool {
        self.out_tx.is_some() && self.open.load(Ordering::Acquire)
    }

    fn send_binary(&mut self, fragment: AudioFragment) -> Result<()> {
        let tx = self
            .out_tx
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("channel already closed"))?;
        tx.try_send(Message::Binary(fragment.into_inner()))
            .map_err(|e| anyhow::anyhow!("outbound queue rejected audio chunk: {}", e))
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        // Dropping the sender lets the writer flush what is queued and close the socket.
        if self.out_tx.take().is_some() {
            self.recv_handle.abort();
            tracing::info!("closing connection");
        }
    }

    fn stats(&self) -> Option<Stats> {
        Connection::stats(self).ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
        if !self.send_handle.is_finished() {
            tracing::trace!("writer still flushing after close");
        }
    }
}

/// Opens connections from a fixed [`ChannelConfig`].
pub struct WsConnector {
    config: ChannelConfig,
}

impl WsConnector {
    pub fn new(config: ChannelConfig) -> Self {
        Self { config }
    }
}

#[async_trait(?Send)]
impl Connector for WsConnector {
    async fn connect(&self, events: EventSender) -> Result<Box<dyn DuplexChannel>> {
        let connection = connect_with_config(&self.config, events).await?;
        Ok(Box::new(connection))
    }
}

pub async fn connect_with_config(config: &ChannelConfig, events: EventSender) -> Result<Connection> {
    let request = utils::build_request(config).context("invalid channel request")?;

    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .with_context(|| format!("failed to connect to {}", config.url()))?;
    tracing::info!("connected to {}", config.url());

    let (mut write, mut read) = ws_stream.split();

    let (out_tx, mut out_rx) = tokio::sync::mpsc::channel::<Message>(config.capacity());
    let open = Arc::new(AtomicBool::new(true));
    let stats = Arc::new(Mutex::new(Stats::new()));

    let send_open = open.clone();
    let send_stats = stats.clone();
    let send_handle = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let len = message.len();
            if let Err(e) = write.send(message).await {
                tracing::error!("failed to send message: {}", e);
                send_open.store(false, Ordering::Release);
                break;
            }
            if let Ok(mut stats_guard) = send_stats.lock() {
                stats_guard.record_sent(len);
            }
        }
        if let Err(e) = write.close().await {
            tracing::debug!("error while closing socket: {}", e);
        }
    });

    let recv_open = open.clone();
    let recv_stats = stats.clone();
    let recv_handle = tokio::spawn(async move {
        let mut terminal = ChannelEvent::Closed(None);
        while let Some(message) = read.next().await {
            let message = match message {
                Err(e) => {
                    tracing::error!("failed to read message: {}", e);
                    terminal = ChannelEvent::Error(e.to_string());
                    break;
                }
                Ok(message) => message,
            };
            let frame = match message {
                Message::Text(text) => {
                    tracing::debug!("received text frame ({} bytes)", text.len());
                    if let Ok(mut stats_guard) = recv_stats.lock() {
                        stats_guard.record_text_received(text.len());
                    }
                    InboundFrame::Text(text)
                }
                Message::Binary(bin) => {
                    tracing::trace!("received binary frame ({} bytes)", bin.len());
                    if let Ok(mut stats_guard) = recv_stats.lock() {
                        stats_guard.record_binary_received(bin.len());
                    }
                    InboundFrame::Binary(bin)
                }
                Message::Close(reason) => {
                    tracing::info!("connection closed: {:?}", reason);
                    terminal = ChannelEvent::Closed(reason.map(|frame| frame.reason.to_string()));
                    break;
                }
                _ => continue,
            };
            if events.send(SessionEvent::frame(frame)).is_err() {
                tracing::debug!("session gone, stopping reader");
                recv_open.store(false, Ordering::Release);
                return;
            }
        }
        recv_open.store(false, Ordering::Release);
        let _ = events.send(SessionEvent::Channel(terminal));
    });

    Ok(Connection {
        out_tx: Some(out_tx),
        open,
        stats,
        send_handle,
        recv_handle,
    })
}
