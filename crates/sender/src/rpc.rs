//! Framed msgpack RPC.
//!
//! One wire format serves both channels: a length-prefixed frame holding a
//! msgpack `{endpoint, data}` request, answered with a msgpack string that
//! is `"OK"` on success and an error description otherwise.
//!
//! - Inbound, the API submits out-of-band notifications to `v0/send` and a
//!   master forwards fully prepared messages to `v0/slave_send`.
//! - Outbound, [`SlavePool`] fans dispatch out to slave senders
//!   round-robin with a bounded per-attempt timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use klaxon_core::MessagePayload;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

use crate::dispatcher::VendorSender;
use crate::error::SenderError;
use crate::metrics::SenderMetrics;

/// Reply sent when a request was handled successfully.
pub const OK_REPLY: &str = "OK";

/// One RPC request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub endpoint: String,
    pub data: MessagePayload,
}

/// The inbound RPC listener.
pub struct RpcServer {
    bind: String,
    send_tx: UnboundedSender<MessagePayload>,
    local: VendorSender,
    metrics: Arc<SenderMetrics>,
}

impl RpcServer {
    #[must_use]
    pub fn new(
        bind: impl Into<String>,
        send_tx: UnboundedSender<MessagePayload>,
        local: VendorSender,
        metrics: Arc<SenderMetrics>,
    ) -> Self {
        Self {
            bind: bind.into(),
            send_tx,
            local,
            metrics,
        }
    }

    /// Bind and return the accept loop's listener address.
    pub async fn bind(&self) -> Result<TcpListener, SenderError> {
        TcpListener::bind(&self.bind)
            .await
            .map_err(|e| SenderError::Rpc(format!("cannot bind {}: {e}", self.bind)))
    }

    /// Accept loop. Each connection gets its own task and may carry any
    /// number of request frames.
    pub async fn run(self: Arc<Self>, listener: TcpListener) {
        info!(bind = %self.bind, "rpc listener up");
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "rpc connection accepted");
                    let server = Arc::clone(&self);
                    tokio::spawn(async move { server.handle_connection(stream).await });
                }
                Err(e) => {
                    warn!(error = %e, "rpc accept failed");
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream) {
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
        while let Some(frame) = framed.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "rpc frame error, dropping connection");
                    return;
                }
            };
            let reply = self.handle_frame(&frame).await;
            let Ok(encoded) = rmp_serde::to_vec(&reply) else {
                error!("failed to encode rpc reply");
                return;
            };
            if let Err(e) = framed.send(Bytes::from(encoded)).await {
                warn!(error = %e, "rpc reply write failed");
                return;
            }
        }
    }

    async fn handle_frame(&self, frame: &[u8]) -> String {
        let request: RpcRequest = match rmp_serde::from_slice(frame) {
            Ok(request) => request,
            Err(e) => return format!("malformed request: {e}"),
        };
        match request.endpoint.as_str() {
            "v0/send" => {
                // Out-of-band notification from the API; it joins the send
                // queue with no plan id and bypasses aggregation.
                self.metrics.incr_notification();
                match self.send_tx.send(request.data) {
                    Ok(()) => OK_REPLY.to_owned(),
                    Err(_) => "send queue closed".to_owned(),
                }
            }
            "v0/slave_send" => {
                // Fully prepared message from a master; deliver through the
                // local vendors and only acknowledge a completed send.
                match self.local.send(&request.data).await {
                    Ok(_latency) => OK_REPLY.to_owned(),
                    Err(e) => format!("send failed: {e}"),
                }
            }
            other => format!("unknown endpoint: {other}"),
        }
    }
}

/// Round-robin client over the configured slave senders.
pub struct SlavePool {
    slaves: Vec<String>,
    next: AtomicUsize,
    timeout: Duration,
    metrics: Arc<SenderMetrics>,
}

impl SlavePool {
    /// `None` when no slaves are configured.
    #[must_use]
    pub fn new(
        slaves: Vec<String>,
        timeout: Duration,
        metrics: Arc<SenderMetrics>,
    ) -> Option<Self> {
        if slaves.is_empty() {
            return None;
        }
        Some(Self {
            slaves,
            next: AtomicUsize::new(0),
            timeout,
            metrics,
        })
    }

    /// Try each slave once, round-robin, within the per-attempt timeout.
    /// Returns `true` when one of them acknowledged the send.
    pub async fn send(&self, message: &MessagePayload) -> bool {
        for _ in 0..self.slaves.len() {
            let index = self.next.fetch_add(1, Ordering::Relaxed) % self.slaves.len();
            let address = &self.slaves[index];
            match tokio::time::timeout(self.timeout, self.send_to(address, message)).await {
                Ok(Ok(())) => {
                    self.metrics.incr_slave_send_success();
                    debug!(%address, message_id = ?message.message_id, "slave accepted message");
                    return true;
                }
                Ok(Err(e)) => {
                    self.metrics.incr_slave_send_fail();
                    warn!(%address, error = %e, "slave send failed");
                }
                Err(_) => {
                    self.metrics.incr_slave_send_fail();
                    warn!(%address, timeout = ?self.timeout, "slave send timed out");
                }
            }
        }
        false
    }

    async fn send_to(&self, address: &str, message: &MessagePayload) -> Result<(), SenderError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| SenderError::Rpc(format!("connect {address}: {e}")))?;
        let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

        let request = RpcRequest {
            endpoint: "v0/slave_send".to_owned(),
            data: message.clone(),
        };
        let encoded = rmp_serde::to_vec_named(&request)
            .map_err(|e| SenderError::Rpc(format!("encode request: {e}")))?;
        framed
            .send(Bytes::from(encoded))
            .await
            .map_err(|e| SenderError::Rpc(format!("write request: {e}")))?;

        let frame = framed
            .next()
            .await
            .ok_or_else(|| SenderError::Rpc("connection closed before reply".to_owned()))?
            .map_err(|e| SenderError::Rpc(format!("read reply: {e}")))?;
        let reply: String = rmp_serde::from_slice(&frame)
            .map_err(|e| SenderError::Rpc(format!("decode reply: {e}")))?;

        if reply == OK_REPLY {
            Ok(())
        } else {
            Err(SenderError::Rpc(reply))
        }
    }
}
