//! Bidirectional JSON-RPC peer
//!
//! One `RpcPeer` owns one channel. Outgoing calls are correlated by id in a
//! pending table; incoming requests are dispatched to a `RequestHandler` on
//! their own task, so a callback arriving while a call is in flight never
//! waits on that call.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, trace, warn};

use crate::error::{PluginError, Result};
use crate::protocol::{RpcError, RpcMessage, RpcRequest, RpcResponse};

/// Reading half of a channel
pub type BoxedReader = Box<dyn AsyncBufRead + Send + Unpin>;
/// Writing half of a channel
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Default bound on a single call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Serves requests arriving from the other side of a channel
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, method: &str, params: serde_json::Value) -> std::result::Result<serde_json::Value, RpcError>;
}

enum Outgoing {
    Frame(RpcMessage),
    Close,
}

struct PeerInner {
    label: String,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<RpcResponse>>>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    closed: AtomicBool,
    closed_rx: watch::Receiver<bool>,
    timeout: Duration,
}

/// Handle for making calls over a channel. Cheap to clone.
#[derive(Clone)]
pub struct RpcPeer {
    inner: Arc<PeerInner>,
}

/// Owns the channel halves until a handler is attached
pub struct PeerDriver {
    inner: Arc<PeerInner>,
    reader: BoxedReader,
    writer: BoxedWriter,
    outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
    closed_tx: watch::Sender<bool>,
}

impl RpcPeer {
    /// Create a peer over a channel.
    ///
    /// Nothing is read or written until [`PeerDriver::start`] is called, which
    /// lets the handler hold a clone of the peer.
    pub fn new(
        label: impl Into<String>,
        reader: BoxedReader,
        writer: BoxedWriter,
        timeout: Duration,
    ) -> (Self, PeerDriver) {
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let inner = Arc::new(PeerInner {
            label: label.into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outgoing,
            closed: AtomicBool::new(false),
            closed_rx,
            timeout,
        });
        let driver = PeerDriver {
            inner: inner.clone(),
            reader,
            writer,
            outgoing_rx,
            closed_tx,
        };
        (Self { inner }, driver)
    }

    /// Label used in logs
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Default call bound
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Call a remote method with the default timeout
    pub async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
        self.call_with_timeout(method, params, self.inner.timeout)
            .await
    }

    /// Call a remote method.
    ///
    /// On timeout the pending entry is dropped; a response arriving later is
    /// discarded.
    pub async fn call_with_timeout<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
        timeout: Duration,
    ) -> Result<R> {
        if self.is_closed() {
            return Err(self.closed_error(method));
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(method, params, id)?;

        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        // The reader marks the peer closed before draining the table
        if self.is_closed() {
            self.pending().remove(&id);
            return Err(self.closed_error(method));
        }

        debug!(peer = %self.inner.label, method, id, "calling");
        if self
            .inner
            .outgoing
            .send(Outgoing::Frame(RpcMessage::Request(request)))
            .is_err()
        {
            self.pending().remove(&id);
            return Err(self.closed_error(method));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(self.closed_error(method)),
            Err(_) => {
                self.pending().remove(&id);
                warn!(peer = %self.inner.label, method, id, "call timed out");
                Err(PluginError::CallTimeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Whether the channel is gone
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Resolve once the channel is gone
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_rx.clone();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Flush queued frames and shut the writing half
    pub fn close(&self) {
        let _ = self.inner.outgoing.send(Outgoing::Close);
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<RpcResponse>>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn closed_error(&self, method: &str) -> PluginError {
        PluginError::Transport(format!(
            "connection '{}' closed during {}",
            self.inner.label, method
        ))
    }
}

impl PeerDriver {
    /// Spawn the reader and writer tasks and start serving `handler`
    pub fn start(self, handler: Arc<dyn RequestHandler>) {
        let PeerDriver {
            inner,
            reader,
            writer,
            outgoing_rx,
            closed_tx,
        } = self;

        tokio::spawn(write_loop(inner.label.clone(), writer, outgoing_rx));
        tokio::spawn(read_loop(inner, reader, handler, closed_tx));
    }
}

async fn write_loop(
    label: String,
    mut writer: BoxedWriter,
    mut outgoing_rx: mpsc::UnboundedReceiver<Outgoing>,
) {
    while let Some(outgoing) = outgoing_rx.recv().await {
        let message = match outgoing {
            Outgoing::Frame(message) => message,
            Outgoing::Close => break,
        };
        let mut line = match serde_json::to_vec(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!(peer = %label, "failed to encode frame: {}", e);
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = writer.write_all(&line).await {
            debug!(peer = %label, "write failed: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            debug!(peer = %label, "flush failed: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
    trace!(peer = %label, "writer finished");
}

async fn read_loop(
    inner: Arc<PeerInner>,
    mut reader: BoxedReader,
    handler: Arc<dyn RequestHandler>,
    closed_tx: watch::Sender<bool>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = %inner.label, "read failed: {}", e);
                break;
            }
        }
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }

        match serde_json::from_str::<RpcMessage>(frame) {
            Ok(RpcMessage::Response(response)) => {
                let waiter = inner
                    .pending
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(
                        peer = %inner.label,
                        id = response.id,
                        "discarding response with no waiting caller"
                    ),
                }
            }
            Ok(RpcMessage::Request(request)) => {
                let handler = handler.clone();
                let outgoing = inner.outgoing.clone();
                tokio::spawn(async move {
                    let id = request.id;
                    let response = match handler.handle(&request.method, request.params).await {
                        Ok(value) => RpcResponse::success(id, value),
                        Err(error) => RpcResponse::error(id, error),
                    };
                    let _ = outgoing.send(Outgoing::Frame(RpcMessage::Response(response)));
                });
            }
            Err(e) => warn!(peer = %inner.label, "dropping malformed frame: {}", e),
        }
    }

    inner.closed.store(true, Ordering::SeqCst);
    // Dropping the senders fails every call still waiting on this channel
    inner
        .pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
    let _ = closed_tx.send(true);
    let _ = inner.outgoing.send(Outgoing::Close);
    debug!(peer = %inner.label, "connection closed");
}
