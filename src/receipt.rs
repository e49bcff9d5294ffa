//! Correlation of receipted commands with their RECEIPT frames.
//!
//! The connection's reader task is the only consumer of inbound frames, so a
//! caller that asks for a receipt parks on a oneshot keyed by the receipt id
//! until the reader resolves it, or until the registry shuts down because the
//! connection died.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, oneshot};
use tracing::trace;

use crate::error::ConnError;
use crate::id::IdGenerator;

/// Alias for the pending map: receipt-id -> oneshot sender to notify.
type PendingReceipts = HashMap<String, oneshot::Sender<()>>;

#[derive(Default)]
struct State {
    pending: PendingReceipts,
    closed: bool,
}

/// Per-connection table of outstanding receipts.
pub struct ReceiptRegistry {
    state: Mutex<State>,
    ids: Arc<dyn IdGenerator>,
}

impl ReceiptRegistry {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            ids,
        }
    }

    /// A fresh id from the registry's generator.
    pub fn next_id(&self) -> String {
        self.ids.next_id()
    }

    /// Register `id` and return the receiver that fires when it is resolved.
    ///
    /// The receiver yields `Err` if the registry shuts down first. Fails with
    /// `ConnectionClosed` after shutdown and with `Protocol` if `id` is
    /// already pending.
    pub async fn register(&self, id: &str) -> Result<oneshot::Receiver<()>, ConnError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ConnError::ConnectionClosed);
        }
        if state.pending.contains_key(id) {
            return Err(ConnError::Protocol(format!(
                "receipt id '{}' is already pending",
                id
            )));
        }
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id.to_string(), tx);
        Ok(rx)
    }

    /// Signal and remove `id`. Unknown ids are ignored.
    pub async fn resolve(&self, id: &str) {
        let sender = self.state.lock().await.pending.remove(id);
        match sender {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => trace!(receipt_id = id, "receipt for unknown id ignored"),
        }
    }

    /// Remove `id` without signalling it.
    pub async fn revoke(&self, id: &str) {
        self.state.lock().await.pending.remove(id);
    }

    /// Release every pending wait with a closed outcome and refuse new
    /// registrations. Calling it again does nothing.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        // dropping the senders wakes the receivers with RecvError
        state.pending.clear();
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Run `send` with a freshly registered receipt id and wait for the
    /// matching RECEIPT.
    ///
    /// If `send` fails its registration is revoked and the error returned.
    /// If the connection dies before the receipt arrives the wait ends with
    /// `ConnError::ConnectionClosed`.
    pub async fn send_with_receipt<F, Fut>(&self, send: F) -> Result<(), ConnError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<(), ConnError>>,
    {
        let id = self.next_id();
        let rx = self.register(&id).await?;
        if let Err(e) = send(id.clone()).await {
            self.revoke(&id).await;
            return Err(e);
        }
        rx.await.map_err(|_| ConnError::ConnectionClosed)
    }
}
