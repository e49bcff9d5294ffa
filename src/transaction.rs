use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::command::Body;
use crate::error::ConnError;
use crate::receipt::ReceiptRegistry;
use crate::transport::Transport;

/// One BEGIN..COMMIT/ABORT scope on a connection.
///
/// Once committed or aborted the transaction is done: further sends, acks
/// and commits fail with [`ConnError::TransactionDone`], while a further
/// abort is a no-op so cleanup paths can always call it.
pub struct Transaction {
    id: String,
    done: AtomicBool,
    transport: Transport,
    registry: Arc<ReceiptRegistry>,
}

impl Transaction {
    pub(crate) fn new(id: String, transport: Transport, registry: Arc<ReceiptRegistry>) -> Self {
        Self {
            id,
            done: AtomicBool::new(false),
            transport,
            registry,
        }
    }

    /// The `transaction` header value used for this scope.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), ConnError> {
        if self.is_done() {
            Err(ConnError::TransactionDone)
        } else {
            Ok(())
        }
    }

    /// Send a message as part of the transaction. Never receipted.
    pub async fn send(
        &self,
        destination: &str,
        headers: &[(String, String)],
        content_type: &str,
        body: Option<Body>,
    ) -> Result<(), ConnError> {
        self.ensure_open()?;
        self.transport
            .tx_send(&self.id, destination, headers, content_type, body)
            .await
    }

    pub async fn ack(&self, id: &str) -> Result<(), ConnError> {
        self.ensure_open()?;
        self.transport.tx_ack(&self.id, id).await
    }

    pub async fn nack(&self, id: &str) -> Result<(), ConnError> {
        self.ensure_open()?;
        self.transport.tx_nack(&self.id, id).await
    }

    /// Commit the transaction.
    ///
    /// The transaction is done as soon as this is called, whether or not the
    /// COMMIT reaches the broker.
    pub async fn commit(&self, receipt: bool) -> Result<(), ConnError> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Err(ConnError::TransactionDone);
        }
        debug!(transaction = %self.id, "commit");
        if receipt {
            let (transport, id) = (&self.transport, self.id.as_str());
            self.registry
                .send_with_receipt(|rid| async move { transport.commit(id, Some(&rid)).await })
                .await
        } else {
            self.transport.commit(&self.id, None).await
        }
    }

    /// Abort the transaction. Aborting a done transaction succeeds without
    /// sending anything.
    pub async fn abort(&self, receipt: bool) -> Result<(), ConnError> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!(transaction = %self.id, "abort");
        if receipt {
            let (transport, id) = (&self.transport, self.id.as_str());
            self.registry
                .send_with_receipt(|rid| async move { transport.abort(id, Some(&rid)).await })
                .await
        } else {
            self.transport.abort(&self.id, None).await
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::StompCodec;
    use crate::frame::{Command, Frame};
    use crate::id::UuidGenerator;
    use crate::transport;
    use futures::StreamExt;
    use tokio_util::codec::FramedRead;

    fn setup() -> (
        Transaction,
        FramedRead<tokio::io::DuplexStream, StompCodec>,
    ) {
        let (client, server) = tokio::io::duplex(4096);
        let (_reader, transport) = transport::split(Box::new(client), StompCodec::new());
        let registry = Arc::new(ReceiptRegistry::new(Arc::new(UuidGenerator)));
        let tx = Transaction::new("tx-1".to_string(), transport, registry);
        (tx, FramedRead::new(server, StompCodec::new()))
    }

    async fn next(server: &mut FramedRead<tokio::io::DuplexStream, StompCodec>) -> Frame {
        server.next().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn operations_carry_transaction_header() {
        let (tx, mut server) = setup();
        tx.send("/queue/a", &[], "text/plain", Some(Body::from("hi")))
            .await
            .unwrap();
        tx.ack("m-1").await.unwrap();
        tx.nack("m-2").await.unwrap();
        tx.commit(false).await.unwrap();

        for expected in [Command::Send, Command::Ack, Command::Nack, Command::Commit] {
            let f = next(&mut server).await;
            assert_eq!(f.command, expected);
            assert_eq!(f.get_header("transaction"), Some("tx-1"));
            assert_eq!(f.get_header("receipt"), None);
        }
        assert!(tx.is_done());
    }

    #[tokio::test]
    async fn abort_is_idempotent_and_commit_after_abort_fails() {
        let (tx, mut server) = setup();
        tx.abort(false).await.unwrap();
        tx.abort(false).await.unwrap();
        assert!(matches!(
            tx.commit(false).await,
            Err(ConnError::TransactionDone)
        ));
        assert!(matches!(
            tx.send("/queue/a", &[], "text/plain", None).await,
            Err(ConnError::TransactionDone)
        ));
        assert!(matches!(tx.ack("m").await, Err(ConnError::TransactionDone)));
        assert!(matches!(tx.nack("m").await, Err(ConnError::TransactionDone)));

        assert_eq!(next(&mut server).await.command, Command::Abort);
        drop(tx);
        assert!(server.next().await.is_none());
    }

    #[tokio::test]
    async fn failed_commit_still_consumes_transaction() {
        let (tx, server) = setup();
        drop(server);
        assert!(tx.commit(false).await.is_err());
        assert!(tx.is_done());
        assert!(matches!(
            tx.commit(false).await,
            Err(ConnError::TransactionDone)
        ));
        tx.abort(false).await.unwrap();
    }
}
