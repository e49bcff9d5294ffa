//! Tests for transactions: frame construction and the live BEGIN..COMMIT
//! and BEGIN..ABORT exchanges.

mod common;

use bytes::BytesMut;
use cobalt_stomp::command;
use cobalt_stomp::{Body, Command, ConnError, Frame, StompCodec};
use common::{PROMPT, expect_frame, receipt};
use futures::SinkExt;
use tokio_util::codec::{Decoder, Encoder};

/// Helper function to verify a decoded frame has the expected command and transaction header
fn verify_transaction_frame(frame: &Frame, expected_command: Command, expected_tx_id: &str) {
    assert_eq!(frame.command, expected_command);
    assert_eq!(frame.get_header("transaction"), Some(expected_tx_id));
}

/// Helper function to push a frame through the codec and back
fn encode_decode(frame: Frame) -> Frame {
    let mut codec = StompCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf).expect("encode failed");
    codec
        .decode(&mut buf)
        .expect("decode failed")
        .expect("incomplete frame")
}

#[test]
fn transaction_control_frames_on_the_wire() {
    let cases = [
        (command::begin("tx1", None), Command::Begin),
        (command::commit("tx2", Some("r-1")), Command::Commit),
        (command::abort("tx3", None), Command::Abort),
    ];
    for (frame, expected) in cases {
        let tx = frame.get_header("transaction").unwrap().to_string();
        let decoded = encode_decode(frame);
        verify_transaction_frame(&decoded, expected, &tx);
    }
}

#[test]
fn commit_receipt_survives_the_wire() {
    let decoded = encode_decode(command::commit("tx2", Some("r-1")));
    assert_eq!(decoded.get_header("receipt"), Some("r-1"));
}

#[tokio::test]
async fn tx_send_has_body_and_no_receipt() {
    let frame = command::tx_send(
        "tx-9",
        "/queue/orders",
        &[("priority".to_string(), "5".to_string())],
        "application/json",
        Some(Body::from(r#"{"id":1}"#)),
    )
    .await
    .unwrap();
    let decoded = encode_decode(frame);
    verify_transaction_frame(&decoded, Command::Send, "tx-9");
    assert_eq!(decoded.get_header("content-length"), Some("8"));
    assert_eq!(decoded.get_header("priority"), Some("5"));
    assert_eq!(decoded.get_header("receipt"), None);
    assert_eq!(decoded.body, br#"{"id":1}"#.to_vec());
}

// ============================================================================
// Live transactions against a mock broker
// ============================================================================

#[tokio::test]
async fn begin_send_commit_with_receipts() {
    let (conn, mut broker) = common::connect().await;

    let c = conn.clone();
    let pending = tokio::spawn(async move { c.begin(true).await });
    let begin = expect_frame(&mut broker).await;
    assert_eq!(begin.command, Command::Begin);
    broker
        .send(receipt(begin.get_header("receipt").unwrap()))
        .await
        .unwrap();
    let tx = tokio::time::timeout(PROMPT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(begin.get_header("transaction"), Some(tx.id()));
    assert!(!tx.is_done());

    tx.send("/queue/a", &[], "text/plain", Some(Body::from("one")))
        .await
        .unwrap();
    tx.ack("m-7").await.unwrap();
    let send = expect_frame(&mut broker).await;
    verify_transaction_frame(&send, Command::Send, tx.id());
    assert_eq!(send.get_header("receipt"), None);
    let ack = expect_frame(&mut broker).await;
    verify_transaction_frame(&ack, Command::Ack, tx.id());
    assert_eq!(ack.get_header("id"), Some("m-7"));

    let tx = std::sync::Arc::new(tx);
    let committing = {
        let tx = tx.clone();
        tokio::spawn(async move { tx.commit(true).await })
    };
    let commit = expect_frame(&mut broker).await;
    verify_transaction_frame(&commit, Command::Commit, tx.id());
    broker
        .send(receipt(commit.get_header("receipt").unwrap()))
        .await
        .unwrap();
    tokio::time::timeout(PROMPT, committing)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert!(tx.is_done());
    assert!(matches!(
        tx.commit(false).await,
        Err(ConnError::TransactionDone)
    ));
    // cleanup abort after a commit is always safe
    tx.abort(true).await.unwrap();
    conn.close().await;
}

#[tokio::test]
async fn abort_twice_then_commit_fails() {
    let (conn, mut broker) = common::connect().await;

    let tx = conn.begin(false).await.unwrap();
    assert_eq!(expect_frame(&mut broker).await.command, Command::Begin);

    tx.abort(false).await.unwrap();
    tx.abort(false).await.unwrap();
    let abort = expect_frame(&mut broker).await;
    verify_transaction_frame(&abort, Command::Abort, tx.id());

    assert!(matches!(
        tx.commit(false).await,
        Err(ConnError::TransactionDone)
    ));
    assert!(matches!(
        tx.nack("m-1").await,
        Err(ConnError::TransactionDone)
    ));

    // only one ABORT went out; the next frame is the one sent now
    conn.send("/queue/after", &[], "text/plain", None, false)
        .await
        .unwrap();
    assert_eq!(
        expect_frame(&mut broker).await.get_header("destination"),
        Some("/queue/after")
    );
    conn.close().await;
}

#[tokio::test]
async fn receipted_commit_released_when_connection_dies() {
    let (conn, mut broker) = common::connect().await;
    let tx = std::sync::Arc::new(conn.begin(false).await.unwrap());
    expect_frame(&mut broker).await;

    let committing = {
        let tx = tx.clone();
        tokio::spawn(async move { tx.commit(true).await })
    };
    expect_frame(&mut broker).await;
    drop(broker);

    let result = tokio::time::timeout(PROMPT, committing)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ConnError::ConnectionClosed)));
    assert!(tx.is_done());
}
