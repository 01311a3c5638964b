//! Tests for inbound routing: hooks, responses, binary units and read errors.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use rstest::rstest;
use tokio::sync::mpsc;
use wirehop::{
    Message,
    SocketBuilder,
    SocketError,
    hooks::{binary_handler, hook},
};
use wirehop_testing::{LoggerHandle, logger, socket_pair};

#[rstest]
#[tokio::test]
async fn hook_receives_unsolicited_message_and_replies() {
    let builder = SocketBuilder::new().hook(
        "PING",
        hook(|inbound| async move {
            let seq: u32 = inbound.message().payload()?;
            inbound.reply("PONG", &(seq + 1)).await?;
            Ok(())
        }),
    );
    let (_socket, mut peer) = socket_pair(builder).await.expect("pair");

    let mut ping = Message::with_payload("PING", &41u32).expect("payload");
    ping.id = 7;
    peer.send_message(&ping).await;

    let pong = peer.next_message().await;
    assert_eq!(pong.code, "PONG");
    assert_eq!(pong.in_response_to, 7);
    assert_eq!(pong.payload::<u32>().expect("payload"), 42);
}

#[rstest]
#[tokio::test]
async fn hook_error_keeps_the_loop_running(mut logger: LoggerHandle) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let builder = SocketBuilder::new().hook(
        "PING",
        hook(move |_| {
            let calls = Arc::clone(&counted);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("hook exploded".into())
            }
        }),
    );
    let (socket, mut peer) = socket_pair(builder).await.expect("pair");

    for id in 1..=2 {
        let mut ping = Message::new("PING", "");
        ping.id = id;
        peer.send_message(&ping).await;
    }
    // A request round trip proves both PINGs were dispatched first.
    let pending = socket
        .send_request("SYNC", &(), None)
        .await
        .expect("send request");
    let sync = peer.next_message().await;
    peer.send_message(&Message::new("SYNCED", "").in_reply_to(sync.id))
        .await;
    pending.await.expect("response");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(socket.is_live());
    assert!(logger.find(log::Level::Warn, "hook failed").is_some());
}

#[rstest]
#[tokio::test]
async fn unknown_code_and_malformed_envelope_are_skipped(mut logger: LoggerHandle) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let builder = SocketBuilder::new().hook(
        "KNOWN",
        hook(move |inbound| {
            let tx = tx.clone();
            async move {
                tx.send(inbound.into_message().id)?;
                Ok(())
            }
        }),
    );
    let (socket, mut peer) = socket_pair(builder).await.expect("pair");

    let mut unknown = Message::new("UNKNOWN", "");
    unknown.id = 1;
    peer.send_message(&unknown).await;
    peer.send_text("{not an envelope").await;
    let mut known = Message::new("KNOWN", "");
    known.id = 3;
    peer.send_message(&known).await;

    assert_eq!(rx.recv().await, Some(3));
    assert!(socket.is_live());
    assert!(logger.find(log::Level::Warn, "unexpected message").is_some());
}

#[rstest]
#[tokio::test]
async fn unmatched_response_is_logged_and_ignored(mut logger: LoggerHandle) {
    let (socket, mut peer) = socket_pair(SocketBuilder::new()).await.expect("pair");

    peer.send_message(&Message::new("STRAY", "").in_reply_to(99))
        .await;
    let pending = socket
        .send_request("REAL", &(), None)
        .await
        .expect("send request");
    let request = peer.next_message().await;
    peer.send_message(&Message::new("OK", "").in_reply_to(request.id))
        .await;

    assert_eq!(pending.await.expect("response").code, "OK");
    assert!(
        logger
            .find(log::Level::Warn, "failed to deliver response")
            .is_some()
    );
}

#[rstest]
#[tokio::test]
async fn binary_units_reach_the_handler_in_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let builder = SocketBuilder::new().binary_handler(binary_handler(move |bytes| {
        let tx = tx.clone();
        async move {
            tx.send(bytes)?;
            Ok(())
        }
    }));
    let (_socket, mut peer) = socket_pair(builder).await.expect("pair");

    peer.send_binary(Bytes::from_static(b"one")).await;
    peer.send_binary(Bytes::from_static(b"two")).await;

    assert_eq!(rx.recv().await.as_deref(), Some(&b"one"[..]));
    assert_eq!(rx.recv().await.as_deref(), Some(&b"two"[..]));
}

#[rstest]
#[tokio::test]
async fn binary_handler_error_terminates_the_socket() {
    let builder = SocketBuilder::new()
        .binary_handler(binary_handler(|_| async { Err("disk full".into()) }));
    let (socket, mut peer) = socket_pair(builder).await.expect("pair");
    let pending = socket
        .send_request("WORK", &(), Some(Duration::from_secs(60)))
        .await
        .expect("send request");

    peer.send_binary(Bytes::from_static(b"payload")).await;

    let err = socket.wait().await.expect_err("loop must fail");
    assert!(matches!(err, SocketError::BinaryHandler(_)));
    assert!(!socket.is_live());
    assert!(pending.await.is_err());
    assert!(matches!(
        socket.send("LATE", &()).await,
        Err(SocketError::Closed)
    ));
}

#[rstest]
#[tokio::test]
async fn binary_unit_without_handler_is_dropped() {
    let (socket, mut peer) = socket_pair(SocketBuilder::new()).await.expect("pair");
    peer.send_binary(Bytes::from_static(b"ignored")).await;
    socket.send("AFTER", &()).await.expect("send");
    assert_eq!(peer.next_message().await.code, "AFTER");
    assert!(socket.is_live());
}

#[rstest]
#[tokio::test]
async fn read_error_without_handler_terminates() {
    let builder = SocketBuilder::new().max_message_size(64);
    let (socket, mut peer) = socket_pair(builder).await.expect("pair");

    peer.send_binary(vec![0u8; 65]).await;

    let err = socket.wait().await.expect_err("oversize unit must fail");
    assert!(matches!(err, SocketError::Transport(_)));
    assert!(!socket.is_live());
}

#[rstest]
#[tokio::test]
async fn error_handler_can_absorb_read_errors() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&seen);
    let builder = SocketBuilder::new()
        .max_message_size(64)
        .error_handler(move |err| {
            assert!(matches!(err, SocketError::Transport(_)));
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    let (socket, mut peer) = socket_pair(builder).await.expect("pair");

    peer.send_binary(vec![0u8; 65]).await;

    // The framed reader ends after a decode error, so the loop sees a clean end
    // of stream once the handler has absorbed the error.
    socket.wait().await.expect("absorbed");
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn hook_added_after_start_sees_later_messages() {
    let (socket, mut peer) = socket_pair(SocketBuilder::new()).await.expect("pair");
    let (tx, mut rx) = mpsc::unbounded_channel();
    socket.add_hook(
        "LATE",
        hook(move |inbound| {
            let tx = tx.clone();
            async move {
                tx.send(inbound.message().id)?;
                Ok(())
            }
        }),
    );

    let mut late = Message::new("LATE", "");
    late.id = 5;
    peer.send_message(&late).await;
    assert_eq!(rx.recv().await, Some(5));
}

#[rstest]
#[tokio::test]
async fn close_from_inside_a_hook_does_not_deadlock() {
    let builder = SocketBuilder::new().hook(
        "BYE",
        hook(|inbound| async move {
            inbound.socket().close().await?;
            Ok(())
        }),
    );
    let (socket, mut peer) = socket_pair(builder).await.expect("pair");

    let mut bye = Message::new("BYE", "");
    bye.id = 1;
    peer.send_message(&bye).await;

    tokio::time::timeout(Duration::from_secs(5), socket.wait())
        .await
        .expect("dispatch loop must exit")
        .expect("clean exit");
    assert!(!socket.is_live());
    assert!(peer.is_closed().await);
}
