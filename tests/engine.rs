//! Integration tests for the request layer (C6) and the reconnect manager
//! (C3), driving a real `Engine::tcp` client against a loopback listener
//! that plays the part of the engine.

use std::time::Duration;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};

use yate_extmodule::{Config, Engine, HandlerOutcome, Message};

/// Spec §8 scenario S3: install a handler, receive the engine's ack,
/// then acknowledge a matching incoming message exactly once.
#[tokio::test]
async fn install_then_acknowledge_flow() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (rd, mut wr) = stream.into_split();
        let mut lines = BufReader::new(rd).lines();

        let connect = lines.next_line().await.unwrap().unwrap();
        assert!(connect.starts_with("%%>connect:global:"));

        let install = lines.next_line().await.unwrap().unwrap();
        assert_eq!(install, "%%>install:100:call.route");
        wr.write_all(b"%%<install:100:call.route:true\n").await.unwrap();

        wr.write_all(b"%%>message:42:123:call.route::x:called=9999\n")
            .await
            .unwrap();

        let ack = lines.next_line().await.unwrap().unwrap();
        assert_eq!(ack, "%%<message:42:true::x:called=9999");
    });

    let engine = Engine::tcp("127.0.0.1", addr.port(), Config::default());

    let installed = engine
        .install(
            |_message: &Message| async { HandlerOutcome::Handled(true) },
            "call.route",
            100,
            None,
        )
        .await
        .unwrap();
    assert!(installed);

    server.await.unwrap();
}

/// A second `install` call for the same `(name, filter)` replaces the
/// handler in place with no further engine round-trip, and resolves
/// `true` without waiting on anything.
#[tokio::test]
async fn reinstall_same_name_and_filter_skips_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (rd, mut wr) = stream.into_split();
        let mut lines = BufReader::new(rd).lines();

        let _connect = lines.next_line().await.unwrap().unwrap();
        let install = lines.next_line().await.unwrap().unwrap();
        assert_eq!(install, "%%>install:100:engine.timer");
        wr.write_all(b"%%<install:100:engine.timer:true\n").await.unwrap();

        // No second `%%>install` line should ever arrive; a `%%>message`
        // below proves the connection stayed idle in between.
        wr.write_all(b"%%>message:1:1:engine.timer::\n").await.unwrap();
        let ack = lines.next_line().await.unwrap().unwrap();
        assert_eq!(ack, "%%<message:1:true::");
    });

    let engine = Engine::tcp("127.0.0.1", addr.port(), Config::default());

    assert!(
        engine
            .install(|_: &Message| async { HandlerOutcome::Handled(true) }, "engine.timer", 100, None)
            .await
            .unwrap()
    );
    assert!(
        engine
            .install(|_: &Message| async { HandlerOutcome::Handled(true) }, "engine.timer", 100, None)
            .await
            .unwrap()
    );

    server.await.unwrap();
}

/// Spec §8 scenario S4: a dispatch with no matching answer resolves
/// quietly with the original message and `success = Some(false)` once
/// the configured deadline elapses; no error is surfaced.
#[tokio::test]
async fn dispatch_resolves_quietly_on_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (rd, _wr) = stream.into_split();
        let mut lines = BufReader::new(rd).lines();

        let _connect = lines.next_line().await.unwrap().unwrap();
        let dispatched = lines.next_line().await.unwrap().unwrap();
        assert!(dispatched.starts_with("%%>message:"));

        // Never answer; hold the connection open past the deadline.
        tokio::time::sleep(Duration::from_millis(500)).await;
    });

    let config = Config::default().with_dispatch_timeout(Duration::from_millis(50));
    let engine = Engine::tcp("127.0.0.1", addr.port(), config);

    let message = Message::outgoing("call.route", "");
    let id = message.id.clone();

    let answer = engine.dispatch(message).await.unwrap();
    assert_eq!(answer.id, id);
    assert_eq!(answer.success, Some(false));

    server.abort();
}

/// Spec §8 scenario S5: after a disconnect/reconnect cycle, the engine
/// replays the registry — setlocal rows, then installs, then watches —
/// before anything else, on the freshly dialed connection.
#[tokio::test]
async fn reconnect_replays_registry_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = Config::default().with_reconnect_timeout(Duration::from_millis(30));
    let engine = Engine::tcp("127.0.0.1", addr.port(), config);

    {
        let (stream, _) = listener.accept().await.unwrap();
        let (rd, mut wr) = stream.into_split();
        let mut lines = BufReader::new(rd).lines();

        let connect = lines.next_line().await.unwrap().unwrap();
        assert!(connect.starts_with("%%>connect:global:"));

        let engine_for_setlocal = engine.clone();
        let setlocal_task = tokio::spawn(async move { engine_for_setlocal.setlocal("bufsize", Some("4096".to_string())).await });
        let setlocal_line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(setlocal_line, "%%>setlocal:bufsize:4096");
        wr.write_all(b"%%<setlocal:bufsize:4096:true\n").await.unwrap();
        assert_eq!(setlocal_task.await.unwrap().unwrap(), Some("4096".to_string()));

        let engine_for_install = engine.clone();
        let install_task = tokio::spawn(async move {
            engine_for_install
                .install(|_: &Message| async { HandlerOutcome::Handled(true) }, "engine.timer", 100, None)
                .await
        });
        let install_line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(install_line, "%%>install:100:engine.timer");
        wr.write_all(b"%%<install:100:engine.timer:true\n").await.unwrap();
        assert!(install_task.await.unwrap().unwrap());

        // End of block: `lines`/`rd` and `wr` drop, closing the socket and
        // triggering the client's reconnect loop.
    }

    let (stream, _) = listener.accept().await.unwrap();
    let (rd, _wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    let connect = lines.next_line().await.unwrap().unwrap();
    assert!(connect.starts_with("%%>connect:global:"));
    let setlocal_replay = lines.next_line().await.unwrap().unwrap();
    assert_eq!(setlocal_replay, "%%>setlocal:bufsize:4096");
    let install_replay = lines.next_line().await.unwrap().unwrap();
    assert_eq!(install_replay, "%%>install:100:engine.timer");
}

/// Outbound operations issued while disconnected are parked in FIFO order
/// and flushed, in order, once the connection comes back (spec §3
/// invariant (iii)).
#[tokio::test]
async fn enqueue_while_disconnected_is_parked_then_flushed_in_order() {
    // Learn a free port, then release it: nothing is listening yet, so
    // the engine's dial attempts fail (connection refused) until the
    // listener below rebinds it, forcing every `enqueue` in between onto
    // the offline queue.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = Config::default().with_reconnect_timeout(Duration::from_millis(30));
    let engine = Engine::tcp("127.0.0.1", port, config);

    engine.enqueue(&Message::outgoing("first", "")).await.unwrap();
    engine.enqueue(&Message::outgoing("second", "")).await.unwrap();
    engine.enqueue(&Message::outgoing("third", "")).await.unwrap();

    let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
    let (stream, _) = listener.accept().await.unwrap();
    let (rd, _wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    let connect = lines.next_line().await.unwrap().unwrap();
    assert!(connect.starts_with("%%>connect:global:"));

    for expected in ["first", "second", "third"] {
        let line = lines.next_line().await.unwrap().unwrap();
        assert!(line.starts_with("%%>message:"));
        assert!(line.contains(&format!(":{expected}:")));
    }
}
