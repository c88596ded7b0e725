//! Integration tests for the call-leg abstraction (C7), driving a real
//! `Engine::tcp` client against a loopback listener that plays the part
//! of the engine.

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpListener,
};

use yate_extmodule::{Config, Engine, ParamMap, wire};

/// Accepts the channel's long-lived teardown watchers (`chan.notify`,
/// `chan.hangup`) and replies `true` to both, in the order
/// [`crate::channel::Channel::new`] installs them.
async fn accept_and_ack_teardown_watchers(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    wr: &mut tokio::net::tcp::OwnedWriteHalf,
) {
    let connect = lines.next_line().await.unwrap().unwrap();
    assert!(connect.starts_with("%%>connect:global:"));

    let watch_notify = lines.next_line().await.unwrap().unwrap();
    assert_eq!(watch_notify, "%%>watch:chan.notify");
    wr.write_all(b"%%<watch:chan.notify:true\n").await.unwrap();

    let watch_hangup = lines.next_line().await.unwrap().unwrap();
    assert_eq!(watch_hangup, "%%>watch:chan.hangup");
    wr.write_all(b"%%<watch:chan.hangup:true\n").await.unwrap();
}

/// Spec §8 scenario S6: `callTo` emits a `chan.masquerade`/`chan.attach`
/// and resolves with the first matching `chan.notify` notification.
#[tokio::test]
async fn call_to_resolves_on_matching_notification() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let engine = Engine::tcp("127.0.0.1", addr.port(), Config::default().with_trackname("test-track"));

    let (stream, _) = listener.accept().await.unwrap();
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    // `channel_from` itself drives the `install/watch` handshake below, so
    // it must run concurrently with `accept_and_ack_teardown_watchers`, not
    // after it.
    let channel_from_task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let seed = wire::parse_line("%%>message:C:1700000000:call.route::x:peerid=P");
            engine.channel_from(&seed).await
        })
    };
    accept_and_ack_teardown_watchers(&mut lines, &mut wr).await;
    let channel = channel_from_task.await.unwrap().unwrap();

    let call_to_task = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.call_to("wave/play/x.au", ParamMap::default()).await })
    };

    let masquerade_line = lines.next_line().await.unwrap().unwrap();
    let parsed = wire::parse_line(&masquerade_line);
    assert_eq!(parsed.name, "chan.masquerade");
    assert_eq!(parsed.params().get("message"), Some("chan.attach"));
    assert_eq!(parsed.params().get("id"), Some("P"));
    assert_eq!(parsed.params().get("source"), Some("wave/play/x.au"));
    assert_eq!(parsed.params().get("consumer"), Some("wave/record/-"));

    let targetid = parsed.params().get("notify").unwrap().to_string();
    assert!(targetid.starts_with("test-track-notify/"));

    let answer = format!("%%<message:{}:true:chan.masquerade:\n", parsed.id);
    wr.write_all(answer.as_bytes()).await.unwrap();

    let notify_line = format!("%%<message::true:chan.notify::ok:targetid={targetid}:id=C\n");
    wr.write_all(notify_line.as_bytes()).await.unwrap();

    let notification = call_to_task.await.unwrap().unwrap();
    assert_eq!(notification.params().get("targetid"), Some(targetid.as_str()));
}

/// Resetting a channel cancels its pending `callTo` with
/// [`yate_extmodule::engine::Error::Reset`] before any notification
/// arrives.
#[tokio::test]
async fn reset_cancels_pending_call_to() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let engine = Engine::tcp("127.0.0.1", addr.port(), Config::default());

    let (stream, _) = listener.accept().await.unwrap();
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    let channel_from_task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let seed = wire::parse_line("%%>message:C:1700000000:call.route::x:peerid=P");
            engine.channel_from(&seed).await
        })
    };
    accept_and_ack_teardown_watchers(&mut lines, &mut wr).await;
    let channel = channel_from_task.await.unwrap().unwrap();

    let call_to_task = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.call_to("wave/play/x.au", ParamMap::default()).await })
    };

    // Let the masquerade go out, but never answer it; reset before any
    // reply arrives.
    let masquerade_line = lines.next_line().await.unwrap().unwrap();
    assert!(wire::parse_line(&masquerade_line).name == "chan.masquerade");

    channel.reset();

    let result = call_to_task.await.unwrap();
    assert!(result.is_err());
}

/// A channel seeded directly from a `call.execute` message is ready
/// immediately; one seeded from `call.route` is not, until a matching
/// `call.execute` arrives.
#[tokio::test]
async fn call_execute_seed_is_ready_immediately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let engine = Engine::tcp("127.0.0.1", addr.port(), Config::default());

    let (stream, _) = listener.accept().await.unwrap();
    let (rd, mut wr) = stream.into_split();
    let mut lines = BufReader::new(rd).lines();

    let channel_from_task = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let seed = wire::parse_line("%%>message:C:1700000000:call.execute::x:peerid=P");
            engine.channel_from(&seed).await
        })
    };
    accept_and_ack_teardown_watchers(&mut lines, &mut wr).await;
    let channel = channel_from_task.await.unwrap().unwrap();

    assert!(channel.ready());
    channel.init().await.unwrap();
}
