use crate::message::MessageKind;

use super::*;

/// Spec §8 scenario S2.
#[test]
fn s2_parse_incoming() {
    let line = "%%>message:0x1.abc:1700000000:call.route::tone/ring:called=9999:caller=123";
    let message = parse_line(line);

    assert_eq!(message.kind, MessageKind::Incoming);
    assert_eq!(message.id, "0x1.abc");
    assert_eq!(message.time, 1700000000);
    assert_eq!(message.name, "call.route");
    assert_eq!(message.return_value, "tone/ring");
    assert_eq!(message.params().get("called"), Some("9999"));
    assert_eq!(message.params().get("caller"), Some("123"));
}

#[test]
fn parses_answer_vs_notification_by_id() {
    let answer = parse_line("%%<message:42:true:call.route:x:called=9999");
    assert_eq!(answer.kind, MessageKind::Answer);
    assert_eq!(answer.id, "42");
    assert_eq!(answer.success, Some(true));

    let notification = parse_line("%%<message::false:chan.notify:x:targetid=foo");
    assert_eq!(notification.kind, MessageKind::Notification);
    assert_eq!(notification.id, "");
    assert_eq!(notification.params().get("targetid"), Some("foo"));
}

#[test]
fn parses_acks() {
    let install = parse_line("%%<install:100:engine.timer:true");
    assert_eq!(install.kind, MessageKind::Install);
    assert_eq!(install.name, "engine.timer");
    assert_eq!(install.success, Some(true));
    assert_eq!(install.priority, Some(100));

    let setlocal = parse_line("%%<setlocal:bufsize:4096:true");
    assert_eq!(setlocal.kind, MessageKind::SetLocal);
    assert_eq!(setlocal.return_value, "4096");
    assert_eq!(setlocal.success, Some(true));
}

#[test]
fn unknown_verb_becomes_error_kind() {
    let message = parse_line("Error in: something went wrong");
    assert_eq!(message.kind, MessageKind::Error);
    assert_eq!(message.return_value, "Error in: something went wrong");

    let garbage = parse_line("%%?notaverb:whatever");
    assert_eq!(garbage.kind, MessageKind::Error);
    assert_eq!(garbage.return_value, "%%?notaverb:whatever");
}

#[test]
fn malformed_numeric_field_becomes_error_kind() {
    let message = parse_line("%%>message:id:not-a-number:call.route::x");
    assert_eq!(message.kind, MessageKind::Error);
}

/// Spec §8 scenario S3 (codec half): a round trip through parse then
/// serialize reproduces the acknowledgement line the router would send.
#[test]
fn incoming_then_ack_round_trips() {
    let incoming = parse_line("%%>message:42:123:call.route::x:called=9999");
    let ack = serialize_ack(&incoming.id, true, &incoming.return_value, incoming.params(), false);

    assert_eq!(ack, "%%<message:42:true::x:called=9999");
}

#[test]
fn serializes_outgoing_message() {
    let mut message = crate::message::Message::outgoing("call.route", "");
    message.id = "1700000000.1".into();
    message.time = 1700000000;
    message.params_mut().set("called", "9999");

    assert_eq!(
        serialize_outgoing(&message, false),
        "%%>message:1700000000.1:1700000000:call.route::called=9999"
    );
}

#[cfg(test)]
mod acks {
    use crate::wire::{acks::*, de::from_str, ser::to_string};

    fn round_trip<T: facet::Facet<'static> + std::fmt::Debug>(input: &str) {
        let parsed: T = from_str(input).unwrap_or_else(|err| panic!("can't parse `{input}`: {err}"));
        assert_eq!(to_string(&parsed), input);
    }

    #[test]
    fn error_in() {
        round_trip::<ErrorIn>("Error in:this is an error");
    }

    #[test]
    fn install_ack() {
        round_trip::<InstallAck>("%%<install:100:engine.timer:true");
        round_trip::<InstallAck>("%%<install:50:engine.timer:false");
    }

    #[test]
    fn uninstall_ack() {
        round_trip::<UninstallAck>("%%<uninstall:50:engine.timer:true");
    }

    #[test]
    fn watch_ack() {
        round_trip::<WatchAck>("%%<watch:engine.timer:true");
    }

    #[test]
    fn unwatch_ack() {
        round_trip::<UnwatchAck>("%%<unwatch:engine.timer:true");
    }

    #[test]
    fn setlocal_ack() {
        round_trip::<SetLocalAck>("%%<setlocal:trackparam:yengine.1:true");
    }
}
