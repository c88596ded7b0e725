//! C1 — the external-module protocol codec.
//!
//! Frames are newline-delimited (`\n`). Within a frame, colon separates
//! fields; the first field identifies the verb (`%%>message`,
//! `%%<message`, `%%<install`, `%%<uninstall`, `%%<watch`, `%%<unwatch`,
//! `%%<setlocal`, or an `Error in ...` line). After the fifth field,
//! remaining colon-separated tokens are `key=value` parameters.
//!
//! Every field but the verb uses the escape scheme documented in
//! [`upcode`]. [`parse_line`] never panics: any line whose verb is
//! unknown, or whose numeric fields fail to parse, comes back as a
//! [`crate::message::MessageKind::Error`] record carrying the original
//! line verbatim.

pub mod acks;
pub mod commands;
pub mod de;
mod error;
pub mod params;
pub mod ser;
pub mod upcode;

#[cfg(test)]
mod tests;

pub use commands::ConnectRole;
pub use error::{Error, Result};

use crate::message::{Message, MessageKind};
use params::ParamMap;

fn decode(value: &str) -> Result<String> {
    Ok(upcode::decode(value)?.into_owned())
}

fn parse_kv(tokens: &mut std::str::Split<'_, char>) -> Result<ParamMap> {
    let mut flat = std::collections::BTreeMap::new();

    for token in tokens {
        let (key, value) = token.split_once('=').ok_or_else(|| Error::MisformattedParam(token.to_string()))?;
        flat.insert(decode(key)?, decode(value)?);
    }

    Ok(ParamMap::from_flat(flat))
}

fn parse_incoming(mut tokens: std::str::Split<'_, char>) -> Result<Message> {
    let id = decode(tokens.next().ok_or(Error::MissingTag)?)?;
    let time = tokens
        .next()
        .ok_or(Error::MissingTag)?
        .parse()
        .map_err(|_| Error::InvalidNumber("time".into()))?;
    let name = decode(tokens.next().ok_or(Error::MissingTag)?)?;
    // The engine always emits a reserved, always-blank field here on
    // `%%>message` lines it sends us; unlike the module's own outgoing
    // lines (see `serialize_outgoing`), which carry no such field.
    let _reserved = tokens.next().ok_or(Error::MissingTag)?;
    let retvalue = decode(tokens.next().ok_or(Error::MissingTag)?)?;
    let params = parse_kv(&mut tokens)?;

    Ok(Message::new(id, time, name, MessageKind::Incoming, retvalue, params))
}

fn parse_reply(mut tokens: std::str::Split<'_, char>) -> Result<Message> {
    let id = decode(tokens.next().ok_or(Error::MissingTag)?)?;
    let processed = tokens.next().ok_or(Error::MissingTag)?;
    let success = match processed {
        "true" => true,
        "false" => false,
        other => return Err(Error::InvalidNumber(other.into())),
    };
    let name = decode(tokens.next().ok_or(Error::MissingTag)?)?;
    let retvalue = decode(tokens.next().ok_or(Error::MissingTag)?)?;
    let params = parse_kv(&mut tokens)?;

    let kind = if id.is_empty() {
        MessageKind::Notification
    } else {
        MessageKind::Answer
    };

    let mut message = Message::new(id, 0, name, kind, retvalue, params);
    message.success = Some(success);

    Ok(message)
}

fn parse_install_ack(line: &str) -> Result<Message> {
    let ack: acks::InstallAck = de::from_str(line)?;
    let mut message = Message::new(String::new(), 0, ack.name, MessageKind::Install, String::new(), ParamMap::default());
    message.success = Some(ack.success);
    message.priority = Some(ack.priority as u32);

    Ok(message)
}

fn parse_uninstall_ack(line: &str) -> Result<Message> {
    let ack: acks::UninstallAck = de::from_str(line)?;
    let mut message = Message::new(String::new(), 0, ack.name, MessageKind::Uninstall, String::new(), ParamMap::default());
    message.success = Some(ack.success);
    message.priority = Some(ack.priority as u32);

    Ok(message)
}

fn parse_watch_ack(line: &str) -> Result<Message> {
    let ack: acks::WatchAck = de::from_str(line)?;
    let mut message = Message::new(String::new(), 0, ack.name, MessageKind::Watch, String::new(), ParamMap::default());
    message.success = Some(ack.success);

    Ok(message)
}

fn parse_unwatch_ack(line: &str) -> Result<Message> {
    let ack: acks::UnwatchAck = de::from_str(line)?;
    let mut message = Message::new(String::new(), 0, ack.name, MessageKind::Unwatch, String::new(), ParamMap::default());
    message.success = Some(ack.success);

    Ok(message)
}

fn parse_setlocal_ack(line: &str) -> Result<Message> {
    let ack: acks::SetLocalAck = de::from_str(line)?;
    let mut message = Message::new(String::new(), 0, ack.name, MessageKind::SetLocal, ack.value, ParamMap::default());
    message.success = Some(ack.success);

    Ok(message)
}

fn try_parse(line: &str) -> Result<Message> {
    let mut tokens = line.split(':');
    let verb = tokens.next().ok_or(Error::Unrecognized)?;

    match verb {
        "%%>message" => parse_incoming(tokens),
        "%%<message" => parse_reply(tokens),
        "%%<install" => parse_install_ack(line),
        "%%<uninstall" => parse_uninstall_ack(line),
        "%%<watch" => parse_watch_ack(line),
        "%%<unwatch" => parse_unwatch_ack(line),
        "%%<setlocal" => parse_setlocal_ack(line),
        _ => Err(Error::Unrecognized),
    }
}

/// Parses one inbound line into a [`Message`], per spec §4.1/§4.2.
///
/// Never panics or propagates an error: a line with an unknown verb, or
/// whose numeric fields fail validation, comes back as a
/// [`MessageKind::Error`] record with the raw line as `return_value`.
pub fn parse_line(line: &str) -> Message {
    try_parse(line).unwrap_or_else(|_| {
        Message::new(String::new(), 0, String::new(), MessageKind::Error, line.to_string(), ParamMap::default())
    })
}

/// Serializes an outgoing `%%>message` command (spec §6).
pub fn serialize_outgoing(message: &Message, emit_empties: bool) -> String {
    let mut line = format!(
        "%%>message:{}:{}:{}:{}",
        upcode::encode(&message.id),
        message.time,
        upcode::encode(&message.name),
        upcode::encode(&message.return_value),
    );

    for (key, value) in message.params().wire_pairs(emit_empties) {
        line.push(':');
        line.push_str(&upcode::encode(key));
        line.push('=');
        line.push_str(&upcode::encode(value));
    }

    line
}

/// Serializes an acknowledgement for a previously received incoming
/// message: `%%<message:<id>:<handled>::<retvalue>:<k=v>...` (spec §4.3).
///
/// The third field (name) is always empty, matching what the engine
/// expects back from an acknowledgement as opposed to an answer.
pub fn serialize_ack(id: &str, handled: bool, retvalue: &str, params: &ParamMap, emit_empties: bool) -> String {
    let mut line = format!(
        "%%<message:{}:{}::{}",
        upcode::encode(id),
        handled,
        upcode::encode(retvalue),
    );

    for (key, value) in params.wire_pairs(emit_empties) {
        line.push(':');
        line.push_str(&upcode::encode(key));
        line.push('=');
        line.push_str(&upcode::encode(value));
    }

    line
}
