//! Hand-written serialization for application→engine commands (spec §6).
//!
//! These are built, not parsed — we only ever produce them — and several
//! carry optional fields (`install`'s filter, `setlocal`'s value) or an
//! explicitly *unescaped* field (`output`'s text), both of which fall
//! outside what the generic facet walk in [`super::ser`] supports. Hand
//! assembly keeps the escaping rules exact and visible at the call site.

use super::upcode::encode;

/// Role of a socket-based connection, sent once as the first command on a
/// freshly established connection (spec §4.2/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRole {
    /// A connection carrying protocol messages.
    Global,
    /// A connection tied to one channel's lifetime.
    Channel,
    /// A connection that plays audio data.
    Play,
    /// A connection that records audio data.
    Record,
    /// A connection that both plays and records audio data.
    PlayRec,
}

impl ConnectRole {
    fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Channel => "channel",
            Self::Play => "play",
            Self::Record => "record",
            Self::PlayRec => "playrec",
        }
    }
}

/// `%%>connect:<role>[:<id>[:<type>]]`
pub fn connect(role: ConnectRole, id: Option<&str>, kind: Option<&str>) -> String {
    let mut line = format!("%%>connect:{}", role.as_str());

    if let Some(id) = id {
        line.push(':');
        line.push_str(&encode(id));

        if let Some(kind) = kind {
            line.push(':');
            line.push_str(&encode(kind));
        }
    }

    line
}

/// `%%>output:<unescaped text>` — the text is deliberately *not* escaped,
/// per spec §6.
pub fn output(text: &str) -> String {
    format!("%%>output:{text}")
}

/// `%%>setlocal:<name>:<value>`, value empty for a pure read.
pub fn setlocal(name: &str, value: Option<&str>) -> String {
    format!(
        "%%>setlocal:{}:{}",
        encode(name),
        value.map(encode).unwrap_or_default()
    )
}

/// `%%>install:<priority>:<name>[:<filter>:<fvalue>]`
pub fn install(priority: u32, name: &str, filter: Option<(&str, Option<&str>)>) -> String {
    let mut line = format!("%%>install:{priority}:{}", encode(name));

    if let Some((filter_name, filter_value)) = filter {
        line.push(':');
        line.push_str(&encode(filter_name));
        line.push(':');
        line.push_str(&filter_value.map(encode).unwrap_or_default());
    }

    line
}

/// `%%>uninstall:<name>`
pub fn uninstall(name: &str) -> String {
    format!("%%>uninstall:{}", encode(name))
}

/// `%%>watch:<name>`
pub fn watch(name: &str) -> String {
    format!("%%>watch:{}", encode(name))
}

/// `%%>unwatch:<name>`
pub fn unwatch(name: &str) -> String {
    format!("%%>unwatch:{}", encode(name))
}
