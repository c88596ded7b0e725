//! Fixed-shape, all-scalar replies the engine sends us, deserialized via
//! [`super::de::from_str`]. Every field here is always present on the
//! wire, which is what keeps these representable with facet's plain
//! scalar-or-flatten-map struct walk.

/// **(<)** The engine's answer to a syntactically incorrect line.
///
/// _The external module SHOULD NOT send anything back in response to
/// this, as it can result in an infinite loop._
#[derive(Debug, facet::Facet)]
#[facet(type_tag = "Error in")]
pub struct ErrorIn {
    /// The original line exactly as received.
    pub original: String,
}

/// **(<)** Confirmation that a handler has been installed or not.
#[derive(Debug, facet::Facet)]
#[facet(type_tag = "%%<install")]
pub struct InstallAck {
    /// Priority of the installed handler.
    pub priority: u64,
    /// Name of the messages asked to handle.
    pub name: String,
    /// Success of the operation.
    pub success: bool,
}

/// **(<)** Confirmation that a handler has been uninstalled or not.
#[derive(Debug, facet::Facet)]
#[facet(type_tag = "%%<uninstall")]
pub struct UninstallAck {
    /// Priority of the previously installed handler.
    pub priority: u64,
    /// Name of the message handler asked to uninstall.
    pub name: String,
    /// Success of the operation.
    pub success: bool,
}

/// **(<)** Confirmation that a watcher has been installed or not.
#[derive(Debug, facet::Facet)]
#[facet(type_tag = "%%<watch")]
pub struct WatchAck {
    /// Name of the messages asked to watch.
    pub name: String,
    /// Success of the operation.
    pub success: bool,
}

/// **(<)** Confirmation that a watcher has been uninstalled or not.
#[derive(Debug, facet::Facet)]
#[facet(type_tag = "%%<unwatch")]
pub struct UnwatchAck {
    /// Name of the message watcher asked to uninstall.
    pub name: String,
    /// Success of the operation.
    pub success: bool,
}

/// **(<)** Confirmation that a local parameter has changed, or its current
/// value on a pure read.
#[derive(Debug, facet::Facet)]
#[facet(type_tag = "%%<setlocal")]
pub struct SetLocalAck {
    /// Name of the modified (or read) parameter.
    pub name: String,
    /// Value of the local parameter.
    pub value: String,
    /// Success of the operation.
    pub success: bool,
}
