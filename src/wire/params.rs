//! C2 — the parameter model: a flat string map with dotted-key nesting.
//!
//! Incoming parameter keys containing `.` are split into nested maps:
//! `a.b.c=v` becomes `{a:{b:{c:v}}}`. The inverse flattening is applied
//! when serializing outgoing messages: nested maps emit dotted keys, and
//! keys whose value is empty are skipped unless `emit_empties` is set.
//! Keys beginning with `_` are internal and never serialized.

use std::collections::BTreeMap;

/// A message parameter map (string keys, string values, insertion order
/// irrelevant — spec §3).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamMap(BTreeMap<String, String>);

impl ParamMap {
    /// Builds a map directly from already-flat key/value pairs.
    pub fn from_flat(flat: BTreeMap<String, String>) -> Self {
        Self(flat)
    }

    /// Looks up a parameter by its (possibly dotted) key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Looks up a parameter and interprets `"true"`/`"false"` as a bool.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some("true") => Some(true),
            Some("false") => Some(false),
            _ => None,
        }
    }

    /// Sets a parameter, overwriting any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Sets a boolean parameter using the engine's `"true"`/`"false"` tokens.
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.0
            .insert(key.into(), if value { "true" } else { "false" }.to_string());
    }

    /// Removes a parameter, returning its previous value if any.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Iterates over the flat `(key, value)` pairs backing this map.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// True if this map has no parameters.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reconstitutes dotted keys into a nested tree (spec §4.1).
    ///
    /// Keys starting with `_` are internal and excluded from the tree.
    pub fn reconstitute(&self) -> Nested {
        let mut root = BTreeMap::new();

        for (key, value) in self.0.iter() {
            if key.starts_with('_') {
                continue;
            }

            let mut segments = key.split('.').peekable();
            let mut node = &mut root;

            while let Some(segment) = segments.next() {
                if segments.peek().is_none() {
                    node.insert(segment.to_string(), Nested::Leaf(value.clone()));
                } else {
                    let entry = node
                        .entry(segment.to_string())
                        .or_insert_with(|| Nested::Map(BTreeMap::new()));

                    match entry {
                        Nested::Map(children) => node = children,
                        // A leaf already claimed this path segment; stop
                        // descending rather than overwrite it.
                        Nested::Leaf(_) => break,
                    }
                }
            }
        }

        Nested::Map(root)
    }

    /// Flattens a nested tree back into dotted keys (the inverse of
    /// [`Self::reconstitute`]).
    pub fn flatten(nested: &Nested) -> Self {
        let mut flat = BTreeMap::new();
        flatten_into(nested, String::new(), &mut flat);

        Self(flat)
    }

    /// Wire-ready `key=value` pairs: skips keys beginning with `_`, and
    /// skips empty values unless `emit_empties` is set (spec §4.1).
    pub fn wire_pairs(&self, emit_empties: bool) -> Vec<(&str, &str)> {
        self.0
            .iter()
            .filter(|(k, v)| !k.starts_with('_') && (emit_empties || !v.is_empty()))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

impl FromIterator<(String, String)> for ParamMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A nested parameter tree, the reconstituted form of a [`ParamMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nested {
    /// A terminal string value.
    Leaf(String),
    /// An inner node: one level of dotted-key nesting.
    Map(BTreeMap<String, Nested>),
}

fn flatten_into(node: &Nested, prefix: String, out: &mut BTreeMap<String, String>) {
    match node {
        Nested::Leaf(value) => {
            out.insert(prefix, value.clone());
        }
        Nested::Map(children) => {
            for (key, child) in children {
                let full = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };

                flatten_into(child, full, out);
            }
        }
    }
}
