//! C4 — the registry of installed handlers, watchers and setlocal rows.
//!
//! The registry is authoritative across reconnects (spec §3 invariant
//! (iv)): any handler, watcher or setlocal value installed while connected
//! must be re-advertised to the engine before reconnect is considered
//! complete. [`Registry`] is pure storage and matching; the wire
//! round-trips that keep it in sync with the engine (install-then-ack,
//! rollback on a negative reply, etc.) live in [`crate::engine`].

use std::collections::HashMap;

use regex::Regex;

use crate::{
    handler::{SharedHandler, SharedWatcher},
    message::Message,
};

/// One (name, filterName, filterValue) handler registration.
struct HandlerEntry {
    filter: Option<(String, String, Regex)>,
    handler: SharedHandler,
}

/// One (name, filterName, filterValue) watcher registration.
struct WatcherEntry {
    filter: Option<(String, String, Regex)>,
    watcher: SharedWatcher,
}

fn matches(filter: &Option<(String, String, Regex)>, message: &Message) -> bool {
    match filter {
        None => true,
        Some((filter_name, _, regex)) => message
            .params()
            .get(filter_name)
            .is_some_and(|value| regex.is_match(value)),
    }
}

#[derive(Default)]
struct Bucket<T> {
    priority: u32,
    entries: Vec<T>,
}

/// The live registry of installed handlers, watchers, and setlocal rows.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<String, Bucket<HandlerEntry>>,
    watchers: HashMap<String, Vec<WatcherEntry>>,
    setlocal: Vec<(String, String)>,
}

impl Registry {
    /// The priority currently advertised to the engine for `name`, if any
    /// handler is installed under it.
    pub fn handler_priority(&self, name: &str) -> Option<u32> {
        self.handlers.get(name).map(|bucket| bucket.priority)
    }

    /// True if at least one handler is installed for `name`.
    pub fn has_handlers(&self, name: &str) -> bool {
        self.handlers.get(name).is_some_and(|bucket| !bucket.entries.is_empty())
    }

    /// Inserts or replaces a handler entry, setting the bucket's shared
    /// priority to `priority` (the caller is responsible for deciding
    /// whether that requires an engine round-trip first).
    pub fn set_handler(
        &mut self,
        name: &str,
        priority: u32,
        filter: Option<(String, String)>,
        handler: SharedHandler,
    ) -> crate::engine::Result<()> {
        let filter = filter
            .map(|(filter_name, filter_value)| {
                Regex::new(&filter_value)
                    .map(|regex| (filter_name, filter_value, regex))
                    .map_err(crate::engine::Error::Filter)
            })
            .transpose()?;

        let bucket = self.handlers.entry(name.to_string()).or_default();
        bucket.priority = priority;

        if let Some(existing) = bucket
            .entries
            .iter_mut()
            .find(|entry| filter_key(&entry.filter) == filter_key(&filter))
        {
            existing.handler = handler;
        } else {
            bucket.entries.push(HandlerEntry { filter, handler });
        }

        Ok(())
    }

    /// Removes the handler entry matching `(name, filterName, filterValue)`.
    /// Returns `true` if any remain installed for `name` afterwards.
    pub fn unset_handler(&mut self, name: &str, filter: Option<(&str, &str)>) -> bool {
        if let Some(bucket) = self.handlers.get_mut(name) {
            bucket
                .entries
                .retain(|entry| filter_key(&entry.filter) != filter.map(|(n, v)| (n.to_string(), v.to_string())));

            let remaining = !bucket.entries.is_empty();
            if !remaining {
                self.handlers.remove(name);
            }

            remaining
        } else {
            false
        }
    }

    /// All handlers whose name and filter match `message`, for dispatch.
    pub fn handlers_matching(&self, message: &Message) -> Vec<SharedHandler> {
        self.handlers
            .get(&message.name)
            .map(|bucket| {
                bucket
                    .entries
                    .iter()
                    .filter(|entry| matches(&entry.filter, message))
                    .map(|entry| entry.handler.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True if at least one watcher is installed for `name`.
    pub fn has_watchers(&self, name: &str) -> bool {
        self.watchers.get(name).is_some_and(|v| !v.is_empty())
    }

    /// Inserts or replaces a watcher entry.
    pub fn set_watcher(
        &mut self,
        name: &str,
        filter: Option<(String, String)>,
        watcher: SharedWatcher,
    ) -> crate::engine::Result<()> {
        let filter = filter
            .map(|(filter_name, filter_value)| {
                Regex::new(&filter_value)
                    .map(|regex| (filter_name, filter_value, regex))
                    .map_err(crate::engine::Error::Filter)
            })
            .transpose()?;

        let entries = self.watchers.entry(name.to_string()).or_default();
        if let Some(existing) = entries
            .iter_mut()
            .find(|entry| filter_key(&entry.filter) == filter_key(&filter))
        {
            existing.watcher = watcher;
        } else {
            entries.push(WatcherEntry { filter, watcher });
        }

        Ok(())
    }

    /// Removes the watcher entry matching `(name, filterName, filterValue)`.
    /// Returns `true` if any remain installed for `name` afterwards.
    pub fn unset_watcher(&mut self, name: &str, filter: Option<(&str, &str)>) -> bool {
        if let Some(entries) = self.watchers.get_mut(name) {
            entries.retain(|entry| filter_key(&entry.filter) != filter.map(|(n, v)| (n.to_string(), v.to_string())));

            let remaining = !entries.is_empty();
            if !remaining {
                self.watchers.remove(name);
            }

            remaining
        } else {
            false
        }
    }

    /// All watchers whose name and filter match `message`.
    pub fn watchers_matching(&self, message: &Message) -> Vec<SharedWatcher> {
        self.watchers
            .get(&message.name)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| matches(&entry.filter, message))
                    .map(|entry| entry.watcher.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes every handler and watcher entry whose filter matches
    /// `(filter_name, filter_value)` exactly — used by [`crate::channel`]
    /// to tear down per-channel subscriptions on hangup.
    pub fn remove_filtered(&mut self, filter_name: &str, filter_value: &str) {
        self.handlers.retain(|_, bucket| {
            bucket
                .entries
                .retain(|entry| !matches_exact(&entry.filter, filter_name, filter_value));
            !bucket.entries.is_empty()
        });

        self.watchers.retain(|_, entries| {
            entries.retain(|entry| !matches_exact(&entry.filter, filter_name, filter_value));
            !entries.is_empty()
        });
    }

    /// Records (or updates) the local value associated with `name`, so it
    /// is replayed after reconnect.
    pub fn set_setlocal(&mut self, name: &str, value: &str) {
        if let Some(entry) = self.setlocal.iter_mut().find(|(n, _)| n == name) {
            entry.1 = value.to_string();
        } else {
            self.setlocal.push((name.to_string(), value.to_string()));
        }
    }

    /// All rows to replay first after a reconnect.
    pub fn setlocal_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.setlocal.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// All `(name, priority, filter)` installs to replay after setlocal.
    pub fn install_entries(&self) -> impl Iterator<Item = (&str, u32, Option<(&str, &str)>)> {
        self.handlers.iter().flat_map(|(name, bucket)| {
            bucket.entries.iter().map(move |entry| {
                (
                    name.as_str(),
                    bucket.priority,
                    entry.filter.as_ref().map(|(n, v, _)| (n.as_str(), v.as_str())),
                )
            })
        })
    }

    /// All `(name, filter)` watches to replay last.
    pub fn watch_entries(&self) -> impl Iterator<Item = (&str, Option<(&str, &str)>)> {
        self.watchers.iter().flat_map(|(name, entries)| {
            entries
                .iter()
                .map(move |entry| (name.as_str(), entry.filter.as_ref().map(|(n, v, _)| (n.as_str(), v.as_str()))))
        })
    }
}

fn filter_key(filter: &Option<(String, String, Regex)>) -> Option<(String, String)> {
    filter.as_ref().map(|(n, v, _)| (n.clone(), v.clone()))
}

fn matches_exact(filter: &Option<(String, String, Regex)>, filter_name: &str, filter_value: &str) -> bool {
    matches!(filter, Some((n, v, _)) if n == filter_name && v == filter_value)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        message::MessageKind,
        wire::params::ParamMap,
    };

    fn message(name: &str, params: &[(&str, &str)]) -> Message {
        let mut map = ParamMap::default();
        for (k, v) in params {
            map.set(*k, *v);
        }
        Message::new("id", 0, name, MessageKind::Incoming, "", map)
    }

    fn noop_handler() -> SharedHandler {
        Arc::new(|_message: &Message| async { crate::handler::HandlerOutcome::Ignored })
    }

    fn noop_watcher() -> SharedWatcher {
        Arc::new(|_message: &Message| async {})
    }

    /// Spec §8 invariant 5: a handler with a (filterName, filterValue) only
    /// fires when the incoming message has a matching parameter.
    #[test]
    fn filter_semantics() {
        let mut registry = Registry::default();
        registry
            .set_handler(
                "call.route",
                100,
                Some(("called".to_string(), "^1.*".to_string())),
                noop_handler(),
            )
            .unwrap();

        assert_eq!(registry.handlers_matching(&message("call.route", &[("called", "1234")])).len(), 1);
        assert!(registry.handlers_matching(&message("call.route", &[("called", "9999")])).is_empty());
        assert!(registry.handlers_matching(&message("call.route", &[])).is_empty());
    }

    /// Two handlers on the same name may coexist provided their filters
    /// differ; the same (name, filter) key replaces the existing handler
    /// in place.
    #[test]
    fn same_name_distinct_filters_coexist_same_filter_replaces() {
        let mut registry = Registry::default();
        registry
            .set_handler("call.route", 100, Some(("called".to_string(), "1.*".to_string())), noop_handler())
            .unwrap();
        registry
            .set_handler("call.route", 100, Some(("called".to_string(), "2.*".to_string())), noop_handler())
            .unwrap();

        assert_eq!(registry.install_entries().count(), 2);

        registry
            .set_handler("call.route", 100, Some(("called".to_string(), "1.*".to_string())), noop_handler())
            .unwrap();
        assert_eq!(registry.install_entries().count(), 2);
    }

    #[test]
    fn unset_handler_reports_whether_any_remain() {
        let mut registry = Registry::default();
        registry.set_handler("engine.timer", 100, None, noop_handler()).unwrap();
        registry
            .set_handler("engine.timer", 100, Some(("x".to_string(), "y".to_string())), noop_handler())
            .unwrap();

        assert!(registry.unset_handler("engine.timer", None));
        assert!(!registry.unset_handler("engine.timer", Some(("x", "y"))));
        assert!(!registry.has_handlers("engine.timer"));
    }

    #[test]
    fn remove_filtered_clears_matching_handlers_and_watchers() {
        let mut registry = Registry::default();
        registry
            .set_handler("chan.hangup", 100, Some(("id".to_string(), "C1".to_string())), noop_handler())
            .unwrap();
        registry
            .set_watcher("chan.notify", Some(("id".to_string(), "C1".to_string())), noop_watcher())
            .unwrap();
        registry
            .set_watcher("chan.notify", Some(("id".to_string(), "C2".to_string())), noop_watcher())
            .unwrap();

        registry.remove_filtered("id", "C1");

        assert!(!registry.has_handlers("chan.hangup"));
        assert!(registry.has_watchers("chan.notify"));
        assert_eq!(registry.watch_entries().count(), 1);
    }

    /// An id containing a regex metacharacter (spec §8 scenario S2's own
    /// example, `0x1.abc`) is stored under its escaped form by
    /// [`crate::channel::Channel`]'s teardown watchers, so removal must be
    /// keyed by that same escaped form — the raw id does not match.
    #[test]
    fn remove_filtered_requires_the_escaped_form_for_ids_with_regex_metacharacters() {
        let raw_id = "0x1.abc";
        let escaped_id = regex::escape(raw_id);
        assert_ne!(raw_id, escaped_id);

        let mut registry = Registry::default();
        registry
            .set_watcher("chan.notify", Some(("id".to_string(), escaped_id.clone())), noop_watcher())
            .unwrap();

        registry.remove_filtered("id", raw_id);
        assert!(registry.has_watchers("chan.notify"), "raw id must not match the escaped filter value");

        registry.remove_filtered("id", &escaped_id);
        assert!(!registry.has_watchers("chan.notify"));
    }

    #[test]
    fn setlocal_entries_update_in_place() {
        let mut registry = Registry::default();
        registry.set_setlocal("bufsize", "4096");
        registry.set_setlocal("bufsize", "8192");

        let entries: Vec<_> = registry.setlocal_entries().collect();
        assert_eq!(entries, vec![("bufsize", "8192")]);
    }
}
