//! Client registry - the set of attached client sessions.
//!
//! Owned by the platform actor and mutated only from its command loop, so
//! a reader never sees a half-built entry. Sessions are constructed before
//! they are inserted.

use std::collections::BTreeMap;

use nexus_core::{ClientName, ClientSession, ClientView};

/// Attached clients keyed by name.
///
/// A `BTreeMap` keeps enumeration sorted by name.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: BTreeMap<ClientName, ClientSession>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a session under its name.
    ///
    /// A session already registered under that name is replaced and
    /// returned, so the caller can report its detach.
    pub fn add(&mut self, session: ClientSession) -> Option<ClientSession> {
        self.sessions.insert(session.name().clone(), session)
    }

    /// Removes and returns the session named `name`. Absent names are a no-op.
    pub fn remove(&mut self, name: &ClientName) -> Option<ClientSession> {
        self.sessions.remove(name)
    }

    pub fn find(&self, name: &ClientName) -> Option<&ClientSession> {
        self.sessions.get(name)
    }

    pub fn find_mut(&mut self, name: &ClientName) -> Option<&mut ClientSession> {
        self.sessions.get_mut(name)
    }

    pub fn contains(&self, name: &ClientName) -> bool {
        self.sessions.contains_key(name)
    }

    /// Snapshots of every session, sorted by name.
    pub fn views(&self) -> Vec<ClientView> {
        self.sessions.values().map(ClientView::from_session).collect()
    }

    /// Names of every session, sorted.
    pub fn names(&self) -> Vec<ClientName> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_core::{ClientSettings, ConnectionHandle, JoinSettings, Rectangle};

    fn session(name: &str, handle: u64) -> ClientSession {
        ClientSession::new(
            ConnectionHandle::new(handle),
            JoinSettings::new(name),
            ClientSettings::default(),
            Rectangle::full(1280, 720),
        )
    }

    #[test]
    fn test_add_and_find() {
        let mut registry = ClientRegistry::new();
        assert!(registry.add(session("netflix", 1)).is_none());

        let found = registry.find(&ClientName::new("netflix")).unwrap();
        assert_eq!(found.handle(), ConnectionHandle::new(1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_add_same_name_replaces() {
        let mut registry = ClientRegistry::new();
        registry.add(session("netflix", 1));

        let replaced = registry.add(session("netflix", 2)).unwrap();
        assert_eq!(replaced.handle(), ConnectionHandle::new(1));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.find(&ClientName::new("netflix")).unwrap().handle(),
            ConnectionHandle::new(2)
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = ClientRegistry::new();
        registry.add(session("a", 1));
        registry.add(session("b", 2));

        assert!(registry.remove(&ClientName::new("a")).is_some());
        let after_once = registry.names();

        assert!(registry.remove(&ClientName::new("a")).is_none());
        assert_eq!(registry.names(), after_once);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_enumeration_sorted_by_name() {
        let mut registry = ClientRegistry::new();
        registry.add(session("youtube", 3));
        registry.add(session("amazon", 1));
        registry.add(session("netflix", 2));

        let names: Vec<String> = registry
            .views()
            .into_iter()
            .map(|v| v.name.to_string())
            .collect();
        assert_eq!(names, vec!["amazon", "netflix", "youtube"]);
    }

    #[test]
    fn test_find_mut_updates_session() {
        let mut registry = ClientRegistry::new();
        registry.add(session("a", 1));

        if let Some(s) = registry.find_mut(&ClientName::new("a")) {
            s.set_geometry(Rectangle::new(1, 2, 3, 4));
        }
        assert_eq!(
            registry.find(&ClientName::new("a")).unwrap().geometry(),
            Rectangle::new(1, 2, 3, 4)
        );
    }

    #[test]
    fn test_replay_leaves_last_connected_names() {
        // (name, connect?) in arrival order
        let events = [
            ("a", true),
            ("b", true),
            ("a", false),
            ("c", true),
            ("b", false),
            ("b", true),
            ("c", false),
            ("c", false),
            ("d", false),
        ];

        let mut registry = ClientRegistry::new();
        for (i, (name, connect)) in events.iter().enumerate() {
            if *connect {
                registry.add(session(name, i as u64 + 1));
            } else {
                registry.remove(&ClientName::new(*name));
            }
        }

        let names: Vec<String> = registry.names().iter().map(|n| n.to_string()).collect();
        assert_eq!(names, vec!["b"]);
    }
}
