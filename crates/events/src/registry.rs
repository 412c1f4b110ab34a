use std::collections::HashMap;

use crate::handler::Handler;

struct Entry {
    id: u64,
    handler: Handler,
}

/// Handlers for one scope: a global list plus per-session lists, each in
/// registration order.
#[derive(Default)]
pub(crate) struct Registry {
    global: Vec<Entry>,
    sessions: HashMap<String, Vec<Entry>>,
}

impl Registry {
    pub(crate) fn add_global(&mut self, id: u64, handler: Handler) {
        self.global.push(Entry { id, handler });
    }

    pub(crate) fn add_session(&mut self, session_id: &str, id: u64, handler: Handler) {
        self.sessions
            .entry(session_id.to_owned())
            .or_default()
            .push(Entry { id, handler });
    }

    /// Remove the handler registered under `id`. Empty session lists are
    /// dropped.
    pub(crate) fn remove(&mut self, id: u64) -> bool {
        if let Some(pos) = self.global.iter().position(|e| e.id == id) {
            self.global.remove(pos);
            return true;
        }
        let mut emptied = None;
        let mut found = false;
        for (session_id, entries) in self.sessions.iter_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                found = true;
                if entries.is_empty() {
                    emptied = Some(session_id.clone());
                }
                break;
            }
        }
        if let Some(session_id) = emptied {
            self.sessions.remove(&session_id);
        }
        found
    }

    /// Snapshot of the handlers an event for `session_id` reaches: global
    /// first, then session subscribers.
    pub(crate) fn targets(&self, session_id: &str) -> Vec<Handler> {
        let scoped = self.sessions.get(session_id).map(Vec::as_slice).unwrap_or(&[]);
        self.global
            .iter()
            .chain(scoped)
            .map(|e| e.handler.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.global.len() + self.sessions.values().map(Vec::len).sum::<usize>()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn noop() -> Handler {
        Arc::new(|_| Ok(()))
    }

    #[test]
    fn removing_last_session_handler_drops_the_set() {
        let mut reg = Registry::default();
        reg.add_session("s1", 1, noop());
        reg.add_session("s1", 2, noop());
        assert_eq!(reg.session_count(), 1);
        assert!(reg.remove(1));
        assert_eq!(reg.session_count(), 1);
        assert!(reg.remove(2));
        assert_eq!(reg.session_count(), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn targets_put_global_first() {
        let mut reg = Registry::default();
        reg.add_session("s1", 1, noop());
        reg.add_global(2, noop());
        assert_eq!(reg.targets("s1").len(), 2);
        assert_eq!(reg.targets("s2").len(), 1);
        assert!(!reg.remove(99));
    }
}
