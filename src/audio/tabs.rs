//! Active-tab bookkeeping.
//!
//! The browser side reports tab open/close/activation through this registry;
//! the pipeline reads the active tab when acquiring tab audio and forwards
//! selection changes to UI subscribers.

use serde::Serialize;
use std::sync::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// One open browser tab as reported by the capture host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TabInfo {
    pub id: u32,
    pub title: String,
}

#[derive(Default)]
struct RegistryState {
    tabs: Vec<TabInfo>,
    active: Option<u32>,
}

/// Tracks open tabs and which one is active in the current window.
pub struct TabRegistry {
    inner: Mutex<RegistryState>,
    watch_tx: watch::Sender<Option<TabInfo>>,
}

impl TabRegistry {
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(None);
        Self {
            inner: Mutex::new(RegistryState::default()),
            watch_tx,
        }
    }

    /// Add or update a tab.
    pub fn upsert(&self, tab: TabInfo) {
        let mut state = self.inner.lock().expect("tab registry poisoned");
        match state.tabs.iter_mut().find(|t| t.id == tab.id) {
            Some(existing) => *existing = tab,
            None => state.tabs.push(tab),
        }
    }

    /// Remove a tab. Clears the active selection if it pointed here.
    pub fn remove(&self, id: u32) {
        let mut state = self.inner.lock().expect("tab registry poisoned");
        state.tabs.retain(|t| t.id != id);
        if state.active == Some(id) {
            state.active = None;
            drop(state);
            let _ = self.watch_tx.send(None);
            debug!("Active tab {} closed", id);
        }
    }

    /// Mark a tab as active. Returns false for unknown ids.
    pub fn set_active(&self, id: u32) -> bool {
        let mut state = self.inner.lock().expect("tab registry poisoned");
        let Some(tab) = state.tabs.iter().find(|t| t.id == id).cloned() else {
            return false;
        };
        state.active = Some(id);
        drop(state);
        let _ = self.watch_tx.send(Some(tab));
        true
    }

    /// The currently active tab, if any.
    pub fn active_tab(&self) -> Option<TabInfo> {
        let state = self.inner.lock().expect("tab registry poisoned");
        let id = state.active?;
        state.tabs.iter().find(|t| t.id == id).cloned()
    }

    /// Subscribe to active-tab changes.
    pub fn watch(&self) -> watch::Receiver<Option<TabInfo>> {
        self.watch_tx.subscribe()
    }
}

impl Default for TabRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tab(id: u32, title: &str) -> TabInfo {
        TabInfo {
            id,
            title: title.to_string(),
        }
    }

    #[test]
    fn test_no_active_tab_by_default() {
        let registry = TabRegistry::new();
        assert!(registry.active_tab().is_none());
    }

    #[test]
    fn test_set_active_requires_known_tab() {
        let registry = TabRegistry::new();
        assert!(!registry.set_active(7));

        registry.upsert(tab(7, "meet"));
        assert!(registry.set_active(7));
        assert_eq!(registry.active_tab(), Some(tab(7, "meet")));
    }

    #[test]
    fn test_removing_active_tab_clears_selection() {
        let registry = TabRegistry::new();
        registry.upsert(tab(1, "a"));
        registry.set_active(1);

        registry.remove(1);
        assert!(registry.active_tab().is_none());
    }

    #[tokio::test]
    async fn test_watch_sees_selection_changes() {
        let registry = TabRegistry::new();
        let mut rx = registry.watch();

        registry.upsert(tab(3, "call"));
        registry.set_active(3);

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Some(tab(3, "call")));
    }
}
