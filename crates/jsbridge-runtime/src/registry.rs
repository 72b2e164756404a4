//! Registry of live handles.
//!
//! Every engine value referenced from native code, and every native object
//! exposed to the engine, gets an id here. The engine side keeps the value
//! reachable under the global `__jsbridge_ref<ID>`; the registry decides
//! whether that id is still valid.
//!
//! Native entries store a detached [`NativeRef`]; whoever owns the proxy holds
//! the [`JsRef`](crate::value::JsRef) whose drop removes the entry. Natives
//! handed to the engine with no native owner are retained here until the
//! session is released.

use crate::value::{NativeRef, RefKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Name of the engine global that keeps handle `id` reachable.
pub(crate) fn global_name(id: u64) -> String {
    format!("__jsbridge_ref{id}")
}

struct HandleEntry {
    kind: RefKind,
    native: Option<NativeRef>,
}

pub(crate) struct HandleRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, HandleEntry>>,
    retained: Mutex<Vec<NativeRef>>,
}

impl HandleRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
            retained: Mutex::new(Vec::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, HandleEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates an id for a new handle.
    pub(crate) fn register(&self, kind: RefKind, native: Option<NativeRef>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(id, HandleEntry { kind, native });
        id
    }

    pub(crate) fn contains(&self, id: u64) -> bool {
        self.entries().contains_key(&id)
    }

    pub(crate) fn kind(&self, id: u64) -> Option<RefKind> {
        self.entries().get(&id).map(|entry| entry.kind)
    }

    /// The native object exposed under `id`.
    pub(crate) fn native(&self, id: u64) -> Option<NativeRef> {
        self.entries().get(&id).and_then(|entry| entry.native.clone())
    }

    /// Keeps `native`, and the proxies it owns, alive until [`clear`](Self::clear).
    pub(crate) fn retain_native(&self, native: NativeRef) {
        self.retained
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(native);
    }

    /// Removes a handle; returns false if it was not registered.
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.entries().remove(&id).is_some()
    }

    /// Invalidates every handle, returning how many were live.
    pub(crate) fn clear(&self) -> usize {
        let count = {
            let mut entries = self.entries();
            let count = entries.len();
            entries.clear();
            count
        };
        // Dropped outside the entries lock: their handles unregister on drop.
        let retained = std::mem::take(&mut *self.retained.lock().unwrap_or_else(PoisonError::into_inner));
        drop(retained);
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let registry = HandleRegistry::new();
        let ids: HashSet<_> = (0..100)
            .map(|_| registry.register(RefKind::Object, None))
            .collect();
        assert_eq!(ids.len(), 100);
        assert_eq!(registry.len(), 100);
    }

    #[test]
    fn test_remove_and_contains() {
        let registry = HandleRegistry::new();
        let id = registry.register(RefKind::Function, None);
        assert!(registry.contains(id));
        assert_eq!(registry.kind(id), Some(RefKind::Function));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(!registry.contains(id));
    }

    #[test]
    fn test_clear_invalidates_everything() {
        let registry = HandleRegistry::new();
        let a = registry.register(RefKind::Object, None);
        let b = registry.register(RefKind::Object, None);
        assert_eq!(registry.clear(), 2);
        assert!(!registry.contains(a));
        assert!(!registry.contains(b));
    }

    #[test]
    fn test_global_name() {
        assert_eq!(global_name(42), "__jsbridge_ref42");
    }
}
