//! Observer fan-out.
//!
//! Components own an [`ObserverList`] of weak handles; notification clones
//! the live handles under the lock and invokes them after releasing it, so a
//! callback can never re-enter the component that emitted it holding its own
//! lock. Observers must unregister (or simply be dropped) before the
//! component they observe goes away.

use std::sync::{Arc, Mutex, Weak};

/// A list of weakly held observers
pub struct ObserverList<T: ?Sized> {
    observers: Mutex<Vec<Weak<T>>>,
}

impl<T: ?Sized> ObserverList<T> {
    /// Empty list
    pub fn new() -> Self {
        ObserverList {
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer. The list only keeps a weak handle.
    pub fn add(&self, observer: &Arc<T>) {
        let mut observers = self.observers.lock().expect("observer list poisoned");
        observers.push(Arc::downgrade(observer));
    }

    /// Remove a previously registered observer.
    pub fn remove(&self, observer: &Arc<T>) {
        let mut observers = self.observers.lock().expect("observer list poisoned");
        observers.retain(|weak| {
            weak.upgrade()
                .map(|strong| !Arc::ptr_eq(&strong, observer))
                .unwrap_or(false)
        });
    }

    /// Invoke `f` on every live observer, outside the internal lock. Dead
    /// handles are pruned on the way.
    pub fn notify(&self, f: impl Fn(&T)) {
        let live: Vec<Arc<T>> = {
            let mut observers = self.observers.lock().expect("observer list poisoned");
            observers.retain(|weak| weak.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };

        for observer in live {
            f(&observer);
        }
    }
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        ObserverList::new()
    }
}
