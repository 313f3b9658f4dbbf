//! The browser location collaborator.
//!
//! The router reads and writes URLs exclusively through
//! [`LocationAdapter`]; whether those URLs live in the path, the hash
//! fragment, or an in-memory list is the adapter's business.
//! [`MemoryLocation`] is the in-memory implementation used by tests and
//! headless embedders.

use std::cell::RefCell;
use std::rc::Rc;

use crate::events::NavigationSource;

/// A URL change reported by the platform, outside the router's control.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocationChange {
    /// The URL the platform moved to.
    pub url: String,
    /// `Popstate` or `Hashchange`.
    pub source: NavigationSource,
}

/// Read/write access to the platform's URL bar and history.
pub trait LocationAdapter {
    /// The current path, query and fragment.
    fn path(&self) -> String;

    /// Pushes a new history entry.
    fn go(&self, url: &str);

    /// Replaces the current history entry.
    fn replace_state(&self, url: &str);

    /// True if `url` equals the current path.
    fn is_current_path_equal_to(&self, url: &str) -> bool {
        self.path() == url
    }

    /// Registers a listener for platform-driven URL changes.
    fn subscribe(&self, listener: Box<dyn Fn(LocationChange)>);
}

/// A history write performed by the router, recorded by
/// [`MemoryLocation`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocationOp {
    /// A pushed entry.
    Go(String),
    /// A replaced entry.
    Replace(String),
}

/// An in-memory [`LocationAdapter`]: a history list, an op log, and
/// helpers to simulate platform-driven pop/hash events.
#[derive(Default)]
pub struct MemoryLocation {
    current: RefCell<String>,
    ops: RefCell<Vec<LocationOp>>,
    listeners: RefCell<Vec<Box<dyn Fn(LocationChange)>>>,
}

impl MemoryLocation {
    /// A location starting at `/`.
    pub fn new() -> Rc<MemoryLocation> {
        MemoryLocation::starting_at("/")
    }

    /// A location starting at the given path.
    pub fn starting_at(path: impl Into<String>) -> Rc<MemoryLocation> {
        Rc::new(MemoryLocation {
            current: RefCell::new(path.into()),
            ops: RefCell::new(Vec::new()),
            listeners: RefCell::new(Vec::new()),
        })
    }

    /// Every write the router performed, in order.
    pub fn ops(&self) -> Vec<LocationOp> {
        self.ops.borrow().clone()
    }

    /// Simulates the platform popping history to `url`.
    pub fn simulate_pop(&self, url: &str) {
        *self.current.borrow_mut() = url.to_owned();
        self.notify(url, NavigationSource::Popstate);
    }

    /// Simulates a platform hash change to `url`.
    pub fn simulate_hash_change(&self, url: &str) {
        *self.current.borrow_mut() = url.to_owned();
        self.notify(url, NavigationSource::Hashchange);
    }

    fn notify(&self, url: &str, source: NavigationSource) {
        for listener in self.listeners.borrow().iter() {
            listener(LocationChange {
                url: url.to_owned(),
                source,
            });
        }
    }
}

impl LocationAdapter for MemoryLocation {
    fn path(&self) -> String {
        self.current.borrow().clone()
    }

    fn go(&self, url: &str) {
        log::trace!(" location push `{url}`");
        *self.current.borrow_mut() = url.to_owned();
        self.ops.borrow_mut().push(LocationOp::Go(url.to_owned()));
    }

    fn replace_state(&self, url: &str) {
        log::trace!(" location replace `{url}`");
        *self.current.borrow_mut() = url.to_owned();
        self.ops
            .borrow_mut()
            .push(LocationOp::Replace(url.to_owned()));
    }

    fn subscribe(&self, listener: Box<dyn Fn(LocationChange)>) {
        self.listeners.borrow_mut().push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn writes_move_the_current_path() {
        let location = MemoryLocation::new();
        location.go("/a");
        location.replace_state("/b");
        assert_eq!(location.path(), "/b");
        assert!(location.is_current_path_equal_to("/b"));
        assert_eq!(
            location.ops(),
            vec![
                LocationOp::Go("/a".to_owned()),
                LocationOp::Replace("/b".to_owned())
            ]
        );
    }

    #[test]
    fn pops_notify_subscribers() {
        let location = MemoryLocation::new();
        let seen = Rc::new(Cell::new(0));
        let seen_in_listener = seen.clone();
        location.subscribe(Box::new(move |change| {
            assert_eq!(change.source, NavigationSource::Popstate);
            assert_eq!(change.url, "/back");
            seen_in_listener.set(seen_in_listener.get() + 1);
        }));
        location.simulate_pop("/back");
        assert_eq!(seen.get(), 1);
    }
}
