//! A minimal current-value stream.
//!
//! [`Watch`] holds one current value and fans new values out to any number
//! of subscribers. Subscribing yields the current value immediately, then
//! every subsequent `set`. The navigation scheduler is the only writer; it
//! pushes into a watch only when the new value differs from the old one.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};

/// A current value plus change notifications.
pub struct Watch<T> {
    inner: Rc<RefCell<WatchInner<T>>>,
}

struct WatchInner<T> {
    value: T,
    subscribers: Vec<UnboundedSender<T>>,
}

impl<T: Clone> Watch<T> {
    /// A watch seeded with `value`.
    pub fn new(value: T) -> Watch<T> {
        Watch {
            inner: Rc::new(RefCell::new(WatchInner {
                value,
                subscribers: Vec::new(),
            })),
        }
    }

    /// The current value.
    pub fn get(&self) -> T {
        self.inner.borrow().value.clone()
    }

    /// Reads the current value without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.borrow().value)
    }

    /// Stores a new value and notifies every live subscriber. Closed
    /// subscriptions are dropped on the way through.
    pub fn set(&self, value: T) {
        let mut inner = self.inner.borrow_mut();
        inner.value = value.clone();
        inner
            .subscribers
            .retain(|tx| tx.unbounded_send(value.clone()).is_ok());
    }

    /// A stream of values, starting with the current one.
    pub fn subscribe(&self) -> UnboundedReceiver<T> {
        let (tx, rx) = unbounded();
        let mut inner = self.inner.borrow_mut();
        let _ = tx.unbounded_send(inner.value.clone());
        inner.subscribers.push(tx);
        rx
    }
}

impl<T> Clone for Watch<T> {
    fn clone(&self) -> Watch<T> {
        Watch {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Watch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Watch({:?})", self.inner.borrow().value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn subscribers_see_the_current_value_first() {
        let watch = Watch::new(1);
        let mut rx = watch.subscribe();
        watch.set(2);
        watch.set(3);
        drop(watch);
        let seen: Vec<i32> = futures::executor::block_on(rx.by_ref().collect());
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn late_subscribers_skip_history() {
        let watch = Watch::new("a".to_owned());
        watch.set("b".to_owned());
        let mut rx = watch.subscribe();
        let first = futures::executor::block_on(rx.next()).unwrap();
        assert_eq!(first, "b");
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let watch = Watch::new(0);
        let rx = watch.subscribe();
        drop(rx);
        watch.set(1);
        assert_eq!(watch.get(), 1);
        assert_eq!(watch.inner.borrow().subscribers.len(), 0);
    }
}
