//! Observable value slots.
//!
//! A [`Writable`] holds one value and an explicit list of subscribers.
//! Components subscribe to exactly the slots they read; `set` notifies only
//! those subscribers, and only when the value actually changed.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Subscriber<T> = Rc<dyn Fn(&T)>;

struct Slot<T> {
    value: RefCell<T>,
    subscribers: RefCell<Vec<(u64, Subscriber<T>)>>,
    next_id: Cell<u64>,
}

/// Shared, observable value.
pub struct Writable<T> {
    slot: Rc<Slot<T>>,
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Writable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Writable")
            .field("value", &self.slot.value.borrow())
            .field("subscribers", &self.slot.subscribers.borrow().len())
            .finish()
    }
}

impl<T: Default + Clone + PartialEq + 'static> Default for Writable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + PartialEq + 'static> Writable<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            slot: Rc::new(Slot {
                value: RefCell::new(value),
                subscribers: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.slot.value.borrow().clone()
    }

    /// Stores `value` and notifies subscribers if it differs from the current one.
    ///
    /// Subscribers are called with a snapshot of the subscriber list, so they
    /// may subscribe, unsubscribe or set other slots while being notified.
    pub fn set(&self, value: T) {
        {
            let mut current = self.slot.value.borrow_mut();
            if *current == value {
                return;
            }
            *current = value.clone();
        }
        let subscribers: Vec<Subscriber<T>> = self
            .slot
            .subscribers
            .borrow()
            .iter()
            .map(|(_, subscriber)| Rc::clone(subscriber))
            .collect();
        for subscriber in subscribers {
            subscriber(&value);
        }
    }

    /// Applies `f` to a copy of the current value and stores the result.
    pub fn update(&self, f: impl FnOnce(T) -> T) {
        self.set(f(self.get()));
    }

    /// Registers `callback`. It is not invoked for the current value.
    ///
    /// The subscription lasts until the returned guard is dropped.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let id = self.slot.next_id.get();
        self.slot.next_id.set(id + 1);
        self.slot.subscribers.borrow_mut().push((id, Rc::new(callback)));

        let slot: Weak<Slot<T>> = Rc::downgrade(&self.slot);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(slot) = slot.upgrade() {
                    slot.subscribers.borrow_mut().retain(|(entry, _)| *entry != id);
                }
            })),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.slot.subscribers.borrow().len()
    }
}

/// Keeps a [`Writable::subscribe`] registration alive.
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Unsubscribes now instead of on drop.
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}
