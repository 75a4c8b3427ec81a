//! Stage and task identities.
//!
//! A [`Key`] is either a **named** key, equal to any other key with the same
//! name, or a **symbol**: a process-unique id whose description only shows up
//! in logs and error messages. Framework-owned stages use symbols so user code
//! can never collide with them by accident.

use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed)
}

/// Opaque identity of a stage or task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// Identity by name.
    Named(Cow<'static, str>),
    /// Unique identity with a human readable description.
    Symbol {
        /// Process-unique id.
        id: u64,
        /// Description used for display only.
        description: Cow<'static, str>,
    },
}

impl Key {
    /// Creates a named key.
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Named(name.into())
    }

    /// Creates a fresh key that is not equal to any other key.
    #[must_use]
    pub fn symbol(description: impl Into<Cow<'static, str>>) -> Self {
        Self::Symbol {
            id: next_id(),
            description: description.into(),
        }
    }

    /// Creates a fresh, undescribed symbol.
    #[must_use]
    pub fn unique() -> Self {
        Self::symbol("")
    }

    #[must_use]
    pub fn is_symbol(&self) -> bool {
        matches!(self, Self::Symbol { .. })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "\"{name}\""),
            Self::Symbol { id, description } if description.is_empty() => {
                write!(f, "Symbol(#{id})")
            }
            Self::Symbol { description, .. } => write!(f, "Symbol({description})"),
        }
    }
}

impl From<&'static str> for Key {
    fn from(name: &'static str) -> Self {
        Self::Named(Cow::Borrowed(name))
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Named(Cow::Owned(name))
    }
}

impl From<&Key> for Key {
    fn from(key: &Key) -> Self {
        key.clone()
    }
}
