//! Typed change notifications.
//!
//! Change feeds resolve their payload to a concrete type once, at the feed
//! boundary; consumers match on the variant and never re-inspect the object.

/// A change observed on a watched object.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent<T> {
    /// The object appeared.
    Added(T),
    /// The object changed.
    Modified(T),
    /// The object was removed; carries its last known state.
    Deleted(T),
    /// The feed may have dropped changes. Consumers relist to catch up.
    Resync,
}

impl<T> WatchEvent<T> {
    /// The object the change is about, if it names one.
    pub fn object(&self) -> Option<&T> {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => Some(o),
            WatchEvent::Resync => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WatchEvent<U> {
        match self {
            WatchEvent::Added(o) => WatchEvent::Added(f(o)),
            WatchEvent::Modified(o) => WatchEvent::Modified(f(o)),
            WatchEvent::Deleted(o) => WatchEvent::Deleted(f(o)),
            WatchEvent::Resync => WatchEvent::Resync,
        }
    }
}
