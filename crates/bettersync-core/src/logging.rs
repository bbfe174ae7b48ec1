//! Logger handles for core components.
//!
//! The core never installs a subscriber. Each component is handed a
//! [`Dispatch`] when it is built and emits its events through it, so an
//! embedding application decides where logs go and tests can silence them.
//!
//! # Example
//!
//! ```rust,ignore
//! use bettersync_core::{logging, FolderNavigator};
//!
//! // Log through whatever subscriber the caller has installed.
//! let navigator = FolderNavigator::new(&transport, logging::current());
//!
//! // Or discard everything.
//! let quiet = FolderNavigator::new(&transport, logging::disabled());
//! ```

use tracing::Dispatch;

/// Capture the dispatcher that is current for the calling thread.
#[must_use]
pub fn current() -> Dispatch {
    tracing::dispatcher::get_default(Dispatch::clone)
}

/// A dispatcher that drops every event.
#[must_use]
pub fn disabled() -> Dispatch {
    Dispatch::none()
}

/// Run `f` with `dispatch` as the thread's default dispatcher.
pub(crate) fn scoped<R>(dispatch: &Dispatch, f: impl FnOnce() -> R) -> R {
    tracing::dispatcher::with_default(dispatch, f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_returns_closure_value() {
        let value = scoped(&disabled(), || 41 + 1);
        assert_eq!(value, 42);
    }

    #[test]
    fn test_scoped_installs_dispatch() {
        let dispatch = Dispatch::new(tracing_subscriber::registry());

        let inner = scoped(&dispatch, current);
        assert!(inner.is::<tracing_subscriber::Registry>());
    }
}
