//! Helpers shared by the server, client and HTTP layers

mod callback;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub(crate) use callback::guarded;

/// Emits a `debug!` event only when the instance was configured verbose
macro_rules! verbose {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            tracing::debug!($($arg)+);
        }
    };
}

pub(crate) use verbose;

/// Locks a mutex, recovering the data if a callback panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
