use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::error;

/// Runs user code, logging a panic instead of unwinding into the caller
///
/// Returns `None` when `f` panicked.
pub(crate) fn guarded<T>(context: &'static str, f: impl FnOnce() -> T) -> Option<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            error!(context, panic = %panic_message(payload.as_ref()), "Caught panic in callback");
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
