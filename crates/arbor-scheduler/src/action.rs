use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// A repeating timer body. Errors are logged, never propagated.
pub type TimerAction = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Run one firing of `action`, absorbing errors and panics.
///
/// Returns `true` when the action completed without error.
pub fn run_guarded(timer_id: &str, action: &TimerAction) -> bool {
    match catch_unwind(AssertUnwindSafe(|| action())) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(timer_id, "timer action failed: {e:#}");
            false
        }
        Err(payload) => {
            tracing::error!(
                timer_id,
                "timer action panicked: {}",
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
