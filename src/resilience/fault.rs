//! Fault containment boundary.
//!
//! [`contain`] and [`contain_blocking`] run a unit of work and turn a panic
//! into a [`Contained::Fault`] value instead of letting it unwind further.
//! The request pipeline and the background runner both sit on this boundary.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use futures_util::FutureExt;
use thiserror::Error;

thread_local! {
    static LAST_PANIC_TRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Record a backtrace at the panic site so a contained fault can report
/// where it happened rather than where it was caught.
///
/// The previous hook still runs. Safe to call more than once.
pub fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let trace = Backtrace::force_capture().to_string();
            LAST_PANIC_TRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            previous(info);
        }));
    });
}

/// Outcome of running work inside the containment boundary.
#[derive(Debug)]
pub enum Contained<T> {
    Ok(T),
    Fault(Fault),
}

impl<T> Contained<T> {
    pub fn is_fault(&self) -> bool {
        matches!(self, Contained::Fault(_))
    }

    pub fn into_result(self) -> Result<T, Fault> {
        match self {
            Contained::Ok(value) => Ok(value),
            Contained::Fault(fault) => Err(fault),
        }
    }
}

/// A panic caught at the boundary.
#[derive(Debug, Clone, Error)]
#[error("panic: {message}")]
pub struct Fault {
    message: String,
    trace: Option<String>,
}

impl Fault {
    fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };

        let trace = LAST_PANIC_TRACE.with(|slot| slot.borrow_mut().take());
        Self { message, trace }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Backtrace from the panic site, when the panic hook is installed.
    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    pub fn into_trace(self) -> Option<String> {
        self.trace
    }
}

/// Drive `future` to completion, containing any panic raised while polling.
pub async fn contain<F>(future: F) -> Contained<F::Output>
where
    F: Future,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(value) => Contained::Ok(value),
        Err(payload) => Contained::Fault(Fault::from_panic(payload)),
    }
}

/// Run `work` on the current thread, containing any panic.
pub fn contain_blocking<T, F>(work: F) -> Contained<T>
where
    F: FnOnce() -> T,
{
    match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(value) => Contained::Ok(value),
        Err(payload) => Contained::Fault(Fault::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ok_passes_through() {
        let outcome = contain(async { 41 + 1 }).await;
        assert_eq!(outcome.into_result().unwrap(), 42);
    }

    #[tokio::test]
    async fn static_str_panic_is_contained() {
        let outcome = contain(async {
            panic!("handler exploded");
        })
        .await;

        let fault = outcome.into_result().unwrap_err();
        assert_eq!(fault.message(), "handler exploded");
        assert_eq!(fault.to_string(), "panic: handler exploded");
    }

    #[test]
    fn formatted_panic_is_contained() {
        let outcome: Contained<()> = contain_blocking(|| panic!("bad id {}", 7));
        assert!(outcome.is_fault());
        assert_eq!(outcome.into_result().unwrap_err().message(), "bad id 7");
    }

    #[test]
    fn hook_captures_panic_site_trace() {
        install_panic_hook();
        let outcome: Contained<()> = contain_blocking(|| panic!("traced"));
        let fault = outcome.into_result().unwrap_err();
        assert!(fault.trace().is_some_and(|t| !t.is_empty()));
    }
}
