use futures::future::LocalBoxFuture;
use log::error;

use super::Reactor;
use crate::Result;
use crate::api::models::{ConnlineError, EventLoop};

/// Runs on the current Tokio `LocalSet`.
///
/// Spawning outside a `LocalSet` panics. Tokio cannot be asked whether one
/// is active, so `new` only checks for a runtime and the engine must still
/// be created and used from within a `LocalSet`.
pub(crate) struct TokioReactor;

impl TokioReactor {
    pub(crate) fn new() -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            error!("EventLoop::Tokio requested outside a Tokio runtime");
            return Err(ConnlineError::EventLoopUnavailable(EventLoop::Tokio));
        }
        Ok(Self)
    }
}

impl Reactor for TokioReactor {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        tokio::task::spawn_local(task);
    }

    fn defer(&self, callback: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            callback();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[tokio::test]
    async fn defer_runs_after_the_caller_returns() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let ran = Rc::new(Cell::new(false));
                let flag = Rc::clone(&ran);

                let reactor = TokioReactor::new().unwrap();
                reactor.defer(Box::new(move || flag.set(true)));
                assert!(!ran.get());

                for _ in 0..4 {
                    tokio::task::yield_now().await;
                }
                assert!(ran.get());
            })
            .await;
    }

    #[test]
    fn needs_a_running_runtime() {
        assert!(matches!(
            TokioReactor::new(),
            Err(ConnlineError::EventLoopUnavailable(EventLoop::Tokio))
        ));
    }
}
