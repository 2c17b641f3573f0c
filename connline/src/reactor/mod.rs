//! Host event loop bindings.
//!
//! The engine never blocks and never owns a thread. It spawns its bus tasks
//! and defers its callbacks through a [`Reactor`], picked once at init from
//! [`EventLoop`](crate::EventLoop).

#[cfg(feature = "glib")]
mod glib_reactor;
mod manual;
mod tokio_reactor;

use futures::future::LocalBoxFuture;
use std::rc::Rc;

use crate::Result;
use crate::api::models::EventLoop;

#[cfg(feature = "glib")]
pub(crate) use glib_reactor::GlibReactor;
pub(crate) use manual::ManualReactor;
pub(crate) use tokio_reactor::TokioReactor;

/// A single-threaded event loop the engine runs on.
pub(crate) trait Reactor {
    /// Runs `task` to completion on the loop.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);

    /// Runs `callback` on a later loop iteration, never from within this call.
    fn defer(&self, callback: Box<dyn FnOnce()>);

    /// Runs one iteration if the host drives the loop by hand.
    ///
    /// Returns `true` if any deferred callback ran.
    fn iterate(&self) -> bool {
        false
    }
}

/// Creates the reactor for `event_loop`.
pub(crate) fn for_event_loop(event_loop: EventLoop) -> Result<Rc<dyn Reactor>> {
    match event_loop {
        EventLoop::Tokio => Ok(Rc::new(TokioReactor::new()?)),
        EventLoop::Manual => Ok(Rc::new(ManualReactor::new())),
        #[cfg(feature = "glib")]
        EventLoop::Glib => Ok(Rc::new(GlibReactor::new())),
        #[cfg(not(feature = "glib"))]
        EventLoop::Glib => Err(crate::ConnlineError::UnsupportedEventLoop(event_loop)),
    }
}
