use futures::future::LocalBoxFuture;
use glib::MainContext;

use super::Reactor;

/// Runs on the thread-default GLib main context.
pub(crate) struct GlibReactor {
    context: MainContext,
}

impl GlibReactor {
    pub(crate) fn new() -> Self {
        Self {
            context: MainContext::ref_thread_default(),
        }
    }
}

impl Reactor for GlibReactor {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        self.context.spawn_local(task);
    }

    fn defer(&self, callback: Box<dyn FnOnce()>) {
        self.context.spawn_local(async move {
            callback();
        });
    }
}
