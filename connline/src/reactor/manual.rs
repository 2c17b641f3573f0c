use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;
use log::warn;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use super::Reactor;

/// Loop driven by the host calling [`Reactor::iterate`].
///
/// Suits hosts with their own poll loop: each host turn calls
/// [`Connline::iterate`](crate::Connline::iterate) once.
pub(crate) struct ManualReactor {
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
    deferred: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    running: Cell<bool>,
}

impl ManualReactor {
    pub(crate) fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: RefCell::new(pool),
            spawner,
            deferred: RefCell::new(VecDeque::new()),
            running: Cell::new(false),
        }
    }
}

impl Reactor for ManualReactor {
    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(e) = self.spawner.spawn_local(task) {
            warn!("Could not spawn task: {e}");
        }
    }

    fn defer(&self, callback: Box<dyn FnOnce()>) {
        self.deferred.borrow_mut().push_back(callback);
    }

    fn iterate(&self) -> bool {
        // Nested call from inside a task or callback.
        if self.running.replace(true) {
            return false;
        }
        if let Ok(mut pool) = self.pool.try_borrow_mut() {
            pool.run_until_stalled();
        }

        let batch: Vec<_> = self.deferred.borrow_mut().drain(..).collect();
        let ran = !batch.is_empty();
        for callback in batch {
            callback();
        }
        self.running.set(false);
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn deferred_callbacks_wait_for_iterate() {
        let reactor = ManualReactor::new();
        let count = Rc::new(Cell::new(0));

        let c = Rc::clone(&count);
        reactor.defer(Box::new(move || c.set(c.get() + 1)));
        assert_eq!(count.get(), 0);

        assert!(reactor.iterate());
        assert_eq!(count.get(), 1);
        assert!(!reactor.iterate());
    }

    #[test]
    fn callbacks_deferred_while_draining_run_next_turn() {
        let reactor = Rc::new(ManualReactor::new());
        let count = Rc::new(Cell::new(0));

        let r = Rc::clone(&reactor);
        let c = Rc::clone(&count);
        reactor.defer(Box::new(move || {
            c.set(c.get() + 1);
            let c2 = Rc::clone(&c);
            r.defer(Box::new(move || c2.set(c2.get() + 10)));
        }));

        reactor.iterate();
        assert_eq!(count.get(), 1);
        reactor.iterate();
        assert_eq!(count.get(), 11);
    }

    #[test]
    fn nested_iterate_is_a_no_op() {
        let reactor = Rc::new(ManualReactor::new());
        let nested = Rc::new(Cell::new(None));

        let r = Rc::clone(&reactor);
        let n = Rc::clone(&nested);
        reactor.defer(Box::new(move || n.set(Some(r.iterate()))));

        assert!(reactor.iterate());
        assert_eq!(nested.get(), Some(false));
    }

    #[test]
    fn spawned_tasks_run_on_iterate() {
        let reactor = ManualReactor::new();
        let done = Rc::new(Cell::new(false));

        let d = Rc::clone(&done);
        reactor.spawn(Box::pin(async move { d.set(true) }));
        assert!(!done.get());

        reactor.iterate();
        assert!(done.get());
    }
}
