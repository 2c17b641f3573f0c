//! The public `Connline` handle.

use futures::channel::mpsc;
use log::{debug, error};
use std::rc::Rc;

use crate::Result;
use crate::api::models::{BackendKind, Bearer, Config, ConnlineError, ContextId, Event};
use crate::core::engine::Engine;
use crate::dbus::zbus_transport::ZbusTransport;
use crate::reactor;
use crate::types::properties::PropertyList;

/// Connectivity watcher bound to one message bus and one event loop.
///
/// Cloning is cheap and every clone refers to the same engine. The handle is
/// `!Send`: it lives on the thread running its event loop, and callbacks
/// receive a reference to it so they can query or close contexts.
///
/// # Example
///
/// ```no_run
/// use connline::{Bearer, Config, Connline, Event};
///
/// # async fn example() -> connline::Result<()> {
/// let local = tokio::task::LocalSet::new();
/// local.run_until(async {
///     let conn = Connline::init(Config::default()).await?;
///
///     let id = conn.open(Bearer::WIFI | Bearer::ETHERNET, false, |conn, id, event| {
///         match event {
///             Event::Connected => println!("online via {}", conn.bearer(id)),
///             Event::Disconnected => println!("offline"),
///             Event::NoBackend => println!("no connectivity manager"),
///             Event::Error => conn.close(id),
///             Event::Property(_) => {}
///         }
///     })?;
///
///     conn.set_property_callback(id, |_, _, props| {
///         println!("{props}");
///     })?;
///     Ok::<_, connline::ConnlineError>(())
/// }).await
/// # }
/// ```
#[derive(Clone)]
pub struct Connline {
    engine: Rc<Engine>,
}

impl Connline {
    /// Connects to the bus and starts watching for connectivity managers.
    ///
    /// Succeeds even when no manager is running yet; contexts can only be
    /// opened once one appears, see [`active_backend`](Self::active_backend).
    ///
    /// With [`EventLoop::Tokio`](crate::EventLoop::Tokio) this must run
    /// inside a `tokio::task::LocalSet`. Outside any Tokio runtime it fails
    /// with [`ConnlineError::EventLoopUnavailable`].
    pub async fn init(config: Config) -> Result<Self> {
        if config.backends.is_empty() {
            error!("No connectivity backend registered");
            return Err(ConnlineError::DefectiveInstall);
        }

        let reactor = reactor::for_event_loop(config.event_loop)?;
        let (events_tx, events_rx) = mpsc::unbounded();
        let services: Vec<&'static str> = config.backends.iter().map(|k| k.service()).collect();

        let transport =
            ZbusTransport::connect(config.bus, &services, Rc::clone(&reactor), events_tx).await?;
        let engine = Engine::start(reactor, Rc::new(transport), config.backends, events_rx);
        debug!("connline initialized");

        Ok(Self { engine })
    }

    pub(crate) fn from_engine(engine: Rc<Engine>) -> Self {
        Self { engine }
    }

    /// Opens a context accepting the bearers in `mask`.
    ///
    /// Unless `background` is set, the manager is asked to bring a matching
    /// connection up. `callback` receives every event of the context except
    /// properties, always from a later event loop iteration.
    ///
    /// Fails with [`ConnlineError::NoBackend`] when no manager is running.
    pub fn open<F>(&self, mask: Bearer, background: bool, callback: F) -> Result<ContextId>
    where
        F: FnMut(&Connline, ContextId, Event) + 'static,
    {
        self.engine
            .manager
            .borrow_mut()
            .open(mask, background, Box::new(callback))
    }

    /// Installs the callback receiving connection properties of `id`.
    ///
    /// Properties are only gathered for contexts that have one.
    pub fn set_property_callback<F>(&self, id: ContextId, callback: F) -> Result<()>
    where
        F: FnMut(&Connline, ContextId, PropertyList) + 'static,
    {
        self.engine
            .manager
            .borrow_mut()
            .set_property_callback(id, Box::new(callback))
    }

    /// Whether the manager reports `id` as fully online.
    ///
    /// ConnMan distinguishes "connected" from "online"; the other managers
    /// report both at once.
    #[must_use]
    pub fn is_online(&self, id: ContextId) -> bool {
        self.engine.manager.borrow().is_online(id)
    }

    /// Bearer `id` is connected through, [`Bearer::UNKNOWN`] when not connected.
    #[must_use]
    pub fn bearer(&self, id: ContextId) -> Bearer {
        self.engine.manager.borrow().bearer(id)
    }

    /// Whether `id` is an open context.
    #[must_use]
    pub fn is_open(&self, id: ContextId) -> bool {
        self.engine.manager.borrow().contains(id)
    }

    /// The manager currently in use.
    #[must_use]
    pub fn active_backend(&self) -> Option<BackendKind> {
        self.engine.manager.borrow().active_kind()
    }

    /// Closes `id`. No callback of it runs afterwards.
    ///
    /// Safe to call from the context's own callback. Unknown ids are ignored.
    pub fn close(&self, id: ContextId) {
        self.engine.manager.borrow_mut().close(id);
    }

    /// Closes every context and disconnects from the bus.
    ///
    /// Every later `open` fails with [`ConnlineError::NotInitialized`].
    pub fn cleanup(&self) {
        self.engine.shutdown();
        debug!("connline cleaned up");
    }

    /// Runs one iteration of a manually driven event loop.
    ///
    /// Only meaningful with [`EventLoop::Manual`](crate::EventLoop::Manual);
    /// returns `true` if any callback was due.
    pub fn iterate(&self) -> bool {
        self.engine.reactor.iterate()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Engine wired to a [`MockTransport`] and a manual reactor.

    use super::*;
    use crate::dbus::Transport;
    use crate::dbus::mock::MockTransport;
    use crate::reactor::ManualReactor;
    use std::cell::RefCell;

    pub(crate) fn connline_with_mock(
        candidates: Vec<BackendKind>,
        running: &[&str],
    ) -> (Connline, Rc<MockTransport>) {
        let reactor: Rc<dyn reactor::Reactor> = Rc::new(ManualReactor::new());
        let (events_tx, events_rx) = mpsc::unbounded();
        let mock = Rc::new(MockTransport::new(events_tx));
        for name in running {
            mock.set_running(name, true);
        }

        let bus: Rc<dyn Transport> = Rc::clone(&mock) as Rc<dyn Transport>;
        let engine = Engine::start(reactor, bus, candidates, events_rx);
        (Connline::from_engine(engine), mock)
    }

    pub(crate) type EventLog = Rc<RefCell<Vec<(ContextId, Event)>>>;

    /// Callback appending every event it receives to `log`.
    pub(crate) fn recorder(log: &EventLog) -> impl FnMut(&Connline, ContextId, Event) + 'static {
        let log = Rc::clone(log);
        move |_, id, event| log.borrow_mut().push((id, event))
    }

    pub(crate) fn events_of(log: &EventLog, id: ContextId) -> Vec<Event> {
        log.borrow()
            .iter()
            .filter(|(ctx, _)| *ctx == id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub(crate) fn engine(conn: &Connline) -> &Rc<Engine> {
        &conn.engine
    }

    /// Reopens every context on the active backend, as after a failover.
    pub(crate) fn reconnect_all(conn: &Connline) {
        conn.engine.manager.borrow_mut().reconnect_all();
    }

    /// Iterates until nothing is left to do.
    pub(crate) fn pump(conn: &Connline) {
        for _ in 0..16 {
            conn.iterate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    #[test]
    fn init_without_backends_is_a_defective_install() {
        let config = Config::default().with_backends(Vec::new());
        assert!(matches!(
            block_on(Connline::init(config)),
            Err(ConnlineError::DefectiveInstall)
        ));
    }
}
