//! The engine behind a [`Connline`] handle.
//!
//! Bus events are pumped from a reactor task into the context manager.
//! Triggers queued while handling them are fired from a separate, deferred
//! reactor callback, with the manager released so host callbacks may call
//! back into the API.

use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use futures::future::{AbortHandle, abortable};
use log::debug;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::context::{ContextManager, Taken};
use super::trigger::TriggerQueue;
use crate::api::connline::Connline;
use crate::api::models::BackendKind;
use crate::backends::BackendEvent;
use crate::dbus::{BusEvent, Transport};
use crate::reactor::Reactor;

pub(crate) struct Engine {
    pub(crate) manager: RefCell<ContextManager>,
    pub(crate) reactor: Rc<dyn Reactor>,
    pump: RefCell<Option<AbortHandle>>,
}

impl Engine {
    /// Builds the engine, starts pumping `events` and activates the first
    /// running backend, if any.
    pub(crate) fn start(
        reactor: Rc<dyn Reactor>,
        bus: Rc<dyn Transport>,
        candidates: Vec<BackendKind>,
        events: UnboundedReceiver<BusEvent>,
    ) -> Rc<Self> {
        let engine = Rc::new_cyclic(|weak: &Weak<Engine>| {
            let weak = weak.clone();
            let defer_on = Rc::clone(&reactor);
            let arm = Box::new(move || {
                let weak = weak.clone();
                defer_on.defer(Box::new(move || {
                    if let Some(engine) = weak.upgrade() {
                        engine.fire_triggers();
                    }
                }));
            });

            Engine {
                manager: RefCell::new(ContextManager::new(
                    bus,
                    candidates,
                    TriggerQueue::new(arm),
                )),
                reactor,
                pump: RefCell::new(None),
            }
        });

        engine.spawn_pump(events);
        engine.manager.borrow_mut().select_backend();
        engine
    }

    fn spawn_pump(self: &Rc<Self>, mut events: UnboundedReceiver<BusEvent>) {
        let weak = Rc::downgrade(self);
        let (pump, handle) = abortable(async move {
            while let Some(event) = events.next().await {
                let Some(engine) = weak.upgrade() else {
                    break;
                };
                engine.handle_bus_event(event);
            }
            debug!("Bus event pump stopped");
        });
        self.reactor.spawn(Box::pin(async move {
            let _ = pump.await;
        }));
        *self.pump.borrow_mut() = Some(handle);
    }

    fn handle_bus_event(&self, event: BusEvent) {
        let mut manager = self.manager.borrow_mut();
        match event {
            BusEvent::Reply {
                owner,
                token,
                result,
            } => manager.dispatch(owner, BackendEvent::Reply { token, result }),
            BusEvent::Signal {
                owner,
                subscription,
                member,
                args,
            } => {
                debug!("{owner}: {member} on {subscription:?}");
                manager.dispatch(owner, BackendEvent::Signal { member, args });
            }
            BusEvent::ObjectCall {
                owner,
                member,
                args,
            } => manager.dispatch(owner, BackendEvent::ObjectCall { member, args }),
            BusEvent::SubscriptionLost {
                owner,
                subscription,
            } => {
                debug!("{owner}: lost {subscription:?}");
                manager.dispatch(owner, BackendEvent::ChannelLost);
            }
            BusEvent::ServiceChanged { name, running } => {
                manager.service_changed(&name, running);
            }
        }
    }

    /// Fires every trigger queued before this call.
    fn fire_triggers(self: &Rc<Self>) {
        let handle = Connline::from_engine(Rc::clone(self));
        let end = self.manager.borrow_mut().begin_drain();

        loop {
            let next = self.manager.borrow_mut().take_next(end);
            let Some((id, taken)) = next else {
                break;
            };

            match taken {
                Taken::Event(mut callback, event) => {
                    callback(&handle, id, event);
                    self.manager.borrow_mut().restore_event(id, callback);
                }
                Taken::Property(mut callback, props) => {
                    callback(&handle, id, props);
                    self.manager.borrow_mut().restore_property(id, callback);
                }
            }
        }
    }

    pub(crate) fn shutdown(&self) {
        self.manager.borrow_mut().cleanup();
        if let Some(pump) = self.pump.borrow_mut().take() {
            pump.abort();
        }
    }
}
