//! Context tracking and delegation to the active backend.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::Result;
use crate::api::connline::Connline;
use crate::api::models::{BackendKind, Bearer, ConnlineError, ContextId, Event};
use crate::backends::{Backend, BackendCx, BackendEvent};
use crate::core::trigger::{Trigger, TriggerId, TriggerQueue};
use crate::dbus::Transport;
use crate::types::properties::PropertyList;

/// Receives every event except [`Event::Property`].
pub type EventCallback = Box<dyn FnMut(&Connline, ContextId, Event)>;

/// Receives connection properties.
pub type PropertyCallback = Box<dyn FnMut(&Connline, ContextId, PropertyList)>;

/// Per-context flags visible to backends.
#[derive(Debug, Clone)]
pub(crate) struct ContextState {
    pub mask: Bearer,
    pub background: bool,
    pub online: bool,
    pub wants_properties: bool,
}

struct Context {
    state: ContextState,
    on_event: Option<EventCallback>,
    on_property: Option<PropertyCallback>,
    _bus: Rc<dyn Transport>,
}

/// A callback taken out of its context, with the event it is due.
pub(crate) enum Taken {
    Event(EventCallback, Event),
    Property(PropertyCallback, PropertyList),
}

/// Owns the contexts, the active backend and the trigger queue.
pub(crate) struct ContextManager {
    contexts: BTreeMap<ContextId, Context>,
    next_id: u64,
    pub(super) active: Option<Box<dyn Backend>>,
    pub(super) candidates: Vec<BackendKind>,
    triggers: TriggerQueue,
    pub(super) bus: Rc<dyn Transport>,
    shut_down: bool,
}

impl ContextManager {
    pub(crate) fn new(
        bus: Rc<dyn Transport>,
        candidates: Vec<BackendKind>,
        triggers: TriggerQueue,
    ) -> Self {
        Self {
            contexts: BTreeMap::new(),
            next_id: 1,
            active: None,
            candidates,
            triggers,
            bus,
            shut_down: false,
        }
    }

    /// Runs `f` with the active backend and a view of context `id`.
    ///
    /// Returns `None` when there is no active backend or no such context.
    fn with_backend<R>(
        &mut self,
        id: ContextId,
        f: impl FnOnce(&mut Box<dyn Backend>, &mut BackendCx<'_>) -> R,
    ) -> Option<R> {
        let Self {
            contexts,
            active,
            triggers,
            bus,
            ..
        } = self;
        let backend = active.as_mut()?;
        let ctx = contexts.get_mut(&id)?;
        let mut cx = BackendCx::new(id, &mut ctx.state, &**bus, triggers);
        Some(f(backend, &mut cx))
    }

    /// Runs `f` with a view of context `id`, with or without a backend.
    fn with_context(&mut self, id: ContextId, f: impl FnOnce(&mut BackendCx<'_>)) {
        if let Some(ctx) = self.contexts.get_mut(&id) {
            let mut cx = BackendCx::new(id, &mut ctx.state, &*self.bus, &mut self.triggers);
            f(&mut cx);
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            Err(ConnlineError::NotInitialized)
        } else {
            Ok(())
        }
    }

    pub(crate) fn open(
        &mut self,
        mask: Bearer,
        background: bool,
        on_event: EventCallback,
    ) -> Result<ContextId> {
        self.ensure_running()?;
        let mask = Bearer::mask_from_bits(mask.bits())?;
        if self.active.is_none() {
            return Err(ConnlineError::NoBackend);
        }

        let id = ContextId(self.next_id);
        self.next_id += 1;
        self.contexts.insert(
            id,
            Context {
                state: ContextState {
                    mask,
                    background,
                    online: false,
                    wants_properties: false,
                },
                on_event: Some(on_event),
                on_property: None,
                _bus: Rc::clone(&self.bus),
            },
        );

        match self.with_backend(id, |backend, cx| backend.open(cx)) {
            Some(Ok(())) => {
                debug!("{id}: opened (mask {mask:?}, background {background})");
                Ok(id)
            }
            Some(Err(e)) => {
                self.contexts.remove(&id);
                Err(e)
            }
            None => {
                self.contexts.remove(&id);
                Err(ConnlineError::NoBackend)
            }
        }
    }

    pub(crate) fn set_property_callback(
        &mut self,
        id: ContextId,
        callback: PropertyCallback,
    ) -> Result<()> {
        self.ensure_running()?;
        let ctx = self
            .contexts
            .get_mut(&id)
            .ok_or(ConnlineError::UnknownContext(id))?;
        ctx.on_property = Some(callback);
        ctx.state.wants_properties = true;
        Ok(())
    }

    pub(crate) fn close(&mut self, id: ContextId) {
        let Some(mut ctx) = self.contexts.remove(&id) else {
            return;
        };
        self.triggers.cancel_all(id);
        if let Some(backend) = self.active.as_mut() {
            let mut cx = BackendCx::new(id, &mut ctx.state, &*self.bus, &mut self.triggers);
            backend.close(&mut cx);
        }
        debug!("{id}: closed");
    }

    /// Closes every context and shuts the transport down.
    pub(crate) fn cleanup(&mut self) {
        if self.shut_down {
            return;
        }
        let ids: Vec<_> = self.contexts.keys().copied().collect();
        for id in ids {
            self.close(id);
        }
        self.active = None;
        self.bus.shutdown();
        self.shut_down = true;
    }

    pub(crate) fn is_online(&self, id: ContextId) -> bool {
        self.contexts.get(&id).is_some_and(|c| c.state.online)
    }

    pub(crate) fn bearer(&self, id: ContextId) -> Bearer {
        match (&self.active, self.contexts.contains_key(&id)) {
            (Some(backend), true) => backend.bearer(id),
            _ => Bearer::UNKNOWN,
        }
    }

    pub(crate) fn active_kind(&self) -> Option<BackendKind> {
        self.active.as_ref().map(|backend| backend.kind())
    }

    pub(crate) fn contains(&self, id: ContextId) -> bool {
        self.contexts.contains_key(&id)
    }

    /// Forwards a bus continuation to the backend for context `id`.
    pub(crate) fn dispatch(&mut self, id: ContextId, event: BackendEvent) {
        if self
            .with_backend(id, |backend, cx| backend.handle(cx, event))
            .is_none()
        {
            debug!("{id}: dropping event for closed context or inactive backend");
        }
    }

    fn ids(&self) -> Vec<ContextId> {
        self.contexts.keys().copied().collect()
    }

    /// Closes every backend session and reports that no manager is running.
    pub(crate) fn disconnect_all(&mut self) {
        for id in self.ids() {
            self.with_backend(id, |backend, cx| backend.close(cx));
            self.with_context(id, |cx| cx.no_backend());
        }
    }

    /// Reopens every context on the newly active backend.
    pub(crate) fn reconnect_all(&mut self) {
        for id in self.ids() {
            if let Some(Err(e)) = self.with_backend(id, |backend, cx| backend.open(cx)) {
                warn!("{id}: reopen failed: {e}");
                self.with_context(id, |cx| cx.error());
            }
        }
    }

    /// Reports to every context that no manager is running.
    pub(crate) fn invalidate_all(&mut self) {
        for id in self.ids() {
            self.with_context(id, |cx| cx.no_backend());
        }
    }

    pub(crate) fn begin_drain(&mut self) -> TriggerId {
        self.triggers.begin_drain()
    }

    /// Pops the next trigger of the batch together with its callback.
    ///
    /// A trigger whose callback is running further up the stack goes back
    /// to the end of the queue. Property triggers for contexts without a
    /// property callback are dropped.
    pub(crate) fn take_next(&mut self, end: TriggerId) -> Option<(ContextId, Taken)> {
        while let Some(Trigger { context, event, .. }) = self.triggers.pop_before(end) {
            let Some(ctx) = self.contexts.get_mut(&context) else {
                continue;
            };
            match event {
                Event::Property(props) => match ctx.on_property.take() {
                    Some(cb) => return Some((context, Taken::Property(cb, props))),
                    None if ctx.state.wants_properties => {
                        self.triggers.schedule(context, Event::Property(props));
                    }
                    None => {}
                },
                event => match ctx.on_event.take() {
                    Some(cb) => return Some((context, Taken::Event(cb, event))),
                    None => {
                        self.triggers.schedule(context, event);
                    }
                },
            }
        }
        None
    }

    /// Puts an event callback back after it ran, unless the context went
    /// away meanwhile.
    pub(crate) fn restore_event(&mut self, id: ContextId, callback: EventCallback) {
        if let Some(ctx) = self.contexts.get_mut(&id) {
            ctx.on_event.get_or_insert(callback);
        }
    }

    /// Same as [`restore_event`](Self::restore_event). A callback installed
    /// while the old one was running wins.
    pub(crate) fn restore_property(&mut self, id: ContextId, callback: PropertyCallback) {
        if let Some(ctx) = self.contexts.get_mut(&id) {
            ctx.on_property.get_or_insert(callback);
        }
    }

    #[cfg(test)]
    pub(crate) fn with_test_context(&mut self, id: ContextId, f: impl FnOnce(&mut BackendCx<'_>)) {
        self.with_context(id, f);
    }

    #[cfg(test)]
    pub(crate) fn pending_triggers(&self, id: ContextId) -> usize {
        self.triggers.pending(id)
    }
}
