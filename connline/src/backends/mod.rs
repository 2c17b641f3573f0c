//! Connectivity manager backends.
//!
//! Each supported manager is a [`Backend`]: a per-context state machine
//! driven by [`Backend::open`], [`Backend::close`] and the asynchronous
//! continuations delivered through [`Backend::handle`]. Backends report to
//! the context only through [`BackendCx`], which turns their verdicts into
//! queued triggers.

mod connman;
mod nm;
mod wicd;

use log::debug;

use crate::Result;
use crate::api::models::{BackendKind, Bearer, ContextId, Event};
use crate::core::context::ContextState;
use crate::core::trigger::TriggerQueue;
use crate::dbus::args::Args;
use crate::dbus::{CallToken, MethodCall, Transport};
use crate::types::properties::PropertyList;

pub(crate) use connman::ConnMan;
pub(crate) use nm::NetworkManager;
pub(crate) use wicd::Wicd;

/// Continuation delivered to a backend for one of its contexts.
#[derive(Debug)]
pub(crate) enum BackendEvent {
    Reply { token: CallToken, result: Result<Args> },
    Signal { member: String, args: Args },
    ObjectCall { member: String, args: Args },
    /// A subscription or exported object stopped working.
    ChannelLost,
}

/// Common contract of the ConnMan, NetworkManager and Wicd state machines.
pub(crate) trait Backend {
    fn kind(&self) -> BackendKind;

    /// Starts watching connectivity for `cx`.
    ///
    /// Opening a context that already has a session reuses it.
    fn open(&mut self, cx: &mut BackendCx<'_>) -> Result<()>;

    /// Tears down the session of `cx`. Never schedules events.
    fn close(&mut self, cx: &mut BackendCx<'_>);

    /// Bearer the context is currently connected through.
    fn bearer(&self, context: ContextId) -> Bearer;

    fn handle(&mut self, cx: &mut BackendCx<'_>, event: BackendEvent);
}

/// Instantiates the backend for `kind`.
pub(crate) fn create(kind: BackendKind) -> Box<dyn Backend> {
    match kind {
        BackendKind::ConnMan => Box::new(ConnMan::default()),
        BackendKind::NetworkManager => Box::new(NetworkManager::default()),
        BackendKind::Wicd => Box::new(Wicd::default()),
    }
}

/// What a backend may see and do for one context.
pub(crate) struct BackendCx<'a> {
    pub id: ContextId,
    pub state: &'a mut ContextState,
    pub bus: &'a dyn Transport,
    triggers: &'a mut TriggerQueue,
}

impl<'a> BackendCx<'a> {
    pub(crate) fn new(
        id: ContextId,
        state: &'a mut ContextState,
        bus: &'a dyn Transport,
        triggers: &'a mut TriggerQueue,
    ) -> Self {
        Self {
            id,
            state,
            bus,
            triggers,
        }
    }

    pub(crate) fn connected(&mut self) {
        debug!("{}: connected", self.id);
        self.triggers.schedule(self.id, Event::Connected);
    }

    pub(crate) fn disconnected(&mut self) {
        debug!("{}: disconnected", self.id);
        self.state.online = false;
        self.triggers.schedule(self.id, Event::Disconnected);
    }

    /// Queues `props` if the context listens for properties.
    pub(crate) fn properties(&mut self, props: PropertyList) {
        if self.state.wants_properties && !props.is_empty() {
            debug!("{}: properties {props}", self.id);
            self.triggers.schedule(self.id, Event::Property(props));
        }
    }

    /// Drops everything still queued for the context and reports an error.
    pub(crate) fn error(&mut self) {
        debug!("{}: error", self.id);
        self.state.online = false;
        self.triggers.cancel_all(self.id);
        self.triggers.schedule(self.id, Event::Error);
    }

    pub(crate) fn no_backend(&mut self) {
        debug!("{}: no backend", self.id);
        self.state.online = false;
        self.triggers.cancel_all(self.id);
        self.triggers.schedule(self.id, Event::NoBackend);
    }

    pub(crate) fn wants_properties(&self) -> bool {
        self.state.wants_properties
    }
}

/// The single outstanding call of a backend session.
#[derive(Debug, Default)]
pub(crate) struct PendingCall(Option<CallToken>);

impl PendingCall {
    /// Issues `call`, cancelling whatever was in flight before.
    pub(crate) fn issue(&mut self, cx: &BackendCx<'_>, call: MethodCall) -> Result<()> {
        self.cancel(cx.bus);
        self.0 = Some(cx.bus.call(cx.id, call)?);
        Ok(())
    }

    pub(crate) fn cancel(&mut self, bus: &dyn Transport) {
        if let Some(token) = self.0.take() {
            bus.cancel(token);
        }
    }

    /// Consumes the pending token if `token` is it. Stale replies return `false`.
    pub(crate) fn complete(&mut self, token: CallToken) -> bool {
        if self.0 == Some(token) {
            self.0 = None;
            true
        } else {
            debug!("Ignoring stale reply {token:?}");
            false
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.0.is_some()
    }
}

/// Property list with the `bearer` entry already filled in.
pub(crate) fn base_properties(bearer: Bearer) -> PropertyList {
    let mut props = PropertyList::new();
    props.insert(crate::types::constants::property::BEARER, bearer.as_str());
    props
}
