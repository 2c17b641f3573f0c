//! Message bus plumbing.
//!
//! Backends never touch `zbus` directly. They issue requests through the
//! [`Transport`] trait, which hands back tokens immediately, and receive the
//! outcome later as [`BusEvent`]s that the engine pumps on the host reactor.

pub(crate) mod args;
#[cfg(test)]
pub(crate) mod mock;
mod notifier;
pub(crate) mod zbus_transport;

use std::collections::HashMap;
use zvariant::{OwnedObjectPath, Value};

use crate::Result;
use crate::api::models::ContextId;
use args::Args;

/// Identifies an in-flight method call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CallToken(pub(crate) u64);

/// Identifies a signal subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SubscriptionId(pub(crate) u64);

/// Body of an outgoing method call.
#[derive(Debug)]
pub(crate) enum CallBody {
    Empty,
    Str(String),
    StrPair(String, String),
    Bool(bool),
    /// `(a{sv}, o)`, as used by ConnMan's `CreateSession`.
    SettingsAndPath(HashMap<String, Value<'static>>, OwnedObjectPath),
}

/// An outgoing method call.
#[derive(Debug)]
pub(crate) struct MethodCall {
    pub destination: &'static str,
    pub path: String,
    pub interface: &'static str,
    pub member: &'static str,
    pub body: CallBody,
}

impl MethodCall {
    pub(crate) fn new(
        destination: &'static str,
        path: impl Into<String>,
        interface: &'static str,
        member: &'static str,
    ) -> Self {
        Self {
            destination,
            path: path.into(),
            interface,
            member,
            body: CallBody::Empty,
        }
    }

    #[must_use]
    pub(crate) fn with_body(mut self, body: CallBody) -> Self {
        self.body = body;
        self
    }
}

/// Which signals a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SignalRule {
    pub path: &'static str,
    pub interface: &'static str,
    pub member: &'static str,
}

/// Something the bus produced for the engine.
#[derive(Debug)]
pub(crate) enum BusEvent {
    /// Outcome of a call issued with [`Transport::call`].
    Reply {
        owner: ContextId,
        token: CallToken,
        result: Result<Args>,
    },
    /// A signal matching one of `owner`'s subscriptions.
    Signal {
        owner: ContextId,
        subscription: SubscriptionId,
        member: String,
        args: Args,
    },
    /// A method call on an object registered for `owner`.
    ObjectCall {
        owner: ContextId,
        member: String,
        args: Args,
    },
    /// A subscription could not be set up or its stream ended.
    SubscriptionLost {
        owner: ContextId,
        subscription: SubscriptionId,
    },
    /// A watched service gained or lost its owner.
    ServiceChanged { name: String, running: bool },
}

/// Asynchronous IPC operations available to backends.
///
/// Every operation returns without waiting for the bus. Results are
/// delivered as [`BusEvent`]s tagged with the `owner` the request was made
/// for, so events for closed contexts can be dropped by the engine.
pub(crate) trait Transport {
    /// Issues a method call whose reply arrives as [`BusEvent::Reply`].
    fn call(&self, owner: ContextId, call: MethodCall) -> Result<CallToken>;

    /// Sends a method call without waiting for a reply.
    fn send(&self, call: MethodCall) -> Result<()>;

    /// Abandons an in-flight call. Its reply will never be delivered.
    fn cancel(&self, token: CallToken);

    /// Starts delivering matching signals as [`BusEvent::Signal`].
    fn subscribe(&self, owner: ContextId, rule: SignalRule) -> Result<SubscriptionId>;

    fn unsubscribe(&self, subscription: SubscriptionId);

    /// Exports an object at `path` whose incoming calls arrive as
    /// [`BusEvent::ObjectCall`].
    fn register_object(&self, owner: ContextId, path: &str) -> Result<()>;

    fn unregister_object(&self, path: &str);

    /// Whether `name` currently has an owner on the bus.
    fn is_service_running(&self, name: &str) -> bool;

    /// Drops every pending call, subscription and watch.
    fn shutdown(&self);
}
