//! Recording [`Transport`] for unit tests.
//!
//! Calls are recorded instead of sent. Tests answer them by injecting
//! [`BusEvent`]s through [`MockTransport::reply`] and friends, then pump the
//! manual reactor.

use futures::channel::mpsc::UnboundedSender;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use super::args::Args;
use super::{BusEvent, CallBody, CallToken, MethodCall, SignalRule, SubscriptionId, Transport};
use crate::Result;
use crate::api::models::{ConnlineError, ContextId};

#[derive(Debug)]
pub(crate) struct RecordedCall {
    pub owner: ContextId,
    pub token: CallToken,
    pub call: MethodCall,
}

#[derive(Debug)]
pub(crate) struct RecordedSubscription {
    pub owner: ContextId,
    pub id: SubscriptionId,
    pub rule: SignalRule,
}

pub(crate) struct MockTransport {
    events: UnboundedSender<BusEvent>,
    pub calls: RefCell<Vec<RecordedCall>>,
    pub sent: RefCell<Vec<MethodCall>>,
    pub cancelled: RefCell<Vec<CallToken>>,
    pub subscriptions: RefCell<Vec<RecordedSubscription>>,
    pub unsubscribed: RefCell<Vec<SubscriptionId>>,
    pub objects: RefCell<Vec<(ContextId, String)>>,
    pub unregistered: RefCell<Vec<String>>,
    running: RefCell<HashSet<String>>,
    fail_calls: Cell<bool>,
    next: Cell<u64>,
    pub shut_down: Cell<bool>,
}

impl MockTransport {
    pub(crate) fn new(events: UnboundedSender<BusEvent>) -> Self {
        Self {
            events,
            calls: RefCell::new(Vec::new()),
            sent: RefCell::new(Vec::new()),
            cancelled: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(Vec::new()),
            unsubscribed: RefCell::new(Vec::new()),
            objects: RefCell::new(Vec::new()),
            unregistered: RefCell::new(Vec::new()),
            running: RefCell::new(HashSet::new()),
            fail_calls: Cell::new(false),
            next: Cell::new(1),
            shut_down: Cell::new(false),
        }
    }

    fn next_id(&self) -> u64 {
        let id = self.next.get();
        self.next.set(id + 1);
        id
    }

    /// Marks `name` as owned on the bus without emitting an event.
    pub(crate) fn set_running(&self, name: &str, running: bool) {
        if running {
            self.running.borrow_mut().insert(name.to_string());
        } else {
            self.running.borrow_mut().remove(name);
        }
    }

    /// Changes presence of `name` and emits the matching event.
    pub(crate) fn service_changed(&self, name: &str, running: bool) {
        self.set_running(name, running);
        self.emit(BusEvent::ServiceChanged {
            name: name.to_string(),
            running,
        });
    }

    /// Makes every subsequent `call` fail synchronously.
    pub(crate) fn fail_calls(&self, fail: bool) {
        self.fail_calls.set(fail);
    }

    pub(crate) fn emit(&self, event: BusEvent) {
        self.events
            .unbounded_send(event)
            .expect("engine event channel closed");
    }

    /// Owner and token of the last recorded call to `member`.
    pub(crate) fn last_call(&self, member: &str) -> Option<(ContextId, CallToken)> {
        self.calls
            .borrow()
            .iter()
            .rev()
            .find(|c| c.call.member == member)
            .map(|c| (c.owner, c.token))
    }

    pub(crate) fn call_count(&self, member: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.call.member == member)
            .count()
    }

    /// Whether `token` was cancelled by the engine.
    pub(crate) fn was_cancelled(&self, token: CallToken) -> bool {
        self.cancelled.borrow().contains(&token)
    }

    /// Answers the last call to `member`.
    pub(crate) fn reply(&self, member: &str, result: Result<Args>) {
        let (owner, token) = self
            .last_call(member)
            .unwrap_or_else(|| panic!("no call to {member} recorded"));
        self.emit(BusEvent::Reply {
            owner,
            token,
            result,
        });
    }

    /// Answers the last call to `member` made for `owner`.
    pub(crate) fn reply_to(&self, owner: ContextId, member: &str, result: Result<Args>) {
        let token = self
            .calls
            .borrow()
            .iter()
            .rev()
            .find(|c| c.owner == owner && c.call.member == member)
            .map(|c| c.token)
            .unwrap_or_else(|| panic!("no call to {member} recorded for {owner}"));
        self.emit(BusEvent::Reply {
            owner,
            token,
            result,
        });
    }

    /// Every token issued for `owner`.
    pub(crate) fn tokens_of(&self, owner: ContextId) -> Vec<CallToken> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.owner == owner)
            .map(|c| c.token)
            .collect()
    }

    /// Answers the last call to `member` with a D-Bus error.
    pub(crate) fn reply_error(&self, member: &str) {
        self.reply(
            member,
            Err(ConnlineError::Transport(format!("{member} failed"))),
        );
    }

    /// Emits a signal on the last subscription to `member` made by `owner`.
    pub(crate) fn signal(&self, owner: ContextId, member: &str, args: Args) {
        let id = self
            .subscriptions
            .borrow()
            .iter()
            .rev()
            .find(|s| s.owner == owner && s.rule.member == member)
            .map(|s| s.id)
            .unwrap_or_else(|| panic!("{owner} is not subscribed to {member}"));
        self.emit(BusEvent::Signal {
            owner,
            subscription: id,
            member: member.to_string(),
            args,
        });
    }

    /// Calls a method on the object `owner` registered.
    pub(crate) fn object_call(&self, owner: ContextId, member: &str, args: Args) {
        self.emit(BusEvent::ObjectCall {
            owner,
            member: member.to_string(),
            args,
        });
    }

    pub(crate) fn body_of(&self, member: &str) -> Option<String> {
        self.calls
            .borrow()
            .iter()
            .rev()
            .find(|c| c.call.member == member)
            .map(|c| match &c.call.body {
                CallBody::Str(s) => s.clone(),
                CallBody::StrPair(a, b) => format!("{a},{b}"),
                CallBody::Bool(b) => b.to_string(),
                CallBody::SettingsAndPath(_, path) => path.as_str().to_string(),
                CallBody::Empty => String::new(),
            })
    }
}

impl Transport for MockTransport {
    fn call(&self, owner: ContextId, call: MethodCall) -> Result<CallToken> {
        if self.fail_calls.get() {
            return Err(ConnlineError::Transport("bus refused the call".into()));
        }
        let token = CallToken(self.next_id());
        self.calls.borrow_mut().push(RecordedCall { owner, token, call });
        Ok(token)
    }

    fn send(&self, call: MethodCall) -> Result<()> {
        self.sent.borrow_mut().push(call);
        Ok(())
    }

    fn cancel(&self, token: CallToken) {
        self.cancelled.borrow_mut().push(token);
    }

    fn subscribe(&self, owner: ContextId, rule: SignalRule) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_id());
        self.subscriptions
            .borrow_mut()
            .push(RecordedSubscription { owner, id, rule });
        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        self.unsubscribed.borrow_mut().push(subscription);
    }

    fn register_object(&self, owner: ContextId, path: &str) -> Result<()> {
        self.objects.borrow_mut().push((owner, path.to_string()));
        Ok(())
    }

    fn unregister_object(&self, path: &str) {
        self.unregistered.borrow_mut().push(path.to_string());
    }

    fn is_service_running(&self, name: &str) -> bool {
        self.running.borrow().contains(name)
    }

    fn shutdown(&self) {
        self.shut_down.set(true);
    }
}
