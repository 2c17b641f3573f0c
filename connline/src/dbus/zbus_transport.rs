//! [`Transport`] implementation over a `zbus` connection.
//!
//! Every request runs as a local task on the host reactor and reports back
//! through the engine's event channel. In-flight calls and subscriptions are
//! wrapped in abortable futures so cancelling them is immediate and their
//! results are never delivered.

use futures::StreamExt;
use futures::channel::mpsc::UnboundedSender;
use futures::future::{AbortHandle, Abortable, abortable};
use log::{debug, warn};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use zbus::fdo::DBusProxy;
use zbus::message::Type as MessageType;
use zbus::names::BusName;
use zbus::{Connection, MatchRule, MessageStream};

use super::args::Args;
use super::notifier::Notifier;
use super::{BusEvent, CallBody, CallToken, MethodCall, SignalRule, SubscriptionId, Transport};
use crate::Result;
use crate::api::models::{BusType, ContextId};
use crate::reactor::Reactor;

pub(crate) struct ZbusTransport {
    conn: Connection,
    reactor: Rc<dyn Reactor>,
    events: UnboundedSender<BusEvent>,
    pending: Rc<RefCell<HashMap<CallToken, AbortHandle>>>,
    subscriptions: RefCell<HashMap<SubscriptionId, AbortHandle>>,
    objects: RefCell<HashSet<String>>,
    running: Rc<RefCell<HashSet<String>>>,
    watches: RefCell<Vec<AbortHandle>>,
    next_token: Cell<u64>,
    next_subscription: Cell<u64>,
}

impl ZbusTransport {
    /// Connects to `bus` and starts watching the owners of `services`.
    pub(crate) async fn connect(
        bus: BusType,
        services: &[&'static str],
        reactor: Rc<dyn Reactor>,
        events: UnboundedSender<BusEvent>,
    ) -> Result<Self> {
        let conn = match bus {
            BusType::System => Connection::system().await?,
            BusType::Session => Connection::session().await?,
        };
        debug!("Connected to the {bus:?} bus");

        let transport = Self {
            conn,
            reactor,
            events,
            pending: Rc::new(RefCell::new(HashMap::new())),
            subscriptions: RefCell::new(HashMap::new()),
            objects: RefCell::new(HashSet::new()),
            running: Rc::new(RefCell::new(HashSet::new())),
            watches: RefCell::new(Vec::new()),
            next_token: Cell::new(1),
            next_subscription: Cell::new(1),
        };
        transport.watch_services(services).await?;
        Ok(transport)
    }

    /// Seeds the presence cache and follows `NameOwnerChanged` for each name.
    async fn watch_services(&self, services: &[&'static str]) -> Result<()> {
        let dbus = DBusProxy::new(&self.conn).await?;

        for &name in services {
            let bus_name = BusName::try_from(name).map_err(zbus::Error::from)?;
            if dbus
                .name_has_owner(bus_name)
                .await
                .map_err(zbus::Error::from)?
            {
                debug!("{name} is running");
                self.running.borrow_mut().insert(name.to_string());
            }

            let mut changes = dbus
                .receive_name_owner_changed_with_args(&[(0, name)])
                .await?;
            let running = Rc::clone(&self.running);
            let events = self.events.clone();

            let (task, handle) = abortable(async move {
                while let Some(signal) = changes.next().await {
                    let Ok(args) = signal.args() else {
                        warn!("Ignoring malformed NameOwnerChanged for {name}");
                        continue;
                    };
                    let now_running = args.new_owner().is_some();
                    debug!("{name} running: {now_running}");

                    if now_running {
                        running.borrow_mut().insert(name.to_string());
                    } else {
                        running.borrow_mut().remove(name);
                    }

                    let event = BusEvent::ServiceChanged {
                        name: name.to_string(),
                        running: now_running,
                    };
                    if events.unbounded_send(event).is_err() {
                        break;
                    }
                }
            });
            self.reactor.spawn(Box::pin(async move {
                let _ = task.await;
            }));
            self.watches.borrow_mut().push(handle);
        }

        Ok(())
    }

    fn next_token(&self) -> CallToken {
        let token = CallToken(self.next_token.get());
        self.next_token.set(token.0 + 1);
        token
    }
}

async fn invoke(conn: &Connection, call: MethodCall) -> Result<Args> {
    let MethodCall {
        destination,
        path,
        interface,
        member,
        body,
    } = call;
    let path = path.as_str();

    let reply = match body {
        CallBody::Empty => {
            conn.call_method(Some(destination), path, Some(interface), member, &())
                .await?
        }
        CallBody::Str(s) => {
            conn.call_method(Some(destination), path, Some(interface), member, &s)
                .await?
        }
        CallBody::StrPair(a, b) => {
            conn.call_method(Some(destination), path, Some(interface), member, &(a, b))
                .await?
        }
        CallBody::Bool(b) => {
            conn.call_method(Some(destination), path, Some(interface), member, &b)
                .await?
        }
        CallBody::SettingsAndPath(settings, object) => {
            conn.call_method(
                Some(destination),
                path,
                Some(interface),
                member,
                &(settings, object),
            )
            .await?
        }
    };

    Args::from_message(&reply)
}

impl Transport for ZbusTransport {
    fn call(&self, owner: ContextId, call: MethodCall) -> Result<CallToken> {
        let token = self.next_token();
        debug!(
            "{owner}: calling {}.{} on {} ({token:?})",
            call.interface, call.member, call.path
        );

        let conn = self.conn.clone();
        let events = self.events.clone();
        let pending = Rc::clone(&self.pending);
        let (request, handle) = abortable(async move { invoke(&conn, call).await });
        self.pending.borrow_mut().insert(token, handle);

        self.reactor.spawn(Box::pin(async move {
            let Ok(result) = request.await else {
                debug!("{owner}: {token:?} cancelled");
                return;
            };
            pending.borrow_mut().remove(&token);
            let event = BusEvent::Reply {
                owner,
                token,
                result,
            };
            let _ = events.unbounded_send(event);
        }));

        Ok(token)
    }

    fn send(&self, call: MethodCall) -> Result<()> {
        debug!("Sending {}.{} to {}", call.interface, call.member, call.path);
        let conn = self.conn.clone();
        self.reactor.spawn(Box::pin(async move {
            let member = call.member;
            if let Err(e) = invoke(&conn, call).await {
                debug!("{member} failed: {e}");
            }
        }));
        Ok(())
    }

    fn cancel(&self, token: CallToken) {
        if let Some(handle) = self.pending.borrow_mut().remove(&token) {
            handle.abort();
        }
    }

    fn subscribe(&self, owner: ContextId, rule: SignalRule) -> Result<SubscriptionId> {
        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);
        debug!("{owner}: subscribing to {}.{} ({id:?})", rule.interface, rule.member);

        let conn = self.conn.clone();
        let events = self.events.clone();
        let (handle, registration) = AbortHandle::new_pair();

        let stream = async move {
            let match_rule = MatchRule::builder()
                .msg_type(MessageType::Signal)
                .path(rule.path)?
                .interface(rule.interface)?
                .member(rule.member)?
                .build();
            let mut stream = MessageStream::for_match_rule(match_rule, &conn, None).await?;

            while let Some(msg) = stream.next().await {
                let msg = msg?;
                let args = Args::from_message(&msg)
                    .map_err(|e| zbus::Error::Failure(e.to_string()))?;
                let event = BusEvent::Signal {
                    owner,
                    subscription: id,
                    member: rule.member.to_string(),
                    args,
                };
                if events.unbounded_send(event).is_err() {
                    return Ok(());
                }
            }
            Err(zbus::Error::Failure("signal stream ended".into()))
        };

        let events = self.events.clone();
        self.reactor.spawn(Box::pin(async move {
            match Abortable::new(stream, registration).await {
                Ok(Err(e)) => {
                    warn!("{owner}: subscription {id:?} lost: {e}");
                    let _ = events.unbounded_send(BusEvent::SubscriptionLost {
                        owner,
                        subscription: id,
                    });
                }
                Ok(Ok(())) | Err(_) => {}
            }
        }));
        self.subscriptions.borrow_mut().insert(id, handle);

        Ok(id)
    }

    fn unsubscribe(&self, subscription: SubscriptionId) {
        if let Some(handle) = self.subscriptions.borrow_mut().remove(&subscription) {
            handle.abort();
        }
    }

    fn register_object(&self, owner: ContextId, path: &str) -> Result<()> {
        let object_path = zvariant::OwnedObjectPath::try_from(path.to_string())?;
        let notifier = Notifier {
            owner,
            events: self.events.clone(),
        };
        self.objects.borrow_mut().insert(path.to_string());

        let conn = self.conn.clone();
        let events = self.events.clone();
        self.reactor.spawn(Box::pin(async move {
            if let Err(e) = conn.object_server().at(object_path.as_str(), notifier).await {
                warn!("{owner}: could not export {}: {e}", object_path.as_str());
                let _ = events.unbounded_send(BusEvent::SubscriptionLost {
                    owner,
                    subscription: SubscriptionId(0),
                });
            }
        }));

        Ok(())
    }

    fn unregister_object(&self, path: &str) {
        if !self.objects.borrow_mut().remove(path) {
            return;
        }
        let conn = self.conn.clone();
        let path = path.to_string();
        self.reactor.spawn(Box::pin(async move {
            if let Err(e) = conn
                .object_server()
                .remove::<Notifier, _>(path.as_str())
                .await
            {
                debug!("Could not remove {path}: {e}");
            }
        }));
    }

    fn is_service_running(&self, name: &str) -> bool {
        self.running.borrow().contains(name)
    }

    fn shutdown(&self) {
        for (_, handle) in self.pending.borrow_mut().drain() {
            handle.abort();
        }
        for (_, handle) in self.subscriptions.borrow_mut().drain() {
            handle.abort();
        }
        for handle in self.watches.borrow_mut().drain(..) {
            handle.abort();
        }
        let paths: Vec<String> = self.objects.borrow().iter().cloned().collect();
        for path in paths {
            self.unregister_object(&path);
        }
        debug!("Transport shut down");
    }
}
