//! NetworkManager backend.
//!
//! NetworkManager has no per-client sessions, so each context watches the
//! global `StateChanged` signal and, whenever the manager reports being
//! connected, walks the device list looking for an activated, managed
//! device whose type the context accepts.

use log::{debug, warn};
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

use super::{Backend, BackendCx, BackendEvent, PendingCall, base_properties};
use crate::Result;
use crate::api::models::{BackendKind, Bearer, ContextId};
use crate::dbus::args::{Args, Dict};
use crate::dbus::{CallBody, MethodCall, SignalRule, SubscriptionId};
use crate::types::constants::{device_state, device_type, fdo, nm, nm_state, property};

/// Reply the session is waiting for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Idle,
    ManagerState,
    DeviceList,
    DeviceProperties,
    AddressData { interface: Option<String> },
}

struct Session {
    subscription: SubscriptionId,
    pending: PendingCall,
    step: Step,
    state: Option<u32>,
    devices: VecDeque<String>,
    bearer: Bearer,
}

#[derive(Default)]
pub(crate) struct NetworkManager {
    sessions: HashMap<ContextId, Session>,
}

/// Maps a `DeviceType` to a bearer.
pub(crate) fn bearer_for_device_type(kind: u32) -> Bearer {
    match kind {
        device_type::ETHERNET => Bearer::ETHERNET,
        device_type::WIFI => Bearer::WIFI,
        device_type::BLUETOOTH => Bearer::BLUETOOTH,
        device_type::WIMAX => Bearer::WIMAX,
        device_type::MODEM => Bearer::CELLULAR,
        _ => Bearer::UNKNOWN,
    }
}

fn state_name(state: u32) -> &'static str {
    match state {
        nm_state::UNKNOWN => "unknown",
        nm_state::ASLEEP => "asleep",
        nm_state::DISCONNECTED => "disconnected",
        nm_state::DISCONNECTING => "disconnecting",
        nm_state::CONNECTING => "connecting",
        nm_state::CONNECTED_LOCAL => "connected (local)",
        nm_state::CONNECTED_SITE => "connected (site)",
        nm_state::CONNECTED_GLOBAL => "connected (global)",
        _ => "invalid",
    }
}

fn is_connected(state: u32) -> bool {
    state >= nm_state::CONNECTED_LOCAL
}

/// `Ip4Address` is an `in_addr_t` in network byte order.
fn legacy_address(raw: u32) -> Option<String> {
    (raw != 0).then(|| Ipv4Addr::from(raw.to_ne_bytes()).to_string())
}

impl Session {
    fn issue(&mut self, cx: &BackendCx<'_>, step: Step, call: MethodCall) -> Result<()> {
        self.pending.issue(cx, call)?;
        self.step = step;
        Ok(())
    }

    fn cancel(&mut self, cx: &BackendCx<'_>) {
        self.pending.cancel(cx.bus);
        self.step = Step::Idle;
        self.devices.clear();
    }
}

impl NetworkManager {
    fn teardown(cx: &BackendCx<'_>, mut session: Session) {
        session.pending.cancel(cx.bus);
        cx.bus.unsubscribe(session.subscription);
    }

    fn fail(&mut self, cx: &mut BackendCx<'_>) {
        if let Some(session) = self.sessions.remove(&cx.id) {
            Self::teardown(cx, session);
        }
        cx.error();
    }

    /// Applies a manager state coming from the initial query or a signal.
    fn apply_state(cx: &mut BackendCx<'_>, session: &mut Session, state: u32) -> Result<()> {
        let previous = session.state.replace(state);
        debug!("{}: NetworkManager is {}", cx.id, state_name(state));

        if is_connected(state) {
            if previous == Some(state) {
                return Ok(());
            }
            let call = MethodCall::new(nm::SERVICE, nm::PATH, nm::INTERFACE, "GetDevices");
            return session.issue(cx, Step::DeviceList, call);
        }

        session.cancel(cx);
        session.bearer = Bearer::UNKNOWN;
        // The first answer always reports; later drops only if we were up.
        if previous.is_none() || cx.state.online {
            cx.disconnected();
        }
        Ok(())
    }

    /// Queries the next device, or reports that none matched.
    fn next_device(cx: &mut BackendCx<'_>, session: &mut Session) -> Result<()> {
        let Some(path) = session.devices.pop_front() else {
            debug!("{}: no matching device", cx.id);
            session.step = Step::Idle;
            session.bearer = Bearer::UNKNOWN;
            cx.disconnected();
            return Ok(());
        };

        let call = MethodCall::new(nm::SERVICE, path, fdo::PROPERTIES_INTERFACE, "GetAll")
            .with_body(CallBody::Str(nm::DEVICE_INTERFACE.to_string()));
        session.issue(cx, Step::DeviceProperties, call)
    }

    fn device_properties(
        cx: &mut BackendCx<'_>,
        session: &mut Session,
        props: &Dict,
    ) -> Result<()> {
        let managed = props.require::<bool>("Managed")?;
        let state = props.require::<u32>("State")?;
        let bearer = bearer_for_device_type(props.require::<u32>("DeviceType")?);

        if !managed
            || state != device_state::ACTIVATED
            || bearer == Bearer::UNKNOWN
            || !cx.state.mask.accepts(bearer)
        {
            debug!(
                "{}: skipping {bearer} device (managed: {managed}, state: {state})",
                cx.id
            );
            return Self::next_device(cx, session);
        }

        session.devices.clear();
        session.step = Step::Idle;
        session.bearer = bearer;
        cx.state.online = true;
        cx.connected();

        if !cx.wants_properties() {
            return Ok(());
        }

        let interface = props.get::<String>("IpInterface")?;
        if let Some(address) = props.get::<u32>("Ip4Address")?.and_then(legacy_address) {
            Self::deliver_properties(cx, session, interface, Some(address));
            return Ok(());
        }

        match props.get::<String>("Ip4Config")? {
            Some(config) if config != "/" => {
                let call = MethodCall::new(nm::SERVICE, config, fdo::PROPERTIES_INTERFACE, "Get")
                    .with_body(CallBody::StrPair(
                        nm::IP4_CONFIG_INTERFACE.to_string(),
                        "AddressData".to_string(),
                    ));
                session.issue(cx, Step::AddressData { interface }, call)
            }
            _ => {
                Self::deliver_properties(cx, session, interface, None);
                Ok(())
            }
        }
    }

    fn deliver_properties(
        cx: &mut BackendCx<'_>,
        session: &Session,
        interface: Option<String>,
        address: Option<String>,
    ) {
        let mut props = base_properties(session.bearer);
        if let Some(interface) = interface {
            props.insert(property::INTERFACE, interface);
        }
        if let Some(address) = address {
            props.insert(property::ADDRESS, address);
        }
        cx.properties(props);
    }

    fn on_reply(cx: &mut BackendCx<'_>, session: &mut Session, args: Args) -> Result<()> {
        match std::mem::replace(&mut session.step, Step::Idle) {
            Step::ManagerState => Self::apply_state(cx, session, args.get(0)?),
            Step::DeviceList => {
                session.devices = args.get::<Vec<String>>(0)?.into();
                debug!("{}: checking {} devices", cx.id, session.devices.len());
                Self::next_device(cx, session)
            }
            Step::DeviceProperties => Self::device_properties(cx, session, &args.dict(0)?),
            Step::AddressData { interface } => {
                let entries = args.get::<Vec<Dict>>(0)?;
                let address = match entries.first() {
                    Some(entry) => entry.get::<String>("address")?,
                    None => None,
                };
                Self::deliver_properties(cx, session, interface, address);
                Ok(())
            }
            Step::Idle => Ok(()),
        }
    }
}

impl Backend for NetworkManager {
    fn kind(&self) -> BackendKind {
        BackendKind::NetworkManager
    }

    fn open(&mut self, cx: &mut BackendCx<'_>) -> Result<()> {
        if self.sessions.contains_key(&cx.id) {
            return Ok(());
        }

        let subscription = cx.bus.subscribe(
            cx.id,
            SignalRule {
                path: nm::PATH,
                interface: nm::INTERFACE,
                member: "StateChanged",
            },
        )?;
        let mut session = Session {
            subscription,
            pending: PendingCall::default(),
            step: Step::Idle,
            state: None,
            devices: VecDeque::new(),
            bearer: Bearer::UNKNOWN,
        };

        let call = MethodCall::new(nm::SERVICE, nm::PATH, nm::INTERFACE, "state");
        if let Err(e) = session.issue(cx, Step::ManagerState, call) {
            cx.bus.unsubscribe(subscription);
            return Err(e);
        }
        self.sessions.insert(cx.id, session);
        Ok(())
    }

    fn close(&mut self, cx: &mut BackendCx<'_>) {
        if let Some(session) = self.sessions.remove(&cx.id) {
            Self::teardown(cx, session);
        }
    }

    fn bearer(&self, context: ContextId) -> Bearer {
        self.sessions
            .get(&context)
            .map_or(Bearer::UNKNOWN, |s| s.bearer)
    }

    fn handle(&mut self, cx: &mut BackendCx<'_>, event: BackendEvent) {
        let Some(session) = self.sessions.get_mut(&cx.id) else {
            return;
        };

        let outcome = match event {
            BackendEvent::Reply { token, result } => {
                if !session.pending.complete(token) {
                    return;
                }
                result.and_then(|args| Self::on_reply(cx, session, args))
            }
            BackendEvent::Signal { member, args } if member == "StateChanged" => args
                .get::<u32>(0)
                .and_then(|state| Self::apply_state(cx, session, state)),
            BackendEvent::Signal { member, .. } | BackendEvent::ObjectCall { member, .. } => {
                debug!("{}: ignoring {member}", cx.id);
                Ok(())
            }
            BackendEvent::ChannelLost => Err(crate::ConnlineError::Transport(
                "StateChanged subscription lost".into(),
            )),
        };

        if let Err(e) = outcome {
            warn!("{}: NetworkManager conversation failed: {e}", cx.id);
            self.fail(cx);
        }
    }
}
