//! Wicd backend.
//!
//! Wicd exposes one global connection status, `(state, info)`, where `info`
//! starts with the current IP address. Contexts query it once, then follow
//! `StatusChanged` and only report actual transitions.

use log::{debug, warn};
use std::collections::HashMap;

use super::{Backend, BackendCx, BackendEvent, PendingCall, base_properties};
use crate::Result;
use crate::api::models::{BackendKind, Bearer, ConnlineError, ContextId};
use crate::dbus::args::Args;
use crate::dbus::{CallBody, MethodCall, SignalRule, SubscriptionId};
use crate::types::constants::{property, wicd, wicd_state};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Status,
    Interface,
    AutoConnect,
}

struct Session {
    pending: PendingCall,
    step: Option<Step>,
    subscription: SubscriptionId,
    /// Set once a first status, queried or signalled, has been applied.
    settled: bool,
    ip: Option<String>,
    bearer: Bearer,
}

#[derive(Default)]
pub(crate) struct Wicd {
    sessions: HashMap<ContextId, Session>,
}

/// Bearer of a connected Wicd state, `None` when not connected.
pub(crate) fn bearer_for_state(state: u32) -> Option<Bearer> {
    match state {
        wicd_state::WIRELESS => Some(Bearer::WIFI),
        wicd_state::WIRED => Some(Bearer::ETHERNET),
        _ => None,
    }
}

fn state_name(state: u32) -> &'static str {
    match state {
        wicd_state::NOT_CONNECTED => "not connected",
        wicd_state::CONNECTING => "connecting",
        wicd_state::WIRELESS => "wireless",
        wicd_state::WIRED => "wired",
        wicd_state::SUSPENDED => "suspended",
        _ => "invalid",
    }
}

fn daemon_call(member: &'static str) -> MethodCall {
    MethodCall::new(wicd::SERVICE, wicd::PATH, wicd::INTERFACE, member)
}

impl Session {
    fn issue(&mut self, cx: &BackendCx<'_>, step: Step, call: MethodCall) -> Result<()> {
        self.pending.issue(cx, call)?;
        self.step = Some(step);
        Ok(())
    }

    fn cancel(&mut self, cx: &BackendCx<'_>) {
        self.pending.cancel(cx.bus);
        self.step = None;
    }

    fn auto_connect(&mut self, cx: &BackendCx<'_>) -> Result<()> {
        let call = daemon_call("AutoConnect").with_body(CallBody::Bool(true));
        self.issue(cx, Step::AutoConnect, call)
    }
}

impl Wicd {
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

    /// Reads `(state, info)` from a reply or a signal.
    fn status(args: Args) -> Result<(u32, Vec<String>)> {
        let args = args.untuple()?;
        Ok((args.get(0)?, args.get(1)?))
    }

    /// Applies a status. `initial` is set for the answer to the first query.
    fn apply_status(
        cx: &mut BackendCx<'_>,
        session: &mut Session,
        state: u32,
        info: Vec<String>,
        initial: bool,
    ) -> Result<()> {
        debug!("{}: Wicd is {}", cx.id, state_name(state));
        session.settled = true;

        match bearer_for_state(state) {
            Some(bearer) if cx.state.mask.accepts(bearer) => {
                if cx.state.online && session.bearer == bearer {
                    return Ok(());
                }
                let ip = info.into_iter().next().ok_or_else(|| {
                    ConnlineError::MalformedReply("connection status without IP".into())
                })?;

                cx.state.online = true;
                session.bearer = bearer;
                session.ip = Some(ip);
                cx.connected();

                if cx.wants_properties() {
                    let member = if bearer == Bearer::WIFI {
                        "GetWirelessInterface"
                    } else {
                        "GetWiredInterface"
                    };
                    session.issue(cx, Step::Interface, daemon_call(member))?;
                }
                Ok(())
            }
            None if initial && !cx.state.background => session.auto_connect(cx),
            _ => {
                if initial || cx.state.online {
                    // An interface lookup for the lost connection is moot.
                    session.cancel(cx);
                    session.ip = None;
                    session.bearer = Bearer::UNKNOWN;
                    cx.disconnected();
                }
                Ok(())
            }
        }
    }

    fn on_reply(
        cx: &mut BackendCx<'_>,
        session: &mut Session,
        step: Step,
        result: Result<Args>,
    ) -> Result<()> {
        match step {
            Step::Status => {
                let (state, info) = Self::status(result?)?;
                Self::apply_status(cx, session, state, info, true)
            }
            Step::Interface => {
                let interface = result?.get::<String>(0)?;
                let mut props = base_properties(session.bearer);
                props.insert(property::INTERFACE, interface);
                if let Some(ip) = &session.ip {
                    props.insert(property::ADDRESS, ip.as_str());
                }
                cx.properties(props);
                Ok(())
            }
            Step::AutoConnect => {
                match result {
                    Ok(_) => debug!("{}: Wicd auto-connect requested", cx.id),
                    Err(e) => debug!("{}: Wicd auto-connect failed: {e}", cx.id),
                }
                Ok(())
            }
        }
    }
}

impl Backend for Wicd {
    fn kind(&self) -> BackendKind {
        BackendKind::Wicd
    }

    fn open(&mut self, cx: &mut BackendCx<'_>) -> Result<()> {
        if let Some(session) = self.sessions.get_mut(&cx.id) {
            let settled = session.settled && !session.pending.is_pending();
            if settled && !cx.state.background && !cx.state.online {
                session.auto_connect(cx)?;
            }
            return Ok(());
        }

        let rule = SignalRule {
            path: wicd::PATH,
            interface: wicd::INTERFACE,
            member: "StatusChanged",
        };
        let subscription = cx.bus.subscribe(cx.id, rule)?;
        let mut session = Session {
            pending: PendingCall::default(),
            step: None,
            subscription,
            settled: false,
            ip: None,
            bearer: Bearer::UNKNOWN,
        };
        if let Err(e) = session.issue(cx, Step::Status, daemon_call("GetConnectionStatus")) {
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
                let Some(step) = session.step.take() else {
                    return;
                };
                Self::on_reply(cx, session, step, result)
            }
            BackendEvent::Signal { member, args } if member == "StatusChanged" => {
                // A change racing the first query supersedes its answer.
                let initial = session.step == Some(Step::Status);
                if initial {
                    session.cancel(cx);
                }
                Self::status(args).and_then(|(state, info)| {
                    Self::apply_status(cx, session, state, info, initial)
                })
            }
            BackendEvent::Signal { member, .. } | BackendEvent::ObjectCall { member, .. } => {
                debug!("{}: ignoring {member}", cx.id);
                Ok(())
            }
            BackendEvent::ChannelLost => Err(ConnlineError::Transport(
                "StatusChanged subscription lost".into(),
            )),
        };

        if let Err(e) = outcome {
            warn!("{}: Wicd conversation failed: {e}", cx.id);
            self.fail(cx);
        }
    }
}
