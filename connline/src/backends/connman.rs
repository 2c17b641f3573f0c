//! ConnMan session backend.
//!
//! Each context gets its own ConnMan session. The client exports a
//! notification object, asks the manager to create a session bound to it,
//! and from then on ConnMan pushes `Update` calls whenever the session's
//! settings change.

use log::{debug, warn};
use std::collections::HashMap;
use zvariant::{OwnedObjectPath, Value};

use super::{Backend, BackendCx, BackendEvent, PendingCall, base_properties};
use crate::Result;
use crate::api::models::{BackendKind, Bearer, ContextId};
use crate::dbus::args::{Args, Dict};
use crate::dbus::{CallBody, MethodCall};
use crate::types::constants::{connman, property};
use crate::util::naming::unique_session_name;

struct Session {
    notifier: String,
    path: Option<String>,
    pending: PendingCall,
    bearer: Bearer,
}

#[derive(Default)]
pub(crate) struct ConnMan {
    sessions: HashMap<ContextId, Session>,
}

/// `AllowedBearers` value for `mask`.
fn allowed_bearers(mask: Bearer) -> Vec<String> {
    if mask.contains(Bearer::ANY) {
        return vec![Bearer::ANY.as_str().to_string()];
    }
    Bearer::NAMED
        .iter()
        .filter(|(bearer, _)| mask.contains(*bearer))
        .map(|(_, name)| name.to_string())
        .collect()
}

fn connect_call(path: &str) -> MethodCall {
    MethodCall::new(
        connman::SERVICE,
        path,
        connman::SESSION_INTERFACE,
        "Connect",
    )
}

impl ConnMan {
    fn create_session(cx: &BackendCx<'_>, session: &mut Session) -> Result<()> {
        let mut settings: HashMap<String, Value<'static>> = HashMap::new();
        settings.insert(
            "AllowedBearers".to_string(),
            Value::from(allowed_bearers(cx.state.mask)),
        );
        let notifier = OwnedObjectPath::try_from(session.notifier.clone())?;

        let call = MethodCall::new(
            connman::SERVICE,
            connman::MANAGER_PATH,
            connman::MANAGER_INTERFACE,
            "CreateSession",
        )
        .with_body(CallBody::SettingsAndPath(settings, notifier));
        session.pending.issue(cx, call)
    }

    /// Releases everything `session` holds on the bus.
    fn teardown(cx: &BackendCx<'_>, mut session: Session, destroy: bool) {
        session.pending.cancel(cx.bus);
        if destroy && let Some(path) = &session.path {
            let call = MethodCall::new(
                connman::SERVICE,
                path.as_str(),
                connman::SESSION_INTERFACE,
                "Destroy",
            );
            if let Err(e) = cx.bus.send(call) {
                debug!("{}: could not destroy session {path}: {e}", cx.id);
            }
        }
        cx.bus.unregister_object(&session.notifier);
    }

    fn fail(&mut self, cx: &mut BackendCx<'_>, destroy: bool) {
        if let Some(session) = self.sessions.remove(&cx.id) {
            Self::teardown(cx, session, destroy);
        }
        cx.error();
    }

    fn session_created(&mut self, cx: &mut BackendCx<'_>, result: Result<Args>) {
        let path = result.and_then(|args| args.get::<String>(0));
        let Some(session) = self.sessions.get_mut(&cx.id) else {
            return;
        };

        match path {
            Ok(path) => {
                debug!("{}: session created at {path}", cx.id);
                let connect = (!cx.state.background).then(|| connect_call(&path));
                session.path = Some(path);
                if let Some(call) = connect
                    && let Err(e) = cx.bus.send(call)
                {
                    warn!("{}: connect request failed: {e}", cx.id);
                    self.fail(cx, true);
                }
            }
            Err(e) => {
                warn!("{}: CreateSession failed: {e}", cx.id);
                self.fail(cx, false);
            }
        }
    }

    fn update(&mut self, cx: &mut BackendCx<'_>, settings: &Dict) -> Result<()> {
        let Some(session) = self.sessions.get_mut(&cx.id) else {
            return Ok(());
        };
        if settings.is_empty() {
            return Ok(());
        }

        if let Some(bearer) = settings.get::<String>("Bearer")? {
            session.bearer = Bearer::parse_name(&bearer);
        }
        let interface = settings.get::<String>("Interface")?;
        let ipv4 = address_of(settings, "IPv4")?;
        let ipv6 = address_of(settings, "IPv6")?;

        if let Some(state) = settings.get::<String>("State")? {
            debug!("{}: session state {state}", cx.id);
            if state == connman::STATE_CONNECTED || state == connman::STATE_ONLINE {
                cx.state.online = state == connman::STATE_ONLINE;
                cx.connected();
            } else {
                session.bearer = Bearer::UNKNOWN;
                cx.disconnected();
            }
        }

        if cx.wants_properties() {
            let mut props = base_properties(session.bearer);
            if let Some(interface) = interface {
                props.insert(property::INTERFACE, interface);
            }
            for address in [ipv4, ipv6].into_iter().flatten() {
                props.insert(property::ADDRESS, address);
            }
            cx.properties(props);
        }
        Ok(())
    }
}

/// `Address` entry of the nested `IPv4`/`IPv6` dictionary.
fn address_of(settings: &Dict, family: &str) -> Result<Option<String>> {
    match settings.dict(family)? {
        Some(ip) => ip.get::<String>("Address"),
        None => Ok(None),
    }
}

impl Backend for ConnMan {
    fn kind(&self) -> BackendKind {
        BackendKind::ConnMan
    }

    fn open(&mut self, cx: &mut BackendCx<'_>) -> Result<()> {
        if let Some(session) = self.sessions.get(&cx.id) {
            if !cx.state.background
                && let Some(path) = &session.path
            {
                cx.bus.send(connect_call(path))?;
            }
            return Ok(());
        }

        let notifier = format!("/{}", unique_session_name());
        cx.bus.register_object(cx.id, &notifier)?;

        let mut session = Session {
            notifier,
            path: None,
            pending: PendingCall::default(),
            bearer: Bearer::UNKNOWN,
        };
        if let Err(e) = Self::create_session(cx, &mut session) {
            cx.bus.unregister_object(&session.notifier);
            return Err(e);
        }
        debug!("{}: creating session for {}", cx.id, session.notifier);
        self.sessions.insert(cx.id, session);
        Ok(())
    }

    fn close(&mut self, cx: &mut BackendCx<'_>) {
        if let Some(session) = self.sessions.remove(&cx.id) {
            Self::teardown(cx, session, true);
        }
    }

    fn bearer(&self, context: ContextId) -> Bearer {
        self.sessions
            .get(&context)
            .map_or(Bearer::UNKNOWN, |s| s.bearer)
    }

    fn handle(&mut self, cx: &mut BackendCx<'_>, event: BackendEvent) {
        match event {
            BackendEvent::Reply { token, result } => {
                let Some(session) = self.sessions.get_mut(&cx.id) else {
                    return;
                };
                if session.pending.complete(token) {
                    self.session_created(cx, result);
                }
            }
            BackendEvent::ObjectCall { member, args } => match member.as_str() {
                "Release" => {
                    debug!("{}: session released by ConnMan", cx.id);
                    self.fail(cx, false);
                }
                "Update" => {
                    let updated = args.dict(0).and_then(|settings| self.update(cx, &settings));
                    if let Err(e) = updated {
                        warn!("{}: bad session update: {e}", cx.id);
                        self.fail(cx, true);
                    }
                }
                other => debug!("{}: ignoring notifier call {other}", cx.id),
            },
            BackendEvent::ChannelLost => {
                warn!("{}: notification channel lost", cx.id);
                self.fail(cx, true);
            }
            BackendEvent::Signal { member, .. } => {
                debug!("{}: unexpected signal {member}", cx.id);
            }
        }
    }
}
