use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::constants::{connman, nm, wicd};
use crate::types::properties::PropertyList;

bitflags! {
    /// Network bearer technologies.
    ///
    /// Used both as the set of bearers a context accepts (its mask) and as the
    /// single bearer a context is currently connected through. `UNKNOWN`
    /// doubles as "any": a mask containing it accepts every bearer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Bearer: u32 {
        const UNKNOWN = 1 << 0;
        const ETHERNET = 1 << 1;
        const WIFI = 1 << 2;
        const CELLULAR = 1 << 3;
        const WIMAX = 1 << 4;
        const BLUETOOTH = 1 << 5;
        const USB = 1 << 6;
    }
}

impl Bearer {
    /// Alias of [`Bearer::UNKNOWN`] when used as a mask.
    pub const ANY: Bearer = Bearer::UNKNOWN;

    /// Bearers carrying a name, in bit order.
    pub(crate) const NAMED: [(Bearer, &'static str); 6] = [
        (Bearer::ETHERNET, "ethernet"),
        (Bearer::WIFI, "wifi"),
        (Bearer::CELLULAR, "cellular"),
        (Bearer::WIMAX, "wimax"),
        (Bearer::BLUETOOTH, "bluetooth"),
        (Bearer::USB, "usb"),
    ];

    /// Returns the textual name of a single bearer.
    ///
    /// Anything that is not exactly one named bearer renders as `*`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        Self::NAMED
            .iter()
            .find(|(bearer, _)| *bearer == self)
            .map_or("*", |(_, name)| name)
    }

    /// Parses a bearer name. Unmapped names yield [`Bearer::UNKNOWN`].
    #[must_use]
    pub fn parse_name(name: &str) -> Bearer {
        Self::NAMED
            .iter()
            .find(|(_, n)| *n == name)
            .map_or(Bearer::UNKNOWN, |(bearer, _)| *bearer)
    }

    /// Whether a context using `self` as its mask accepts `bearer`.
    #[must_use]
    pub fn accepts(self, bearer: Bearer) -> bool {
        self.contains(Bearer::ANY) || self.intersects(bearer)
    }

    /// Builds a mask from raw bits, rejecting empty masks and unknown bits.
    pub fn mask_from_bits(bits: u32) -> Result<Bearer, ConnlineError> {
        match Bearer::from_bits(bits) {
            Some(mask) if !mask.is_empty() => Ok(mask),
            _ => Err(ConnlineError::InvalidArgument(format!(
                "invalid bearer mask {bits:#x}"
            ))),
        }
    }
}

impl Default for Bearer {
    fn default() -> Self {
        Bearer::UNKNOWN
    }
}

impl fmt::Display for Bearer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies an open context within a [`Connline`](crate::Connline) engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub(crate) u64);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Events delivered to context callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The context hit an IPC failure and its session was torn down.
    ///
    /// The context should be closed; it receives nothing further.
    Error,
    /// No supported connectivity manager is running.
    ///
    /// The context stays open and is reconnected once a manager appears.
    NoBackend,
    /// No connection matching the context's bearer mask is available.
    Disconnected,
    /// A connection matching the context's bearer mask is available.
    Connected,
    /// Connection details. Only delivered to the property callback.
    Property(PropertyList),
}

/// Event loop the engine delivers callbacks on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLoop {
    /// A Tokio `LocalSet`. `init` and every call must run inside one.
    #[default]
    Tokio,
    /// The default GLib main context. Requires the `glib` feature.
    Glib,
    /// Driven by the host through [`Connline::iterate`](crate::Connline::iterate).
    Manual,
}

/// Message bus to connect to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusType {
    #[default]
    System,
    Session,
}

/// Supported connectivity managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    ConnMan,
    NetworkManager,
    Wicd,
}

impl BackendKind {
    /// Well-known bus name of the manager service.
    #[must_use]
    pub fn service(self) -> &'static str {
        match self {
            BackendKind::ConnMan => connman::SERVICE,
            BackendKind::NetworkManager => nm::SERVICE,
            BackendKind::Wicd => wicd::SERVICE,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::ConnMan => "ConnMan",
            BackendKind::NetworkManager => "NetworkManager",
            BackendKind::Wicd => "Wicd",
        };
        write!(f, "{name}")
    }
}

/// Engine configuration.
///
/// # Example
///
/// ```rust
/// use connline::{BackendKind, Config, EventLoop};
///
/// let config = Config::default()
///     .with_event_loop(EventLoop::Manual)
///     .with_backends(vec![BackendKind::NetworkManager, BackendKind::ConnMan]);
///
/// assert_eq!(config.backends[0], BackendKind::NetworkManager);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub event_loop: EventLoop,
    pub bus: BusType,
    /// Candidate managers, tried in this order.
    pub backends: Vec<BackendKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_loop: EventLoop::default(),
            bus: BusType::default(),
            backends: vec![
                BackendKind::ConnMan,
                BackendKind::NetworkManager,
                BackendKind::Wicd,
            ],
        }
    }
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_event_loop(mut self, event_loop: EventLoop) -> Self {
        self.event_loop = event_loop;
        self
    }

    #[must_use]
    pub fn with_bus(mut self, bus: BusType) -> Self {
        self.bus = bus;
        self
    }

    #[must_use]
    pub fn with_backends(mut self, backends: Vec<BackendKind>) -> Self {
        self.backends = backends;
        self
    }
}

/// Errors returned by setup operations and carried by failed IPC replies.
#[derive(Debug, Error)]
pub enum ConnlineError {
    /// A D-Bus communication error occurred.
    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    /// A D-Bus value could not be converted.
    #[error("D-Bus value error: {0}")]
    Zvariant(#[from] zvariant::Error),

    /// An argument passed to the API was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine has been cleaned up.
    #[error("connline is not initialized")]
    NotInitialized,

    /// No connectivity manager is currently running.
    #[error("no connectivity manager is running")]
    NoBackend,

    /// The context id does not belong to an open context.
    #[error("unknown context {0}")]
    UnknownContext(ContextId),

    /// A manager reply or signal did not have the expected shape.
    #[error("malformed reply: {0}")]
    MalformedReply(String),

    /// The IPC transport refused or lost the request.
    #[error("transport failure: {0}")]
    Transport(String),

    /// No backend is registered at all.
    #[error("no connectivity backend is registered")]
    DefectiveInstall,

    /// The requested event loop is not compiled in.
    #[error("event loop {0:?} is not supported by this build")]
    UnsupportedEventLoop(EventLoop),

    /// The requested event loop is compiled in but not running here.
    #[error("no {0:?} event loop is running on this thread")]
    EventLoopUnavailable(EventLoop),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_names_round_trip() {
        for (bearer, name) in Bearer::NAMED {
            assert_eq!(bearer.as_str(), name);
            assert_eq!(Bearer::parse_name(name), bearer);
        }
    }

    #[test]
    fn unmapped_names_are_unknown() {
        assert_eq!(Bearer::parse_name("gadget"), Bearer::UNKNOWN);
        assert_eq!(Bearer::parse_name(""), Bearer::UNKNOWN);
        assert_eq!(Bearer::UNKNOWN.as_str(), "*");
        assert_eq!((Bearer::WIFI | Bearer::ETHERNET).as_str(), "*");
    }

    #[test]
    fn any_mask_accepts_everything() {
        assert!(Bearer::ANY.accepts(Bearer::WIFI));
        assert!(Bearer::ANY.accepts(Bearer::UNKNOWN));
        assert!((Bearer::ANY | Bearer::WIFI).accepts(Bearer::USB));
    }

    #[test]
    fn specific_mask_accepts_members_only() {
        let mask = Bearer::WIFI | Bearer::CELLULAR;
        assert!(mask.accepts(Bearer::WIFI));
        assert!(mask.accepts(Bearer::CELLULAR));
        assert!(!mask.accepts(Bearer::ETHERNET));
        assert!(!mask.accepts(Bearer::UNKNOWN));
    }

    #[test]
    fn mask_validation() {
        assert!(Bearer::mask_from_bits(0).is_err());
        assert!(Bearer::mask_from_bits(1 << 9).is_err());
        assert_eq!(Bearer::mask_from_bits(0b110).ok(), Some(Bearer::ETHERNET | Bearer::WIFI));
    }

    #[test]
    fn default_config_tries_all_managers() {
        let config = Config::default();
        assert_eq!(config.event_loop, EventLoop::Tokio);
        assert_eq!(config.bus, BusType::System);
        assert_eq!(
            config.backends,
            vec![
                BackendKind::ConnMan,
                BackendKind::NetworkManager,
                BackendKind::Wicd
            ]
        );
    }

    #[test]
    fn error_display() {
        assert_eq!(
            ConnlineError::NoBackend.to_string(),
            "no connectivity manager is running"
        );
        assert_eq!(
            ConnlineError::UnknownContext(ContextId(3)).to_string(),
            "unknown context ctx#3"
        );
    }
}
