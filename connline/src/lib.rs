//! A single "are we connected, and how" signal for Linux applications.
//!
//! This crate talks to whichever connectivity manager is running on the
//! system bus, ConnMan, NetworkManager or Wicd, and reports the state of
//! network access through callbacks delivered on the host's event loop:
//!
//! - Opening *contexts*, each watching a set of bearers (Wi-Fi, Ethernet, ...)
//! - Connected / disconnected notifications, plus connection properties
//!   such as the interface name and addresses
//! - Transparent failover when the manager stops or a different one starts
//!
//! # Example
//!
//! ```no_run
//! use connline::{Bearer, Config, Connline, Event, EventLoop};
//!
//! # fn example() -> connline::Result<()> {
//! let config = Config::default().with_event_loop(EventLoop::Manual);
//! let conn = futures::executor::block_on(Connline::init(config))?;
//!
//! conn.open(Bearer::ANY, false, |conn, id, event| match event {
//!     Event::Connected => println!("connected via {}", conn.bearer(id)),
//!     Event::Disconnected => println!("disconnected"),
//!     Event::NoBackend => println!("waiting for a connectivity manager"),
//!     Event::Error => conn.close(id),
//!     Event::Property(_) => {}
//! })?;
//!
//! loop {
//!     conn.iterate();
//!     std::thread::sleep(std::time::Duration::from_millis(50));
//! }
//! # }
//! ```
//!
//! # Event loops
//!
//! Callbacks never run from inside the call that caused them. They are
//! deferred to a later iteration of the loop chosen with
//! [`Config::event_loop`]: a Tokio `LocalSet`, the GLib main context (with
//! the `glib` feature), or a loop the host drives itself through
//! [`Connline::iterate`].
//!
//! # Error Handling
//!
//! Setup operations return `Result<T, ConnlineError>`. Failures after setup
//! reach the context as [`Event::Error`] (the context should be closed) or
//! [`Event::NoBackend`] (the context is reopened once a manager appears).
//!
//! # Logging
//!
//! This crate uses the [`log`](https://docs.rs/log) facade for logging. To see
//! log output, add a logging implementation like `env_logger`.

pub mod api;
mod backends;
mod core;
mod dbus;
mod reactor;
pub mod types;
mod util;

pub use api::connline::Connline;
pub use api::models::{
    BackendKind, Bearer, BusType, Config, ConnlineError, ContextId, Event, EventLoop,
};
pub use types::properties::PropertyList;

/// A specialized `Result` type for connline operations.
pub type Result<T> = std::result::Result<T, ConnlineError>;
