//! Exported notification object for ConnMan sessions.
//!
//! ConnMan reports session changes by calling back into an object the
//! client exports. Calls are forwarded untouched to the engine as
//! [`BusEvent::ObjectCall`]s.

use futures::channel::mpsc::UnboundedSender;
use log::{debug, warn};
use std::collections::HashMap;
use zbus::interface;
use zvariant::{OwnedValue, Value};

use super::BusEvent;
use super::args::Args;
use crate::api::models::ContextId;

pub(crate) struct Notifier {
    pub(crate) owner: ContextId,
    pub(crate) events: UnboundedSender<BusEvent>,
}

impl Notifier {
    fn forward(&self, member: &str, args: Args) {
        let event = BusEvent::ObjectCall {
            owner: self.owner,
            member: member.to_string(),
            args,
        };
        if self.events.unbounded_send(event).is_err() {
            debug!("Dropping {member} for {}: engine is gone", self.owner);
        }
    }
}

#[interface(name = "net.connman.Notification")]
impl Notifier {
    fn release(&self) {
        self.forward("Release", Args::default());
    }

    fn update(&self, settings: HashMap<String, OwnedValue>) {
        match OwnedValue::try_from(Value::from(settings)) {
            Ok(dict) => self.forward("Update", Args::new(vec![dict])),
            Err(e) => warn!("Unusable session update for {}: {e}", self.owner),
        }
    }
}
