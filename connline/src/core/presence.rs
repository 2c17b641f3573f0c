//! Failover driven by manager services appearing and vanishing on the bus.

use log::{debug, info, warn};

use super::context::ContextManager;
use crate::backends;

impl ContextManager {
    /// Activates the first candidate whose service is running.
    ///
    /// Every tracked context is reopened on the new backend. When no
    /// candidate is running, every context is told so instead.
    pub(crate) fn select_backend(&mut self) -> bool {
        let running = self
            .candidates
            .iter()
            .copied()
            .find(|kind| self.bus.is_service_running(kind.service()));

        match running {
            Some(kind) => {
                info!("Using {kind} backend");
                self.active = Some(backends::create(kind));
                self.reconnect_all();
                true
            }
            None => {
                debug!("No connectivity manager is running");
                self.invalidate_all();
                false
            }
        }
    }

    /// Reacts to `name` gaining (`running`) or losing its bus owner.
    pub(crate) fn service_changed(&mut self, name: &str, running: bool) {
        let active = self.active.as_ref().map(|b| b.kind());

        match (active, running) {
            (None, true) => {
                debug!("{name} appeared, selecting a backend");
                self.select_backend();
            }
            (Some(kind), false) if kind.service() == name => {
                warn!("{kind} vanished from the bus");
                self.disconnect_all();
                self.active = None;
            }
            _ => debug!("Ignoring presence change of {name} (running: {running})"),
        }
    }
}
