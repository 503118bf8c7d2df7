//! Keyed store of every controller seen since startup.
//!
//! A single `RwLock` guards the whole map. `upsert` and command writes take
//! the write lock; every snapshot handed to the publisher is built while the
//! lock is held so a message never mixes two payloads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::device::{Controller, Report};
use crate::discovery;
use crate::protocol::{self, MacAddress, PayloadError, StatusPayload};
use crate::valve::ValveCommand;

#[derive(Clone, Default)]
pub(crate) struct Registry {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    controllers: HashMap<String, Controller>,
    next_generation: u64,
}

/// Result of [`Registry::upsert`].
#[derive(Debug)]
pub(crate) struct Upserted {
    /// First payload from this controller.
    pub(crate) is_new: bool,
    /// Snapshot taken in the same critical section as the update.
    pub(crate) report: Report,
    /// Log line for the same snapshot.
    pub(crate) summary: String,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Decode `payload` and create or update its controller. Decoding happens
    /// before the lock is taken; on error nothing is touched.
    pub(crate) async fn upsert(&self, payload: &StatusPayload) -> Result<Upserted, PayloadError> {
        let mac: MacAddress = payload.mac_address.parse()?;
        let decoded = protocol::decode(payload)?;
        let identifier = mac.identifier();

        let mut inner = self.inner.write().await;
        if let Some(ctl) = inner.controllers.get_mut(&identifier) {
            ctl.apply(decoded);
            return Ok(Upserted {
                is_new: false,
                report: ctl.report(),
                summary: ctl.summary(),
            });
        }

        let ctl = Controller::new(mac, decoded);
        let upserted = Upserted {
            is_new: true,
            report: ctl.report(),
            summary: ctl.summary(),
        };
        inner.controllers.insert(identifier, ctl);
        Ok(upserted)
    }

    /// Record an operator command. Returns the command's generation, or
    /// `None` when the controller is unknown.
    pub(crate) async fn set_command(&self, identifier: &str, command: ValveCommand) -> Option<u64> {
        let mut inner = self.inner.write().await;
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let ctl = inner.controllers.get_mut(identifier)?;
        ctl.set_pending(command, generation);
        Some(generation)
    }

    /// Clear the pending command a finished report cycle reflected. A command
    /// that arrived after the snapshot has a newer generation and is kept.
    pub(crate) async fn complete_cycle(&self, identifier: &str, generation: Option<u64>) -> bool {
        let Some(generation) = generation else {
            return false;
        };
        let mut inner = self.inner.write().await;
        inner
            .controllers
            .get_mut(identifier)
            .is_some_and(|ctl| ctl.clear_pending_if(generation))
    }

    /// Check the discovery cadence and record `now` in one step. Only one
    /// of several concurrent cycles for a controller gets `true`.
    pub(crate) async fn claim_discovery(
        &self,
        identifier: &str,
        now: OffsetDateTime,
        interval: Duration,
    ) -> bool {
        let mut inner = self.inner.write().await;
        match inner.controllers.get_mut(identifier) {
            Some(ctl) if discovery::discovery_due(ctl.last_discovery(), now, interval) => {
                ctl.set_last_discovery(now);
                true
            }
            _ => false,
        }
    }

    /// Current state of one controller.
    pub(crate) async fn report(&self, identifier: &str) -> Option<Report> {
        let inner = self.inner.read().await;
        inner.controllers.get(identifier).map(Controller::report)
    }

    /// Current state of every controller, ordered by identifier.
    pub(crate) async fn reports(&self) -> Vec<Report> {
        let inner = self.inner.read().await;
        let mut reports: Vec<Report> = inner.controllers.values().map(Controller::report).collect();
        reports.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        reports
    }

    pub(crate) async fn identifiers(&self) -> Vec<String> {
        let inner = self.inner.read().await;
        let mut ids: Vec<String> = inner.controllers.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[cfg(test)]
    async fn controller(&self, identifier: &str) -> Option<Controller> {
        let inner = self.inner.read().await;
        inner.controllers.get(identifier).cloned()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
