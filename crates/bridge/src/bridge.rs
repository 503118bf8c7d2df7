//! Publisher side of the bridge: runs report cycles against a [`Transport`]
//! and feeds operator commands into the registry.
//!
//! ## Report cycle
//!
//! ```text
//! snapshot (under registry lock)
//!   └─▶ discovery, if due ──▶ settle delay
//!         └─▶ controller availability ──▶ controller state
//!               └─▶ per configured sensor: availability ──▶ state
//!                     └─▶ clear the pending command the snapshot carried
//! ```
//!
//! Publish failures are logged and never touch registry state.

use anyhow::Result;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::device::Report;
use crate::discovery::{self, EntityConfig};
use crate::mqtt::Topics;
use crate::registry::Registry;
use crate::valve::ValveCommand;

pub(crate) const AVAILABILITY_ONLINE: &str = "online";

/// Message transport the bridge publishes through.
pub(crate) trait Transport: Send + Sync {
    fn publish(
        &self,
        topic: String,
        payload: Vec<u8>,
        retain: bool,
    ) -> impl Future<Output = Result<()>> + Send;

    fn subscribe(&self, topic: String) -> impl Future<Output = Result<()>> + Send;
}

/// Discovery cadence and the delay given to discovery consumers before the
/// first state message.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Cadence {
    pub(crate) republish: Duration,
    pub(crate) settle: Duration,
}

pub(crate) struct Bridge<T> {
    registry: Registry,
    transport: Arc<T>,
    topics: Topics,
    cadence: Cadence,
}

impl<T> Clone for Bridge<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            transport: Arc::clone(&self.transport),
            topics: self.topics.clone(),
            cadence: self.cadence,
        }
    }
}

impl<T: Transport> Bridge<T> {
    pub(crate) fn new(registry: Registry, transport: Arc<T>, topics: Topics, cadence: Cadence) -> Self {
        Self {
            registry,
            transport,
            topics,
            cadence,
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn topics(&self) -> &Topics {
        &self.topics
    }

    // -- Outbound ------------------------------------------------------------

    pub(crate) async fn publish_availability(&self, topic: String) {
        debug!(%topic, "publish availability");
        if let Err(e) = self
            .transport
            .publish(topic, AVAILABILITY_ONLINE.as_bytes().to_vec(), false)
            .await
        {
            error!("{e:#}");
        }
    }

    pub(crate) async fn publish_state(&self, topic: String, state: &impl Serialize) {
        self.publish_json(topic, state, false).await;
    }

    pub(crate) async fn publish_discovery(&self, topic: String, config: &EntityConfig) {
        self.publish_json(topic, config, true).await;
    }

    async fn publish_json(&self, topic: String, payload: &impl Serialize, retain: bool) {
        let bytes = match serde_json::to_vec(payload) {
            Ok(b) => b,
            Err(e) => {
                error!(%topic, "failed to serialize payload: {e}");
                return;
            }
        };
        debug!(%topic, "publish");
        if let Err(e) = self.transport.publish(topic, bytes, retain).await {
            error!("{e:#}");
        }
    }

    /// Publish one report cycle from a snapshot taken by the registry.
    pub(crate) async fn run_cycle(&self, report: Report) {
        let id = report.identifier.as_str();
        let now = OffsetDateTime::now_utc();

        if self.registry.claim_discovery(id, now, self.cadence.republish).await {
            info!(device = %id, "publishing discovery config");
            for ann in discovery::announcements(&self.topics, &report) {
                self.publish_discovery(ann.topic, &ann.config).await;
            }
            if !self.cadence.settle.is_zero() {
                tokio::time::sleep(self.cadence.settle).await;
            }
        }

        self.publish_availability(self.topics.controller_availability(id)).await;
        self.publish_state(self.topics.controller_state(id), &report.state).await;
        for sensor in &report.sensors {
            self.publish_availability(self.topics.sensor_availability(id, sensor.id))
                .await;
            self.publish_state(self.topics.sensor_state(id, sensor.id), &sensor.state)
                .await;
        }

        let generation = report.pending.map(|p| p.generation);
        if self.registry.complete_cycle(id, generation).await {
            debug!(device = %id, "pending valve command reported and cleared");
        }
    }

    // -- Inbound -------------------------------------------------------------

    /// Record an operator command; it is delivered with the next response to
    /// the controller and reflected by the next report cycle.
    pub(crate) async fn on_valve_command(&self, identifier: &str, command: ValveCommand) {
        match self.registry.set_command(identifier, command).await {
            Some(generation) => {
                info!(device = %identifier, ?command, generation, "valve command received")
            }
            None => warn!(device = %identifier, ?command, "valve command for unknown device dropped"),
        }
    }

    /// Subscribe to a controller's command topic.
    pub(crate) async fn watch(&self, identifier: &str) {
        let topic = self.topics.valve_command(identifier);
        match self.transport.subscribe(topic.clone()).await {
            Ok(()) => info!(%topic, "subscribed"),
            Err(e) => error!("{e:#}"),
        }
    }

    /// Subscribe to every known controller's command topic.
    pub(crate) async fn watch_all(&self) {
        for id in self.registry.identifiers().await {
            self.watch(&id).await;
        }
    }
}

// ===========================================================================
// Test support
// ===========================================================================


// ===========================================================================
// Tests
// ===========================================================================
