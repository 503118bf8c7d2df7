use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::{Bridge, Transport};
use crate::config::MqttConfig;
use crate::valve::parse_valve_command;

// ---------------------------------------------------------------------------
// Topics
// ---------------------------------------------------------------------------

/// Topic layout under the configured base topic and discovery prefix.
#[derive(Debug, Clone)]
pub(crate) struct Topics {
    base: String,
    discovery_prefix: String,
}

impl Topics {
    pub(crate) fn new(base: impl Into<String>, discovery_prefix: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            discovery_prefix: discovery_prefix.into(),
        }
    }

    pub(crate) fn controller_availability(&self, id: &str) -> String {
        format!("{}/{id}/controller/availability", self.base)
    }

    pub(crate) fn controller_state(&self, id: &str) -> String {
        format!("{}/{id}/controller/state", self.base)
    }

    pub(crate) fn sensor_availability(&self, id: &str, zone: u8) -> String {
        format!("{}/{id}/sensors/{zone}/availability", self.base)
    }

    pub(crate) fn sensor_state(&self, id: &str, zone: u8) -> String {
        format!("{}/{id}/sensors/{zone}/state", self.base)
    }

    pub(crate) fn valve_command(&self, id: &str) -> String {
        format!("{}/{id}/valve/set", self.base)
    }

    /// `<prefix>/<component>/<node_id>/<object>/config`
    pub(crate) fn discovery(&self, component: &str, node_id: &str, object: &str) -> String {
        format!("{}/{component}/{node_id}/{object}/config", self.discovery_prefix)
    }

    /// Extract the controller identifier from "<base>/<id>/valve/set".
    pub(crate) fn command_identifier<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.base.as_str())?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() == 3 && !parts[0].is_empty() && parts[1] == "valve" && parts[2] == "set" {
            Some(parts[0])
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// [`Transport`] over a rumqttc client.
#[derive(Clone)]
pub(crate) struct MqttTransport {
    client: AsyncClient,
}

impl MqttTransport {
    pub(crate) fn new(client: AsyncClient) -> Self {
        Self { client }
    }
}

impl Transport for MqttTransport {
    async fn publish(&self, topic: String, payload: Vec<u8>, retain: bool) -> Result<()> {
        self.client
            .publish(topic.as_str(), QoS::AtMostOnce, retain, payload)
            .await
            .with_context(|| format!("publish to {topic} failed"))
    }

    async fn subscribe(&self, topic: String) -> Result<()> {
        self.client
            .subscribe(topic.as_str(), QoS::AtLeastOnce)
            .await
            .with_context(|| format!("subscribe to {topic} failed"))
    }
}

pub(crate) fn options(cfg: &MqttConfig) -> MqttOptions {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.broker_host.clone(), cfg.broker_port);
    opts.set_keep_alive(Duration::from_secs(30));
    if let Some(username) = &cfg.username {
        opts.set_credentials(username.clone(), cfg.password.clone().unwrap_or_default());
    }
    opts
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

/// Drive the MQTT connection: route valve commands into the bridge and
/// re-subscribe every known controller after each (re)connect.
pub(crate) async fn run<T: Transport + 'static>(mut eventloop: EventLoop, bridge: Bridge<T>) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(p))) => {
                handle_command(&bridge, &p.topic, &p.payload).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("mqtt connected");
                // Subscribing goes through the client queue this loop drains,
                // so it must not be awaited here.
                let bridge = bridge.clone();
                tokio::spawn(async move { bridge.watch_all().await });
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("mqtt disconnected");
            }
            Ok(_) => {}
            Err(e) => {
                error!("mqtt error: {e}. reconnecting...");
                sleep(Duration::from_secs(5)).await;
            }
        }
    }
}

/// Route one inbound publish. Unknown topics and bad payloads are logged and
/// dropped.
pub(crate) async fn handle_command<T: Transport>(bridge: &Bridge<T>, topic: &str, payload: &[u8]) {
    let Some(identifier) = bridge.topics().command_identifier(topic) else {
        debug!(%topic, "unhandled topic");
        return;
    };
    match parse_valve_command(payload) {
        Ok(command) => bridge.on_valve_command(identifier, command).await,
        Err(e) => warn!(device = %identifier, "{e}; command dropped"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
