mod bridge;
mod config;
mod device;
mod discovery;
mod mqtt;
mod protocol;
mod registry;
mod valve;
mod web;

use anyhow::Result;
use rumqttc::AsyncClient;
use std::{env, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bridge::{Bridge, Cadence};
use mqtt::{MqttTransport, Topics};
use registry::Registry;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("AMB_CONFIG").unwrap_or_else(|_| "akwatek-bridge.toml".to_string());
    let cfg = config::load(&config_path)?;

    // ── Logging ─────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        broker = %cfg.mqtt.broker_host,
        port = cfg.mqtt.broker_port,
        base_topic = %cfg.mqtt.base_topic,
        "starting akwatek bridge"
    );

    // ── MQTT ────────────────────────────────────────────────────────
    let (client, eventloop) = AsyncClient::new(mqtt::options(&cfg.mqtt), 20);

    // ── Bridge ──────────────────────────────────────────────────────
    let bridge = Bridge::new(
        Registry::new(),
        Arc::new(MqttTransport::new(client)),
        Topics::new(cfg.mqtt.base_topic.clone(), cfg.hass.discovery_prefix.clone()),
        Cadence {
            republish: cfg.hass.republish(),
            settle: cfg.hass.settle(),
        },
    );

    tokio::spawn(mqtt::run(eventloop, bridge.clone()));

    // ── Telemetry endpoint ──────────────────────────────────────────
    web::serve(bridge, &cfg.http).await
}
