//! Home-Assistant MQTT discovery payloads for controllers and sensors, and
//! the republish cadence.

use serde::Serialize;
use std::time::Duration;
use time::OffsetDateTime;

use crate::device::Report;
use crate::mqtt::Topics;

pub(crate) const MANUFACTURER: &str = "AKWA Technologies";
pub(crate) const NODE_PREFIX: &str = "akwatek";

#[derive(Debug, Clone, Serialize)]
pub(crate) struct DeviceInfo {
    pub(crate) identifiers: Vec<String>,
    pub(crate) name: String,
    pub(crate) manufacturer: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct EntityConfig {
    pub(crate) name: String,
    pub(crate) device_class: String,
    pub(crate) state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) command_topic: Option<String>,
    pub(crate) availability_topic: String,
    pub(crate) unique_id: String,
    pub(crate) value_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) payload_on: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) payload_off: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) payload_open: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) payload_close: Option<String>,
    pub(crate) device: DeviceInfo,
}

/// A discovery config and the topic it goes to.
#[derive(Debug, Clone)]
pub(crate) struct Announcement {
    pub(crate) topic: String,
    pub(crate) config: EntityConfig,
}

/// Discovery is sent on first sight and then at most once per `interval`.
/// An interval that runs past the representable range is never due again.
pub(crate) fn discovery_due(last: OffsetDateTime, now: OffsetDateTime, interval: Duration) -> bool {
    time::Duration::try_from(interval)
        .ok()
        .and_then(|interval| last.checked_add(interval))
        .is_some_and(|next| next < now)
}

pub(crate) fn node_id(identifier: &str) -> String {
    format!("{NODE_PREFIX}-{identifier}")
}

fn device_info(identifier: &str) -> DeviceInfo {
    let node = node_id(identifier);
    DeviceInfo {
        identifiers: vec![node.clone()],
        name: node,
        manufacturer: MANUFACTURER.to_string(),
    }
}

/// Binary sensor reading a boolean field of a state message.
fn binary_sensor(
    name: String,
    device_class: &str,
    field: &str,
    unique_id: String,
    state_topic: String,
    availability_topic: String,
    identifier: &str,
) -> EntityConfig {
    EntityConfig {
        name,
        device_class: device_class.to_string(),
        state_topic,
        command_topic: None,
        availability_topic,
        unique_id,
        value_template: format!("{{{{ value_json.{field} | abs }}}}"),
        payload_on: Some("1".to_string()),
        payload_off: Some("0".to_string()),
        payload_open: None,
        payload_close: None,
        device: device_info(identifier),
    }
}

/// Valve, power, alarm and battery entities of a controller. The valve goes
/// first; consumers need it before the rest.
pub(crate) fn controller_announcements(topics: &Topics, identifier: &str) -> Vec<Announcement> {
    let node = node_id(identifier);
    let state = topics.controller_state(identifier);
    let availability = topics.controller_availability(identifier);

    let valve = EntityConfig {
        name: "valve".to_string(),
        device_class: "water".to_string(),
        state_topic: state.clone(),
        command_topic: Some(topics.valve_command(identifier)),
        availability_topic: availability.clone(),
        unique_id: format!("{node}_valve"),
        value_template: "{{ value_json.valveState }}".to_string(),
        payload_on: None,
        payload_off: None,
        payload_open: Some("OPEN".to_string()),
        payload_close: Some("CLOSE".to_string()),
        device: device_info(identifier),
    };

    let mut out = vec![Announcement {
        topic: topics.discovery("valve", &node, "valve"),
        config: valve,
    }];

    for (object, device_class, field) in [
        ("alarm", "problem", "alarm"),
        ("power", "power", "powerLine"),
        ("battery", "problem", "battery"),
    ] {
        out.push(Announcement {
            topic: topics.discovery("binary_sensor", &node, object),
            config: binary_sensor(
                object.to_string(),
                device_class,
                field,
                format!("{node}_{object}"),
                state.clone(),
                availability.clone(),
                identifier,
            ),
        });
    }
    out
}

/// Leak, battery and signal entities of one sensor zone.
pub(crate) fn sensor_announcements(topics: &Topics, identifier: &str, zone: u8) -> Vec<Announcement> {
    let node = node_id(identifier);
    let state = topics.sensor_state(identifier, zone);
    let availability = topics.sensor_availability(identifier, zone);

    [
        ("leak", "moisture", "leak"),
        ("bat", "battery", "low_bat"),
        ("signal", "problem", "signal_lost"),
    ]
    .into_iter()
    .map(|(suffix, device_class, field)| Announcement {
        topic: topics.discovery("binary_sensor", &node, &format!("sensor-{zone}-{suffix}")),
        config: binary_sensor(
            format!("{zone} {suffix}"),
            device_class,
            field,
            format!("{node}_{zone}-{suffix}"),
            state.clone(),
            availability.clone(),
            identifier,
        ),
    })
    .collect()
}

/// Every announcement for a report: controller entities, then each
/// configured sensor in zone order.
pub(crate) fn announcements(topics: &Topics, report: &Report) -> Vec<Announcement> {
    let mut out = controller_announcements(topics, &report.identifier);
    for sensor in &report.sensors {
        out.extend(sensor_announcements(topics, &report.identifier, sensor.id));
    }
    out
}

// ===========================================================================
// Tests
// ===========================================================================
