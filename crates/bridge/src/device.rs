use serde::Serialize;
use std::collections::BTreeMap;
use time::OffsetDateTime;

use crate::protocol::{Decoded, MacAddress};
use crate::valve::{self, ValveCommand, ValveState};

// Status byte positions.
const BYTE_POWER: usize = 0;
const BYTE_BATTERY: usize = 1;
const BYTE_ALARM: usize = 2;
const BYTE_VALVE: usize = 4;

const BIT_POWER: u8 = 0b0001;
const BIT_BATTERY_FAULT: u8 = 0b1000;
const BIT_ALARM: u8 = 0b0001;
const BIT_VALVE_OPEN: u8 = 0b0001;

// Sensor nibble flags.
const SENSOR_LEAK: u8 = 0b1000;
const SENSOR_BATTERY_LOW: u8 = 0b0100;
const SENSOR_SIGNAL_LOST: u8 = 0b0010;
const SENSOR_CONFIGURED: u8 = 0b0001;

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

/// A leak sensor zone. Owned by its [`Controller`] and rebuilt on every
/// update; topics are composed from the owning controller's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Sensor {
    id: u8,
    raw: u8,
}

impl Sensor {
    pub(crate) fn new(id: u8, raw: u8) -> Self {
        Self { id, raw }
    }

    pub(crate) fn id(&self) -> u8 {
        self.id
    }

    pub(crate) fn is_leak_detected(&self) -> bool {
        self.raw & SENSOR_LEAK != 0
    }

    pub(crate) fn is_battery_low(&self) -> bool {
        self.raw & SENSOR_BATTERY_LOW != 0
    }

    pub(crate) fn is_signal_lost(&self) -> bool {
        self.raw & SENSOR_SIGNAL_LOST != 0
    }

    pub(crate) fn is_configured(&self) -> bool {
        self.raw & SENSOR_CONFIGURED != 0
    }

    pub(crate) fn state(&self) -> SensorState {
        SensorState {
            low_bat: self.is_battery_low(),
            signal_lost: self.is_signal_lost(),
            leak: self.is_leak_detected(),
        }
    }
}

/// Outbound sensor state message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SensorState {
    pub(crate) low_bat: bool,
    pub(crate) signal_lost: bool,
    pub(crate) leak: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// An operator command not yet confirmed by the device. `generation` is
/// unique per accepted command so the publisher can clear exactly the one it
/// reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub(crate) struct PendingCommand {
    pub(crate) command: ValveCommand,
    pub(crate) generation: u64,
}

/// One physical controller. Can only be built from a successful decode, so
/// the status accessors always have data to read.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Controller {
    identifier: String,
    mac: MacAddress,
    status: Vec<u8>,
    sensors: BTreeMap<u8, Sensor>,
    pending: Option<PendingCommand>,
    last_discovery: OffsetDateTime,
}

impl Controller {
    pub(crate) fn new(mac: MacAddress, decoded: Decoded) -> Self {
        let mut ctl = Self {
            identifier: mac.identifier(),
            mac,
            status: Vec::new(),
            sensors: BTreeMap::new(),
            pending: None,
            last_discovery: OffsetDateTime::UNIX_EPOCH,
        };
        ctl.apply(decoded);
        ctl
    }

    /// Replace status bytes and sensors wholesale. Pending command and
    /// discovery timestamp are kept.
    pub(crate) fn apply(&mut self, decoded: Decoded) {
        self.status = decoded.status;
        self.sensors = decoded
            .zones
            .into_iter()
            .map(|(id, raw)| (id, Sensor::new(id, raw)))
            .collect();
    }

    #[cfg(test)]
    pub(crate) fn status_bytes(&self) -> &[u8] {
        &self.status
    }

    #[cfg(test)]
    pub(crate) fn sensors(&self) -> &BTreeMap<u8, Sensor> {
        &self.sensors
    }

    /// Sensors the controller reports as configured, in zone order.
    pub(crate) fn configured_sensors(&self) -> impl Iterator<Item = &Sensor> {
        self.sensors.values().filter(|s| s.is_configured())
    }

    fn bit(&self, byte: usize, mask: u8) -> bool {
        self.status.get(byte).is_some_and(|b| b & mask != 0)
    }

    pub(crate) fn has_power_line(&self) -> bool {
        self.bit(BYTE_POWER, BIT_POWER)
    }

    pub(crate) fn has_battery_fault(&self) -> bool {
        self.bit(BYTE_BATTERY, BIT_BATTERY_FAULT)
    }

    pub(crate) fn has_alarm(&self) -> bool {
        self.bit(BYTE_ALARM, BIT_ALARM)
    }

    pub(crate) fn is_raw_valve_open(&self) -> bool {
        self.bit(BYTE_VALVE, BIT_VALVE_OPEN)
    }

    pub(crate) fn pending_command(&self) -> Option<ValveCommand> {
        self.pending.map(|p| p.command)
    }

    /// Overwrites any unconsumed command.
    pub(crate) fn set_pending(&mut self, command: ValveCommand, generation: u64) {
        self.pending = Some(PendingCommand {
            command,
            generation,
        });
    }

    /// Clear the pending command if it is still the one with `generation`.
    pub(crate) fn clear_pending_if(&mut self, generation: u64) -> bool {
        match self.pending {
            Some(p) if p.generation == generation => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn last_discovery(&self) -> OffsetDateTime {
        self.last_discovery
    }

    pub(crate) fn set_last_discovery(&mut self, at: OffsetDateTime) {
        self.last_discovery = at;
    }

    pub(crate) fn valve_state(&self) -> ValveState {
        valve::reconcile(self.is_raw_valve_open(), self.has_alarm(), self.pending_command())
    }

    pub(crate) fn state(&self) -> ControllerState {
        let valve_state = self.valve_state();
        ControllerState {
            mac: self.mac.to_string(),
            valve: valve_state.is_open(),
            valve_state,
            battery: self.has_battery_fault(),
            power_line: self.has_power_line(),
            alarm: self.has_alarm(),
        }
    }

    /// Everything one report cycle needs, captured at once.
    pub(crate) fn report(&self) -> Report {
        Report {
            identifier: self.identifier.clone(),
            state: self.state(),
            sensors: self
                .configured_sensors()
                .map(|s| SensorReport {
                    id: s.id(),
                    state: s.state(),
                })
                .collect(),
            pending: self.pending,
            last_discovery: self.last_discovery,
        }
    }

    /// One-line summary for logs.
    pub(crate) fn summary(&self) -> String {
        let sensors = self
            .configured_sensors()
            .map(|s| {
                format!(
                    "{}[leak={} low_bat={} signal_lost={}]",
                    s.id(),
                    s.is_leak_detected(),
                    s.is_battery_low(),
                    s.is_signal_lost()
                )
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} power={} battery_fault={} valve={} alarm={} sensors=[{sensors}]",
            self.mac,
            self.has_power_line(),
            self.has_battery_fault(),
            self.valve_state().as_str(),
            self.has_alarm()
        )
    }
}

/// Outbound controller state message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ControllerState {
    pub(crate) mac: String,
    pub(crate) valve: bool,
    pub(crate) valve_state: ValveState,
    pub(crate) battery: bool,
    pub(crate) power_line: bool,
    pub(crate) alarm: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct SensorReport {
    pub(crate) id: u8,
    #[serde(flatten)]
    pub(crate) state: SensorState,
}

/// Snapshot of a controller taken under the registry lock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct Report {
    pub(crate) identifier: String,
    pub(crate) state: ControllerState,
    pub(crate) sensors: Vec<SensorReport>,
    pub(crate) pending: Option<PendingCommand>,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) last_discovery: OffsetDateTime,
}

// ===========================================================================
// Tests
// ===========================================================================
