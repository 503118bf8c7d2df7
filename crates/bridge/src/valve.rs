//! Valve commands and the reconciliation state machine.
//!
//! The actuator takes minutes to move and the controller keeps reporting its
//! sensed position meanwhile. A command in flight therefore overrides the
//! reported position for one report cycle:
//!
//! ```text
//! pending  raw_open  alarm   reported
//! Close    true      *       closing
//! Open     false     false   opening
//! Open     false     true    closed   (alarm blocks remote opening)
//! *        true      *       open
//! *        false     *       closed
//! ```

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ValveCommand {
    Open,
    Close,
}

impl ValveCommand {
    /// Code the controller expects in the HTTP response.
    pub(crate) fn wire_code(self) -> u8 {
        match self {
            ValveCommand::Open => 1,
            ValveCommand::Close => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ValveState {
    Open,
    Closed,
    Opening,
    Closing,
}

impl ValveState {
    /// Binary view of the reported state; in-flight states count as their
    /// target.
    pub(crate) fn is_open(self) -> bool {
        matches!(self, ValveState::Open | ValveState::Opening)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ValveState::Open => "open",
            ValveState::Closed => "closed",
            ValveState::Opening => "opening",
            ValveState::Closing => "closing",
        }
    }
}

/// Merge the sensed valve bit, the alarm bit and the outstanding command.
/// Commands are compared by value.
pub(crate) fn reconcile(raw_open: bool, alarm: bool, pending: Option<ValveCommand>) -> ValveState {
    match (pending, raw_open, alarm) {
        (Some(ValveCommand::Close), true, _) => ValveState::Closing,
        (Some(ValveCommand::Open), false, false) => ValveState::Opening,
        (_, true, _) => ValveState::Open,
        (_, false, _) => ValveState::Closed,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum CommandError {
    #[error("unknown valve command '{0}'")]
    UnknownValue(String),
}

/// Parse a boolean-ish command payload (case-insensitive, trims whitespace).
/// Truthy values open the valve, falsy values close it.
pub(crate) fn parse_valve_command(payload: &[u8]) -> Result<ValveCommand, CommandError> {
    let s = String::from_utf8_lossy(payload).trim().to_lowercase();
    match s.as_str() {
        "1" | "t" | "true" | "on" | "open" => Ok(ValveCommand::Open),
        "0" | "f" | "false" | "off" | "close" => Ok(ValveCommand::Close),
        _ => Err(CommandError::UnknownValue(s)),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- reconcile -----------------------------------------------------------

    #[test]
    fn no_command_reports_raw_position() {
        for alarm in [false, true] {
            assert_eq!(reconcile(false, alarm, None), ValveState::Closed);
            assert_eq!(reconcile(true, alarm, None), ValveState::Open);
        }
    }

    #[test]
    fn close_command_while_open_is_closing() {
        assert_eq!(reconcile(true, false, Some(ValveCommand::Close)), ValveState::Closing);
        assert_eq!(reconcile(true, true, Some(ValveCommand::Close)), ValveState::Closing);
    }

    #[test]
    fn close_command_already_closed_is_closed() {
        assert_eq!(reconcile(false, false, Some(ValveCommand::Close)), ValveState::Closed);
    }

    #[test]
    fn open_command_while_closed_is_opening() {
        assert_eq!(reconcile(false, false, Some(ValveCommand::Open)), ValveState::Opening);
    }

    #[test]
    fn open_command_blocked_by_alarm_stays_closed() {
        assert_eq!(reconcile(false, true, Some(ValveCommand::Open)), ValveState::Closed);
    }

    #[test]
    fn open_command_already_open_is_open() {
        assert_eq!(reconcile(true, false, Some(ValveCommand::Open)), ValveState::Open);
        assert_eq!(reconcile(true, true, Some(ValveCommand::Open)), ValveState::Open);
    }

    #[test]
    fn is_open_follows_target() {
        assert!(ValveState::Open.is_open());
        assert!(ValveState::Opening.is_open());
        assert!(!ValveState::Closed.is_open());
        assert!(!ValveState::Closing.is_open());
    }

    #[test]
    fn valve_state_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ValveState::Closing).unwrap(), "closing");
        assert_eq!(ValveState::Opening.as_str(), "opening");
    }

    #[test]
    fn wire_codes() {
        assert_eq!(ValveCommand::Open.wire_code(), 1);
        assert_eq!(ValveCommand::Close.wire_code(), 0);
    }

    // -- parse_valve_command -------------------------------------------------

    #[test]
    fn parse_truthy_values_open() {
        for p in ["1", "t", "T", "true", "TRUE", "True", "ON", "open", "OPEN"] {
            assert_eq!(parse_valve_command(p.as_bytes()), Ok(ValveCommand::Open), "{p}");
        }
    }

    #[test]
    fn parse_falsy_values_close() {
        for p in ["0", "f", "F", "false", "FALSE", "off", "CLOSE"] {
            assert_eq!(parse_valve_command(p.as_bytes()), Ok(ValveCommand::Close), "{p}");
        }
    }

    #[test]
    fn parse_trims_whitespace() {
        assert_eq!(parse_valve_command(b"  true\n"), Ok(ValveCommand::Open));
    }

    #[test]
    fn parse_garbage_rejected() {
        assert_eq!(
            parse_valve_command(b"TOGGLE"),
            Err(CommandError::UnknownValue("toggle".to_string()))
        );
    }

    #[test]
    fn parse_empty_rejected() {
        assert!(parse_valve_command(b"").is_err());
    }
}
