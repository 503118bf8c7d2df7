//! Wire types for the controller's HTTP telemetry protocol and the pure
//! decoder that turns its hex-digit fields into status bytes and zone
//! nibbles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Number of zones carried by each of the four zone fields.
pub(crate) const ZONES_PER_FIELD: usize = 25;

/// The controller accessors read up to byte 4 (valve).
pub(crate) const MIN_STATUS_DIGITS: usize = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum PayloadError {
    #[error("{field}: invalid hex digit {character:?} at position {position}")]
    InvalidDigit {
        field: &'static str,
        position: usize,
        character: char,
    },
    #[error("{field}: expected {expected} digits, got {actual}")]
    WrongLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{field}: expected at least {min} digits, got {actual}")]
    Truncated {
        field: &'static str,
        min: usize,
        actual: usize,
    },
    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RequestBody {
    #[serde(rename = "Itek_V1")]
    pub(crate) itek_v1: StatusPayload,
}

/// One status report as POSTed by the controller.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StatusPayload {
    #[serde(rename = "MAC_address")]
    pub(crate) mac_address: String,
    #[serde(rename = "ID", default)]
    pub(crate) id: String,
    #[serde(rename = "Cont_status")]
    pub(crate) controller_status: String,
    #[serde(rename = "zone01-25")]
    pub(crate) zones_01_25: String,
    #[serde(rename = "zone26-50")]
    pub(crate) zones_26_50: String,
    #[serde(rename = "zone51-75")]
    pub(crate) zones_51_75: String,
    #[serde(rename = "zone76-100")]
    pub(crate) zones_76_100: String,
}

impl StatusPayload {
    /// Zone fields in concatenation order (zones 1-25 first).
    fn zone_fields(&self) -> [(&'static str, &str); 4] {
        [
            ("zone01-25", &self.zones_01_25),
            ("zone26-50", &self.zones_26_50),
            ("zone51-75", &self.zones_51_75),
            ("zone76-100", &self.zones_76_100),
        ]
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseBody {
    #[serde(rename = "Itek_V1")]
    pub(crate) itek_v1: Response,
}

#[derive(Debug, Serialize)]
pub(crate) struct Response {
    pub(crate) mess: String,
    /// Pending valve command for the controller to execute (1 open, 0 close).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) valve: Option<u8>,
}

impl ResponseBody {
    pub(crate) fn ok(valve: Option<u8>) -> Self {
        Self {
            itek_v1: Response {
                mess: "OK".to_string(),
                valve,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Hardware address
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MacAddress([u8; 6]);

impl MacAddress {
    /// Stable device identifier, e.g. `a4-cf-12-00-be-ef`. Safe to use as an
    /// MQTT topic segment.
    pub(crate) fn identifier(&self) -> String {
        self.to_string().replace(':', "-")
    }
}

impl FromStr for MacAddress {
    type Err = PayloadError;

    /// Accepts six hex octets separated by `:` or `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PayloadError::InvalidMac(s.to_string());
        let sep = if s.contains('-') { '-' } else { ':' };

        let mut octets = [0u8; 6];
        let mut parts = s.trim().split(sep);
        for octet in &mut octets {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Output of [`decode`]: one byte per status digit, plus every zone whose
/// nibble is nonzero keyed by its 1-based zone id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Decoded {
    pub(crate) status: Vec<u8>,
    pub(crate) zones: BTreeMap<u8, u8>,
}

/// Decode the status and zone fields. Pure; either every field decodes or
/// nothing is returned.
pub(crate) fn decode(payload: &StatusPayload) -> Result<Decoded, PayloadError> {
    let status = hex_digits("Cont_status", &payload.controller_status)?;
    if status.len() < MIN_STATUS_DIGITS {
        return Err(PayloadError::Truncated {
            field: "Cont_status",
            min: MIN_STATUS_DIGITS,
            actual: status.len(),
        });
    }

    let mut zones = BTreeMap::new();
    for (block, (field, raw)) in payload.zone_fields().into_iter().enumerate() {
        let nibbles = hex_digits(field, raw)?;
        if nibbles.len() != ZONES_PER_FIELD {
            return Err(PayloadError::WrongLength {
                field,
                expected: ZONES_PER_FIELD,
                actual: nibbles.len(),
            });
        }
        for (offset, nibble) in nibbles.into_iter().enumerate() {
            if nibble == 0 {
                continue;
            }
            // At most 100 zones, always fits in u8.
            let zone_id = (block * ZONES_PER_FIELD + offset + 1) as u8;
            zones.insert(zone_id, nibble);
        }
    }

    Ok(Decoded { status, zones })
}

fn hex_digits(field: &'static str, raw: &str) -> Result<Vec<u8>, PayloadError> {
    raw.chars()
        .enumerate()
        .map(|(i, c)| {
            c.to_digit(16)
                .map(|d| d as u8)
                .ok_or(PayloadError::InvalidDigit {
                    field,
                    position: i + 1,
                    character: c,
                })
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const EMPTY_ZONES: &str = "0000000000000000000000000";

    pub(crate) fn payload(mac: &str, status: &str, zones: [&str; 4]) -> StatusPayload {
        StatusPayload {
            mac_address: mac.to_string(),
            id: "ITEK".to_string(),
            controller_status: status.to_string(),
            zones_01_25: zones[0].to_string(),
            zones_26_50: zones[1].to_string(),
            zones_51_75: zones[2].to_string(),
            zones_76_100: zones[3].to_string(),
        }
    }

    /// 25-digit zone field with `nibble` at the given 1-based position.
    pub(crate) fn zone_field_with(position: usize, nibble: char) -> String {
        let mut field: Vec<char> = EMPTY_ZONES.chars().collect();
        field[position - 1] = nibble;
        field.into_iter().collect()
    }

    fn quiet(status: &str) -> StatusPayload {
        payload("a4:cf:12:00:be:ef", status, [EMPTY_ZONES; 4])
    }

    // -- MacAddress ----------------------------------------------------------

    #[test]
    fn mac_parses_colon_separated() {
        let mac: MacAddress = "A4:CF:12:00:BE:EF".parse().unwrap();
        assert_eq!(mac.to_string(), "a4:cf:12:00:be:ef");
    }

    #[test]
    fn mac_parses_dash_separated() {
        let mac: MacAddress = "a4-cf-12-00-be-ef".parse().unwrap();
        assert_eq!(mac.identifier(), "a4-cf-12-00-be-ef");
    }

    #[test]
    fn mac_identifier_is_case_insensitive() {
        let upper: MacAddress = "A4:CF:12:00:BE:EF".parse().unwrap();
        let lower: MacAddress = "a4:cf:12:00:be:ef".parse().unwrap();
        assert_eq!(upper.identifier(), lower.identifier());
    }

    #[test]
    fn mac_rejects_short_address() {
        assert!(matches!(
            "a4:cf:12:00:be".parse::<MacAddress>(),
            Err(PayloadError::InvalidMac(_))
        ));
    }

    #[test]
    fn mac_rejects_long_address() {
        assert!("a4:cf:12:00:be:ef:01".parse::<MacAddress>().is_err());
    }

    #[test]
    fn mac_rejects_bad_octet() {
        assert!("a4:cf:12:00:be:zz".parse::<MacAddress>().is_err());
        assert!("a4:cf:12:00:be:f".parse::<MacAddress>().is_err());
    }

    #[test]
    fn mac_rejects_sign_prefix() {
        assert!(matches!(
            "a4:cf:12:00:be:+f".parse::<MacAddress>(),
            Err(PayloadError::InvalidMac(_))
        ));
        assert!("a4-cf-12-00-be-+f".parse::<MacAddress>().is_err());
    }

    // -- decode: status ------------------------------------------------------

    #[test]
    fn decode_status_digits_one_byte_each() {
        let decoded = decode(&quiet("18a01")).unwrap();
        assert_eq!(decoded.status, vec![0x1, 0x8, 0xa, 0x0, 0x1]);
        assert!(decoded.zones.is_empty());
    }

    #[test]
    fn decode_status_accepts_uppercase_and_extra_digits() {
        let decoded = decode(&quiet("1F0010FF")).unwrap();
        assert_eq!(decoded.status.len(), 8);
        assert_eq!(decoded.status[1], 0xf);
    }

    #[test]
    fn decode_status_invalid_digit_reports_field_and_char() {
        let err = decode(&quiet("10g01")).unwrap_err();
        assert_eq!(
            err,
            PayloadError::InvalidDigit {
                field: "Cont_status",
                position: 3,
                character: 'g',
            }
        );
    }

    #[test]
    fn decode_status_too_short_rejected() {
        let err = decode(&quiet("1000")).unwrap_err();
        assert!(matches!(err, PayloadError::Truncated { actual: 4, .. }));
    }

    // -- decode: zones -------------------------------------------------------

    #[test]
    fn decode_zero_nibbles_are_absent() {
        let decoded = decode(&quiet("10001")).unwrap();
        assert!(decoded.zones.is_empty());
    }

    #[test]
    fn decode_every_nonzero_nibble_is_present() {
        for n in 0u8..16 {
            let digit = char::from_digit(n as u32, 16).unwrap();
            let z1 = zone_field_with(1, digit);
            let p = payload("a4:cf:12:00:be:ef", "10001", [&z1, EMPTY_ZONES, EMPTY_ZONES, EMPTY_ZONES]);
            let decoded = decode(&p).unwrap();
            if n == 0 {
                assert!(decoded.zones.is_empty(), "nibble 0 must be absent");
            } else {
                assert_eq!(decoded.zones.get(&1), Some(&n));
                assert_eq!(decoded.zones.len(), 1);
            }
        }
    }

    #[test]
    fn decode_zone_position_37_maps_to_sensor_37() {
        // Position 37 of the concatenation is digit 12 of the second field.
        let z2 = zone_field_with(12, '8');
        let p = payload("a4:cf:12:00:be:ef", "10001", [EMPTY_ZONES, &z2, EMPTY_ZONES, EMPTY_ZONES]);
        let decoded = decode(&p).unwrap();
        assert_eq!(decoded.zones.keys().copied().collect::<Vec<_>>(), vec![37]);
        assert_eq!(decoded.zones[&37], 0x8);
    }

    #[test]
    fn decode_zone_boundaries() {
        let z1 = zone_field_with(1, '1');
        let z4 = zone_field_with(25, '9');
        let p = payload("a4:cf:12:00:be:ef", "10001", [&z1, EMPTY_ZONES, EMPTY_ZONES, &z4]);
        let decoded = decode(&p).unwrap();
        assert_eq!(decoded.zones.keys().copied().collect::<Vec<_>>(), vec![1, 100]);
    }

    #[test]
    fn decode_zone_invalid_digit_names_field() {
        let z3 = zone_field_with(5, 'x');
        let p = payload("a4:cf:12:00:be:ef", "10001", [EMPTY_ZONES, EMPTY_ZONES, &z3, EMPTY_ZONES]);
        let err = decode(&p).unwrap_err();
        assert_eq!(
            err,
            PayloadError::InvalidDigit {
                field: "zone51-75",
                position: 5,
                character: 'x',
            }
        );
    }

    #[test]
    fn decode_zone_wrong_length_rejected() {
        let p = payload("a4:cf:12:00:be:ef", "10001", [EMPTY_ZONES, "000", EMPTY_ZONES, EMPTY_ZONES]);
        let err = decode(&p).unwrap_err();
        assert_eq!(
            err,
            PayloadError::WrongLength {
                field: "zone26-50",
                expected: 25,
                actual: 3,
            }
        );
    }

    #[test]
    fn decode_is_idempotent() {
        let z2 = zone_field_with(3, 'd');
        let p = payload("a4:cf:12:00:be:ef", "11011", [EMPTY_ZONES, &z2, EMPTY_ZONES, EMPTY_ZONES]);
        assert_eq!(decode(&p).unwrap(), decode(&p).unwrap());
    }

    // -- Wire bodies ---------------------------------------------------------

    #[test]
    fn request_body_deserializes() {
        let json = format!(
            r#"{{"Itek_V1":{{"MAC_address":"a4:cf:12:00:be:ef","ID":"X1","Cont_status":"10001",
            "zone01-25":"{EMPTY_ZONES}","zone26-50":"{EMPTY_ZONES}",
            "zone51-75":"{EMPTY_ZONES}","zone76-100":"{EMPTY_ZONES}"}}}}"#
        );
        let body: RequestBody = serde_json::from_str(&json).unwrap();
        assert_eq!(body.itek_v1.mac_address, "a4:cf:12:00:be:ef");
        assert_eq!(body.itek_v1.controller_status, "10001");
    }

    #[test]
    fn request_body_missing_zone_field_fails() {
        let json = r#"{"Itek_V1":{"MAC_address":"a4:cf:12:00:be:ef","Cont_status":"10001"}}"#;
        assert!(serde_json::from_str::<RequestBody>(json).is_err());
    }

    #[test]
    fn response_body_omits_valve_when_none() {
        let json = serde_json::to_value(ResponseBody::ok(None)).unwrap();
        assert_eq!(json, serde_json::json!({"Itek_V1": {"mess": "OK"}}));
    }

    #[test]
    fn response_body_carries_valve_code() {
        let json = serde_json::to_value(ResponseBody::ok(Some(0))).unwrap();
        assert_eq!(json["Itek_V1"]["valve"], 0);
    }
}
