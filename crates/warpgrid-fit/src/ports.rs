//! Port specification parsing.
//!
//! A port spec is a comma separated list of single ports and inclusive
//! ranges: `"10,12-14,16"` yields `[10, 12, 13, 14, 16]`.

use std::collections::BTreeSet;

use crate::error::PortRangeError;

/// Highest port number a spec may name.
pub const MAX_VALID_PORT: u64 = 65535;

/// Parse a port spec into an ascending, deduplicated list of ports.
///
/// An empty spec yields an empty list. Range bounds are validated before the
/// range is expanded, so `"1-99999999"` fails fast instead of allocating.
pub fn parse_port_ranges(spec: &str) -> Result<Vec<u16>, PortRangeError> {
    if spec.is_empty() {
        return Ok(Vec::new());
    }

    let mut ports = BTreeSet::new();
    for part in spec.split(',') {
        let part = part.trim();
        let bounds: Vec<&str> = part.split('-').collect();
        match bounds.as_slice() {
            [single] => {
                if single.is_empty() {
                    return Err(PortRangeError::EmptyPort);
                }
                let port = parse_port(single)?;
                ports.insert(port);
            }
            [start, end] => {
                let start = parse_number(start)?;
                let end = parse_number(end)?;
                if end < start {
                    return Err(PortRangeError::InvalidRange { start, end });
                }
                check_upper(end)?;
                if start == 0 {
                    return Err(PortRangeError::ZeroPort);
                }
                ports.extend(start as u16..=end as u16);
            }
            _ => return Err(PortRangeError::MalformedToken(part.to_string())),
        }
    }

    Ok(ports.into_iter().collect())
}

fn parse_number(raw: &str) -> Result<u64, PortRangeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PortRangeError::EmptyPort);
    }
    raw.parse::<u64>()
        .map_err(|_| PortRangeError::InvalidNumber(raw.to_string()))
}

fn parse_port(raw: &str) -> Result<u16, PortRangeError> {
    let port = parse_number(raw)?;
    check_upper(port)?;
    if port == 0 {
        return Err(PortRangeError::ZeroPort);
    }
    Ok(port as u16)
}

fn check_upper(port: u64) -> Result<(), PortRangeError> {
    if port > MAX_VALID_PORT {
        return Err(PortRangeError::PortTooLarge {
            max: MAX_VALID_PORT,
            found: port,
        });
    }
    Ok(())
}
