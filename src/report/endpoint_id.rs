//! Socket-level entity ID codec.
//!
//! Endpoint node IDs encode an observation scope, an address, and a port as
//! `scope;address;port`. The `;` delimiter cannot collide with IPv6 `:` or
//! hostname characters. A decode that does not recover exactly three fields
//! with a non-empty address and port is malformed; callers skip the
//! observation rather than fail.

const DELIMITER: char = ';';

/// Encodes an endpoint node ID from scope, address, and port.
pub fn encode(scope: &str, addr: &str, port: &str) -> String {
    format!("{scope}{DELIMITER}{addr}{DELIMITER}{port}")
}

/// Parses an endpoint node ID back into `(scope, address, port)`.
///
/// Returns `None` for malformed IDs.
pub fn parse(id: &str) -> Option<(&str, &str, &str)> {
    let mut parts = id.split(DELIMITER);
    let scope = parts.next()?;
    let addr = parts.next()?;
    let port = parts.next()?;
    if parts.next().is_some() || addr.is_empty() || port.is_empty() {
        return None;
    }
    Some((scope, addr, port))
}
