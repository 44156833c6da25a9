//! Textual endpoint parsing into wire-ready binary form.

use std::net::Ipv4Addr;
use std::str::FromStr;

use tracing::warn;

use crate::config::MAC_ADDR_SIZE;
use crate::error::{Error, Result};

/// An IPv4/UDP/Ethernet endpoint with every field in network byte order.
///
/// Derived once from the textual configuration during session allocation
/// and immutable thereafter. The stored values are memcpy-ready: packet
/// construction copies them into frames without further conversion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IPV4UDPEndpoint {
    /// IPv4 address in network binary format.
    pub ip_addr: u32,
    /// UDP port in network binary format.
    pub port: u16,
    /// MAC address bytes as they appear on the wire.
    pub mac: [u8; MAC_ADDR_SIZE],
}

/// Parse textual MAC/IPv4/port into a wire-ready endpoint record.
///
/// `ip_addr` must be a dotted-quad IPv4 address; `mac` must be exactly six
/// colon-separated two-digit hexadecimal octets. The port is converted from
/// host to network order. All sub-parses are attempted so each bad field
/// gets its own diagnostic, but any failure fails the whole call and the
/// returned endpoint must not be used.
///
/// # Errors
/// `BadAddress` if the MAC or the IPv4 address does not parse.
pub fn parse_endpoint(mac: &str, ip_addr: &str, port: u16) -> Result<IPV4UDPEndpoint> {
    let mut endpoint = IPV4UDPEndpoint::default();
    let mut valid = true;

    match Ipv4Addr::from_str(ip_addr) {
        Ok(addr) => endpoint.ip_addr = u32::from(addr).to_be(),
        Err(_) => {
            warn!(ip_addr, "not a dotted-quad IPv4 address");
            valid = false;
        }
    }

    endpoint.port = port.to_be();

    match parse_mac(mac) {
        Some(octets) => endpoint.mac = octets,
        None => {
            warn!(mac, "not six colon-separated hex octets");
            valid = false;
        }
    }

    if valid {
        Ok(endpoint)
    } else {
        Err(Error::BadAddress(format!(
            "cannot parse endpoint mac='{}' ip='{}'",
            mac, ip_addr
        )))
    }
}

/// Strict MAC parse: exactly six parts, each exactly two hex digits.
fn parse_mac(text: &str) -> Option<[u8; MAC_ADDR_SIZE]> {
    let mut octets = [0u8; MAC_ADDR_SIZE];
    let mut count = 0;
    for part in text.split(':') {
        if count == MAC_ADDR_SIZE || part.len() != 2 {
            return None;
        }
        octets[count] = u8::from_str_radix(part, 16).ok()?;
        count += 1;
    }
    (count == MAC_ADDR_SIZE).then_some(octets)
}
