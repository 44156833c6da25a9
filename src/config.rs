//! Session configuration.

use crate::error::{Error, Result};

/// MAC address length in bytes.
pub const MAC_ADDR_SIZE: usize = 6;

/// Scatter/gather descriptors kept per queue for burst posting.
pub const MAX_PACKET_BURST_SIZE: usize = 2;

/// Default send ring depth.
pub const MAX_SEND_QUEUE_ENTRIES: u32 = 128;

/// Default receive ring depth.
pub const MAX_RECV_QUEUE_ENTRIES: u32 = 128;

/// Completion queue depth created per queue.
pub const MAX_COMPLETION_QUEUE_ENTRIES: u32 = 128;

/// Caller-supplied session configuration, immutable for the session
/// lifetime.
///
/// All addresses are textual; [`crate::endpoint::parse_endpoint`] converts
/// them to wire-ready binary form during session allocation.
#[derive(Debug, Clone)]
pub struct UserParam {
    /// Adapter device name, e.g. `rocep1s0f1`.
    pub device_name: String,
    /// Client MAC as six colon-separated hex octets.
    pub client_mac: String,
    /// Server MAC as six colon-separated hex octets.
    pub server_mac: String,
    /// Client IPv4 address in dotted-quad form.
    pub client_ip: String,
    /// Server IPv4 address in dotted-quad form.
    pub server_ip: String,
    /// Client UDP port, host order.
    pub client_port: u16,
    /// Server UDP port, host order.
    pub server_port: u16,
    /// Iterations the driving benchmark intends to run. Recorded for the
    /// caller; the session core does not interpret it.
    pub iters: u32,
    /// Send ring depth; zero selects [`MAX_SEND_QUEUE_ENTRIES`].
    pub tx_queue_size: u32,
    /// Receive ring depth; zero selects [`MAX_RECV_QUEUE_ENTRIES`].
    pub rx_queue_size: u32,
    /// Payload bytes per packet; sizes the ring slots.
    pub payload_size: u16,
    /// Physical port, one-based (some NICs are dual port).
    pub port_id: u8,
    /// Back the packet rings with 2 MiB hugepages rather than plain shared
    /// memory.
    pub use_huge_pages: bool,
    /// Whether this endpoint plays the server role; swaps the src/dst
    /// endpoints used for outgoing frames.
    pub is_server: bool,
}

impl Default for UserParam {
    fn default() -> Self {
        Self {
            device_name: String::new(),
            client_mac: String::new(),
            server_mac: String::new(),
            client_ip: String::new(),
            server_ip: String::new(),
            client_port: 0,
            server_port: 0,
            iters: 1,
            tx_queue_size: MAX_SEND_QUEUE_ENTRIES,
            rx_queue_size: MAX_RECV_QUEUE_ENTRIES,
            payload_size: 0,
            port_id: 1,
            use_huge_pages: true,
            is_server: false,
        }
    }
}

impl UserParam {
    /// Check the structural invariants a session requires.
    ///
    /// # Errors
    /// `ApiError` when `port_id` is zero (ports are one-based) or
    /// `payload_size` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.port_id == 0 {
            return Err(Error::ApiError(
                "port_id is one-based and must be greater than zero".to_string(),
            ));
        }
        if self.payload_size == 0 {
            return Err(Error::ApiError(
                "payload_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective send ring depth.
    pub fn tx_depth(&self) -> u32 {
        if self.tx_queue_size == 0 {
            MAX_SEND_QUEUE_ENTRIES
        } else {
            self.tx_queue_size
        }
    }

    /// Effective receive ring depth.
    pub fn rx_depth(&self) -> u32 {
        if self.rx_queue_size == 0 {
            MAX_RECV_QUEUE_ENTRIES
        } else {
            self.rx_queue_size
        }
    }
}
