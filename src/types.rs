//! Port and queue-pair state types.
//!
//! Numeric values mirror the corresponding ibverbs constants so an adapter
//! backed by a sys crate can convert with a plain cast.

/// Logical port state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PortState {
    /// No state change.
    Nop = 0,
    /// Port is down.
    Down = 1,
    /// Port is initializing.
    Init = 2,
    /// Port is armed and ready to transition to active.
    Armed = 3,
    /// Port is active and fully operational.
    Active = 4,
    /// Port is active but deferred for link training.
    ActiveDefer = 5,
}

impl From<u32> for PortState {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::Nop,
            1 => Self::Down,
            2 => Self::Init,
            3 => Self::Armed,
            4 => Self::Active,
            5 => Self::ActiveDefer,
            _ => Self::Nop,
        }
    }
}

/// Link layer protocol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkLayer {
    /// Unspecified link layer.
    Unspecified = 0,
    /// InfiniBand link layer.
    InfiniBand = 1,
    /// Ethernet link layer (RoCE).
    Ethernet = 2,
}

impl From<u8> for LinkLayer {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::InfiniBand,
            2 => Self::Ethernet,
            _ => Self::Unspecified,
        }
    }
}

/// Queue-pair state machine states.
///
/// Transitions are one-directional and monotonic within one session:
/// RESET -> INIT -> RTR -> RTS. There is no supported path back to an
/// earlier state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QpState {
    /// Just created, not yet bound to a port.
    Reset,
    /// Port bound, ready to post receives.
    Init,
    /// Ready to receive.
    Rtr,
    /// Ready to send.
    Rts,
}

/// MTU (Maximum Transmission Unit) size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Mtu {
    /// 256 bytes.
    Mtu256 = 1,
    /// 512 bytes.
    Mtu512 = 2,
    /// 1024 bytes.
    Mtu1024 = 3,
    /// 2048 bytes.
    Mtu2048 = 4,
    /// 4096 bytes.
    Mtu4096 = 5,
}

impl Mtu {
    /// Returns the MTU size in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            Self::Mtu256 => 256,
            Self::Mtu512 => 512,
            Self::Mtu1024 => 1024,
            Self::Mtu2048 => 2048,
            Self::Mtu4096 => 4096,
        }
    }
}

/// Port attributes the session core cares about.
///
/// A raw-packet session requires `state == Active` and
/// `link_layer == Ethernet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortInfo {
    /// Logical port state.
    pub state: PortState,
    /// Link layer the port is configured for.
    pub link_layer: LinkLayer,
}
