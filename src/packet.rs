//! In-place Ethernet/IPv4/UDP frame construction.
//!
//! Frames are written directly into a queue's registered ring so the
//! adapter can transmit them without a copy. Header fields live at fixed
//! offsets from the frame start and every multi-byte field is emitted in
//! network byte order; access goes through bounds-checked slices, never
//! pointer reinterpretation.

use crate::endpoint::IPV4UDPEndpoint;
use crate::error::{Error, Result};
use crate::queue::{align_up, PacketSlot, Queue, CPU_CACHE_LINE_SIZE};

/// Ethernet header bytes on the wire.
pub const ETH_HEADER_SIZE: usize = 14;
/// IPv4 header bytes (IHL=5, no options).
pub const IPV4_HEADER_SIZE: usize = 20;
/// UDP header bytes.
pub const UDP_HEADER_SIZE: usize = 8;
/// Total header bytes preceding the payload.
pub const PACKET_HEADER_SIZE: usize = ETH_HEADER_SIZE + IPV4_HEADER_SIZE + UDP_HEADER_SIZE;

/// EtherType for IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// IP protocol number for UDP.
pub const IPPROTO_UDP: u8 = 17;
/// Hop limit stamped into every frame.
pub const IPV4_TTL: u8 = 64;
/// Version 4, header length 5 words.
const IPV4_VERSION_IHL: u8 = 0x45;

// Field offsets from the frame start.
const OFF_DST_MAC: usize = 0;
const OFF_SRC_MAC: usize = 6;
const OFF_ETHERTYPE: usize = 12;
const OFF_VERSION_IHL: usize = 14;
const OFF_TOS: usize = 15;
const OFF_IPV4_TOTAL_LEN: usize = 16;
const OFF_IPV4_ID: usize = 18;
const OFF_IPV4_FRAG: usize = 20;
const OFF_IPV4_TTL: usize = 22;
const OFF_IPV4_PROTO: usize = 23;
const OFF_IPV4_CHECKSUM: usize = 24;
const OFF_IPV4_SRC: usize = 26;
const OFF_IPV4_DST: usize = 30;
const OFF_UDP_SRC_PORT: usize = 34;
const OFF_UDP_DST_PORT: usize = 36;
const OFF_UDP_LEN: usize = 38;
const OFF_UDP_CHECKSUM: usize = 40;

/// Build one Ethernet/IPv4/UDP frame at the queue's write cursor.
///
/// The frame starts at the current (cache-line-aligned) cursor; the cursor
/// then advances to the next 64-byte boundary past the frame, wrapping to
/// the region start when the next frame would run past the region end.
/// The IPv4 identification field is left zero so the caller can stamp a
/// sequence number afterwards (see [`set_packet_id`]); the UDP checksum is
/// intentionally left zero.
///
/// Returns the offset and length of the built frame.
///
/// # Errors
/// `ApiError` when the payload is empty or the frame would exceed the
/// queue's reserved slot capacity.
pub fn make_ipv4_packet(
    queue: &mut Queue,
    src: &IPV4UDPEndpoint,
    dst: &IPV4UDPEndpoint,
    payload: &[u8],
) -> Result<PacketSlot> {
    if payload.is_empty() {
        return Err(Error::ApiError("payload must not be empty".to_string()));
    }
    let frame_len = PACKET_HEADER_SIZE + payload.len();
    if frame_len > queue.slot_capacity() {
        return Err(Error::ApiError(format!(
            "frame of {} bytes exceeds ring slot capacity of {} bytes",
            frame_len,
            queue.slot_capacity()
        )));
    }

    // Place the frame, wrapping if it would run past the region end, then
    // find where the packet built on the next call will start.
    let mut at = queue.cursor();
    if at + frame_len > queue.end() {
        at = queue.start();
    }
    let mut next = align_up(at + frame_len, CPU_CACHE_LINE_SIZE);
    if next >= queue.end() {
        next = queue.start();
    }

    let ipv4_total_len = (IPV4_HEADER_SIZE + UDP_HEADER_SIZE + payload.len()) as u16;
    let udp_total_len = (UDP_HEADER_SIZE + payload.len()) as u16;

    let region = queue.region_mut();
    let frame = &mut region[at..at + frame_len];

    // Ethernet header.
    frame[OFF_DST_MAC..OFF_DST_MAC + 6].copy_from_slice(&dst.mac);
    frame[OFF_SRC_MAC..OFF_SRC_MAC + 6].copy_from_slice(&src.mac);
    frame[OFF_ETHERTYPE..OFF_ETHERTYPE + 2].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

    // IPv4 header. Endpoint addresses and ports are already stored in
    // network order, so they are copied through as-is.
    frame[OFF_VERSION_IHL] = IPV4_VERSION_IHL;
    frame[OFF_TOS] = 0;
    frame[OFF_IPV4_TOTAL_LEN..OFF_IPV4_TOTAL_LEN + 2]
        .copy_from_slice(&ipv4_total_len.to_be_bytes());
    frame[OFF_IPV4_ID..OFF_IPV4_ID + 2].copy_from_slice(&0u16.to_be_bytes());
    frame[OFF_IPV4_FRAG..OFF_IPV4_FRAG + 2].copy_from_slice(&0u16.to_be_bytes());
    frame[OFF_IPV4_TTL] = IPV4_TTL;
    frame[OFF_IPV4_PROTO] = IPPROTO_UDP;
    frame[OFF_IPV4_CHECKSUM..OFF_IPV4_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());
    frame[OFF_IPV4_SRC..OFF_IPV4_SRC + 4].copy_from_slice(&src.ip_addr.to_ne_bytes());
    frame[OFF_IPV4_DST..OFF_IPV4_DST + 4].copy_from_slice(&dst.ip_addr.to_ne_bytes());

    // UDP header; checksum left zero.
    frame[OFF_UDP_SRC_PORT..OFF_UDP_SRC_PORT + 2].copy_from_slice(&src.port.to_ne_bytes());
    frame[OFF_UDP_DST_PORT..OFF_UDP_DST_PORT + 2].copy_from_slice(&dst.port.to_ne_bytes());
    frame[OFF_UDP_LEN..OFF_UDP_LEN + 2].copy_from_slice(&udp_total_len.to_be_bytes());
    frame[OFF_UDP_CHECKSUM..OFF_UDP_CHECKSUM + 2].copy_from_slice(&0u16.to_be_bytes());

    frame[PACKET_HEADER_SIZE..frame_len].copy_from_slice(payload);

    let cksum =
        ipv4_header_checksum(&frame[ETH_HEADER_SIZE..ETH_HEADER_SIZE + IPV4_HEADER_SIZE]);
    frame[OFF_IPV4_CHECKSUM..OFF_IPV4_CHECKSUM + 2].copy_from_slice(&cksum.to_be_bytes());

    let slot = PacketSlot {
        offset: at,
        len: frame_len,
    };
    queue.record_packet(slot, next);
    Ok(slot)
}

/// Stamp a sequence number into a built frame's IPv4 identification field.
pub fn set_packet_id(queue: &mut Queue, slot: PacketSlot, id: u16) {
    let region = queue.region_mut();
    let frame = &mut region[slot.offset..slot.offset + slot.len];
    frame[OFF_IPV4_ID..OFF_IPV4_ID + 2].copy_from_slice(&id.to_be_bytes());
}

/// One's-complement checksum over the 20-byte IPv4 header.
///
/// Sums the ten network-order 16-bit words with the checksum word treated
/// as zero, folds the carries, subtracts 65535 once if the folded sum
/// still exceeds it, and complements. A result of zero is reported as
/// 0xFFFF so the field never reads as "checksum absent".
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    debug_assert!(header.len() >= IPV4_HEADER_SIZE);
    let mut sum: u32 = 0;
    for word in 0..IPV4_HEADER_SIZE / 2 {
        if word == 5 {
            continue; // the checksum field itself
        }
        let i = word * 2;
        sum += u32::from(u16::from_be_bytes([header[i], header[i + 1]]));
    }
    sum = ((sum & 0xFFFF_0000) >> 16) + (sum & 0x0000_FFFF);
    if sum > 65535 {
        sum -= 65535;
    }
    let mut cksum = !sum & 0x0000_FFFF;
    if cksum == 0 {
        cksum = 0xFFFF;
    }
    cksum as u16
}

/// Bounds-checked read access to one built frame.
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    bytes: &'a [u8],
}

impl<'a> PacketView<'a> {
    /// Wrap a frame. The slice must hold at least the fixed headers.
    pub fn new(bytes: &'a [u8]) -> Self {
        assert!(bytes.len() >= PACKET_HEADER_SIZE);
        Self { bytes }
    }

    fn be16(&self, offset: usize) -> u16 {
        u16::from_be_bytes([self.bytes[offset], self.bytes[offset + 1]])
    }

    /// Destination MAC.
    pub fn dst_mac(&self) -> [u8; 6] {
        self.bytes[OFF_DST_MAC..OFF_DST_MAC + 6].try_into().unwrap()
    }

    /// Source MAC.
    pub fn src_mac(&self) -> [u8; 6] {
        self.bytes[OFF_SRC_MAC..OFF_SRC_MAC + 6].try_into().unwrap()
    }

    /// EtherType, host order.
    pub fn ethertype(&self) -> u16 {
        self.be16(OFF_ETHERTYPE)
    }

    /// Combined version/IHL byte.
    pub fn version_ihl(&self) -> u8 {
        self.bytes[OFF_VERSION_IHL]
    }

    /// IPv4 total length, host order.
    pub fn ipv4_total_len(&self) -> u16 {
        self.be16(OFF_IPV4_TOTAL_LEN)
    }

    /// IPv4 identification, host order.
    pub fn ipv4_id(&self) -> u16 {
        self.be16(OFF_IPV4_ID)
    }

    /// Time to live.
    pub fn ttl(&self) -> u8 {
        self.bytes[OFF_IPV4_TTL]
    }

    /// IP protocol number.
    pub fn protocol(&self) -> u8 {
        self.bytes[OFF_IPV4_PROTO]
    }

    /// IPv4 header checksum, host order.
    pub fn ipv4_checksum(&self) -> u16 {
        self.be16(OFF_IPV4_CHECKSUM)
    }

    /// Source IPv4 address bytes as they appear on the wire.
    pub fn src_ip(&self) -> [u8; 4] {
        self.bytes[OFF_IPV4_SRC..OFF_IPV4_SRC + 4].try_into().unwrap()
    }

    /// Destination IPv4 address bytes as they appear on the wire.
    pub fn dst_ip(&self) -> [u8; 4] {
        self.bytes[OFF_IPV4_DST..OFF_IPV4_DST + 4].try_into().unwrap()
    }

    /// UDP source port, host order.
    pub fn src_port(&self) -> u16 {
        self.be16(OFF_UDP_SRC_PORT)
    }

    /// UDP destination port, host order.
    pub fn dst_port(&self) -> u16 {
        self.be16(OFF_UDP_DST_PORT)
    }

    /// UDP length, host order.
    pub fn udp_len(&self) -> u16 {
        self.be16(OFF_UDP_LEN)
    }

    /// UDP checksum, host order (always zero for built frames).
    pub fn udp_checksum(&self) -> u16 {
        self.be16(OFF_UDP_CHECKSUM)
    }

    /// The payload bytes.
    pub fn payload(&self) -> &'a [u8] {
        &self.bytes[PACKET_HEADER_SIZE..]
    }

    /// The IPv4 header bytes.
    pub fn ipv4_header(&self) -> &'a [u8] {
        &self.bytes[ETH_HEADER_SIZE..ETH_HEADER_SIZE + IPV4_HEADER_SIZE]
    }

    /// The whole frame.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }
}
