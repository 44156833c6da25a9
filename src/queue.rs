//! Send/receive queue state over a registered hugepage region.
//!
//! A queue owns one hugepage region and treats the whole of it as a ring
//! of packet slots. Slot placement is cache-line-aligned so the NIC
//! streaming one slot over DMA never shares a cache line with software
//! touching a neighbouring slot.

use tracing::warn;

use crate::adapter::{AccessFlags, Adapter, ContextHandle, CqHandle, MrHandle, PdHandle};
use crate::config::{MAX_COMPLETION_QUEUE_ENTRIES, MAX_PACKET_BURST_SIZE};
use crate::error::{Error, Result};
use crate::hugepage::HugePageMemory;
use crate::packet::{PacketView, PACKET_HEADER_SIZE};

/// CPU cache line size in bytes; every ring slot starts on this boundary.
pub const CPU_CACHE_LINE_SIZE: usize = 64;

/// Round `offset` up to the next multiple of `align`.
///
/// `align` must be a power of two.
pub fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// Scatter/gather element describing one contiguous registered range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sge {
    /// Start address of the range.
    pub addr: u64,
    /// Length of the range in bytes.
    pub length: u32,
    /// Local key of the registration covering the range.
    pub lkey: u32,
}

/// Work request describing one outgoing frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendWorkRequest {
    /// Caller-chosen identifier returned with the completion.
    pub wr_id: u64,
    /// The frame to transmit.
    pub sge: Sge,
    /// Whether this request should generate a completion entry.
    pub signaled: bool,
}

/// Work request describing one receive landing slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecvWorkRequest {
    /// Caller-chosen identifier returned with the completion.
    pub wr_id: u64,
    /// The slot an incoming frame may land in.
    pub sge: Sge,
}

/// Queue direction, fixed at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Outgoing frames.
    Send,
    /// Incoming frames.
    Recv,
}

/// Direction-tagged work-request storage.
///
/// A queue is statically either a send queue or a receive queue for its
/// whole lifetime; the tag is chosen once at initialization.
#[derive(Debug)]
pub enum WorkRequests {
    /// Send descriptors.
    Send(Box<[SendWorkRequest]>),
    /// Receive descriptors.
    Recv(Box<[RecvWorkRequest]>),
}

impl WorkRequests {
    fn direction(&self) -> Direction {
        match self {
            WorkRequests::Send(_) => Direction::Send,
            WorkRequests::Recv(_) => Direction::Recv,
        }
    }

    fn len(&self) -> usize {
        match self {
            WorkRequests::Send(wrs) => wrs.len(),
            WorkRequests::Recv(wrs) => wrs.len(),
        }
    }
}

/// Offset and length of one built packet within its queue's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketSlot {
    /// Byte offset of the frame within the region.
    pub offset: usize,
    /// Frame length in bytes (headers plus payload).
    pub len: usize,
}

/// One direction of a session: a registered packet ring plus its
/// completion queue and descriptor storage.
#[derive(Debug)]
pub struct Queue {
    memory: HugePageMemory,
    /// Region byte extents: `end - start` equals the hugepage actual size.
    start: usize,
    end: usize,
    mr: Option<MrHandle>,
    cq: Option<CqHandle>,
    sges: [Sge; MAX_PACKET_BURST_SIZE],
    requests: WorkRequests,
    /// Monotonic count of consumed (completed) slots.
    read_index: u64,
    /// Monotonic count of produced slots.
    write_index: u64,
    /// Cache-line-aligned byte offset where the next packet starts.
    cursor: usize,
    /// Most recently built packet, if any.
    last_packet: Option<PacketSlot>,
    /// Reserved bytes per ring slot (headers + payload, cache aligned).
    slot_capacity: usize,
}

impl Queue {
    /// Register `memory` with the adapter and create the queue's
    /// completion queue.
    ///
    /// The region extents cover the full hugepage allocation; registration
    /// asks for local write and relaxed ordering. `depth` sizes the
    /// descriptor array and `payload_size` sizes the ring slots.
    ///
    /// # Errors
    /// `ApiError` if registration or CQ creation is rejected. No partially
    /// registered queue survives a failure: anything created before the
    /// failing step is released before the error returns.
    pub fn initialize<A: Adapter>(
        adapter: &mut A,
        pd: PdHandle,
        context: ContextHandle,
        mut memory: HugePageMemory,
        direction: Direction,
        depth: u32,
        payload_size: u16,
    ) -> Result<Queue> {
        let start = 0usize;
        let end = memory.actual_size() as usize;

        let slot_capacity = align_up(
            PACKET_HEADER_SIZE + payload_size as usize,
            CPU_CACHE_LINE_SIZE,
        );
        if slot_capacity > end - start {
            return Err(Error::ApiError(format!(
                "ring slot of {} bytes cannot fit a {} byte region",
                slot_capacity,
                end - start
            )));
        }

        let mr = adapter
            .register_memory(
                pd,
                memory.as_mut_slice().as_mut_ptr(),
                end,
                AccessFlags::LOCAL_WRITE | AccessFlags::RELAXED_ORDERING,
            )
            .map_err(|e| {
                warn!(len = end, "memory registration failed: {}", e);
                e
            })?;

        let cq = match adapter.create_cq(context, MAX_COMPLETION_QUEUE_ENTRIES) {
            Ok(cq) => cq,
            Err(e) => {
                warn!("completion queue creation failed: {}", e);
                if let Err(dereg) = adapter.deregister_memory(mr) {
                    warn!("cleanup deregistration failed: {}", dereg);
                }
                return Err(e);
            }
        };

        let requests = match direction {
            Direction::Send => WorkRequests::Send(
                vec![SendWorkRequest::default(); depth as usize].into_boxed_slice(),
            ),
            Direction::Recv => WorkRequests::Recv(
                vec![RecvWorkRequest::default(); depth as usize].into_boxed_slice(),
            ),
        };

        Ok(Queue {
            memory,
            start,
            end,
            mr: Some(mr),
            cq: Some(cq),
            sges: [Sge::default(); MAX_PACKET_BURST_SIZE],
            requests,
            read_index: 0,
            write_index: 0,
            cursor: start,
            last_packet: None,
            slot_capacity,
        })
    }

    /// Destroy the completion queue, deregister the memory, and reset all
    /// cursors and descriptors.
    ///
    /// Idempotent and safe on a partially initialized queue: absent
    /// handles are skipped. The backing memory stays mapped until the
    /// queue itself is dropped, so deregistration always precedes unmap.
    pub fn deinitialize<A: Adapter>(&mut self, adapter: &mut A) {
        if let Some(cq) = self.cq.take() {
            if let Err(e) = adapter.destroy_cq(cq) {
                warn!("destroy_cq failed: {}", e);
            }
        }
        if let Some(mr) = self.mr.take() {
            if let Err(e) = adapter.deregister_memory(mr) {
                warn!("deregister_memory failed: {}", e);
            }
        }
        self.sges = [Sge::default(); MAX_PACKET_BURST_SIZE];
        self.read_index = 0;
        self.write_index = 0;
        self.cursor = self.start;
        self.last_packet = None;
    }

    /// Stage a send descriptor for the most recently built packet.
    ///
    /// Fills the next scatter/gather element and send work request with
    /// the frame's address, length, and the region's local key.
    ///
    /// # Errors
    /// `ApiError` if this is not a send queue, no packet has been built,
    /// or the queue has been deinitialized.
    pub fn stage_send(&mut self, wr_id: u64) -> Result<&SendWorkRequest> {
        if self.requests.direction() != Direction::Send {
            return Err(Error::ApiError(
                "stage_send on a receive queue".to_string(),
            ));
        }
        let slot = self.last_packet.ok_or_else(|| {
            Error::ApiError("no packet built to stage".to_string())
        })?;
        let mr = self
            .mr
            .ok_or_else(|| Error::ApiError("queue is not initialized".to_string()))?;

        let index = (self.write_index.wrapping_sub(1) % self.requests.len() as u64) as usize;
        let sge = Sge {
            addr: (self.memory.base_addr() + slot.offset) as u64,
            length: slot.len as u32,
            lkey: mr.lkey,
        };
        self.sges[index % MAX_PACKET_BURST_SIZE] = sge;

        match &mut self.requests {
            WorkRequests::Send(wrs) => {
                wrs[index] = SendWorkRequest {
                    wr_id,
                    sge,
                    signaled: true,
                };
                Ok(&wrs[index])
            }
            WorkRequests::Recv(_) => unreachable!("direction checked above"),
        }
    }

    /// Stage a receive descriptor for the next free ring slot and advance
    /// the write cursor past it.
    ///
    /// # Errors
    /// `ApiError` if this is not a receive queue or the queue has been
    /// deinitialized.
    pub fn stage_recv(&mut self, wr_id: u64) -> Result<&RecvWorkRequest> {
        if self.requests.direction() != Direction::Recv {
            return Err(Error::ApiError(
                "stage_recv on a send queue".to_string(),
            ));
        }
        let mr = self
            .mr
            .ok_or_else(|| Error::ApiError("queue is not initialized".to_string()))?;

        let at = if self.cursor + self.slot_capacity > self.end {
            self.start
        } else {
            self.cursor
        };
        let sge = Sge {
            addr: (self.memory.base_addr() + at) as u64,
            length: self.slot_capacity as u32,
            lkey: mr.lkey,
        };

        let index = (self.write_index % self.requests.len() as u64) as usize;
        self.sges[index % MAX_PACKET_BURST_SIZE] = sge;
        self.cursor = at + self.slot_capacity;
        self.write_index += 1;

        match &mut self.requests {
            WorkRequests::Recv(wrs) => {
                wrs[index] = RecvWorkRequest { wr_id, sge };
                Ok(&wrs[index])
            }
            WorkRequests::Send(_) => unreachable!("direction checked above"),
        }
    }

    /// Mark `count` produced slots as consumed.
    pub fn advance_read(&mut self, count: u64) {
        self.read_index = self.read_index.saturating_add(count).min(self.write_index);
    }

    /// Produced slots not yet consumed.
    pub fn outstanding(&self) -> u64 {
        self.write_index - self.read_index
    }

    /// A bounds-checked view of one built packet.
    pub fn packet(&self, slot: PacketSlot) -> PacketView<'_> {
        PacketView::new(&self.memory.as_slice()[slot.offset..slot.offset + slot.len])
    }

    /// Record a freshly built packet and move the cursor to the next
    /// cache-line-aligned slot.
    pub(crate) fn record_packet(&mut self, slot: PacketSlot, next_cursor: usize) {
        self.last_packet = Some(slot);
        self.cursor = next_cursor;
        self.write_index += 1;
    }

    /// Start offset of the region (always zero).
    pub fn start(&self) -> usize {
        self.start
    }

    /// End offset of the region; `end - start` equals the hugepage size.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Current write cursor: where the next packet will be placed.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Monotonic produced-slot counter.
    pub fn write_index(&self) -> u64 {
        self.write_index
    }

    /// Monotonic consumed-slot counter.
    pub fn read_index(&self) -> u64 {
        self.read_index
    }

    /// Queue direction.
    pub fn direction(&self) -> Direction {
        self.requests.direction()
    }

    /// Descriptor ring depth.
    pub fn depth(&self) -> usize {
        self.requests.len()
    }

    /// Reserved bytes per ring slot.
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Offset and length of the most recently built packet.
    pub fn last_packet(&self) -> Option<PacketSlot> {
        self.last_packet
    }

    /// Registration handle, while initialized.
    pub fn mr(&self) -> Option<MrHandle> {
        self.mr
    }

    /// Completion queue handle, while initialized.
    pub fn cq(&self) -> Option<CqHandle> {
        self.cq
    }

    /// Base address of the mapped region.
    pub fn base_addr(&self) -> usize {
        self.memory.base_addr()
    }

    /// The backing memory.
    pub fn memory(&self) -> &HugePageMemory {
        &self.memory
    }

    /// The whole region as bytes.
    pub fn region(&self) -> &[u8] {
        self.memory.as_slice()
    }

    /// The whole region as writable bytes.
    pub fn region_mut(&mut self) -> &mut [u8] {
        self.memory.as_mut_slice()
    }
}
