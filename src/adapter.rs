//! Adapter collaborator surface.
//!
//! The verbs/mlx5 driver stack itself is outside this crate: the session
//! core only needs a small set of capabilities from it (register memory,
//! create completion queues, create and drive queue pairs). This module
//! expresses that surface as the [`Adapter`] trait over opaque handles. A
//! production implementation wraps a verbs sys crate; tests drive the core
//! with an in-memory simulator.
//!
//! Handles are plain identifiers issued by the adapter. The core never
//! interprets them; it only stores them and passes them back for the
//! matching destroy call, in strict dependents-first order.

use bitflags::bitflags;

use crate::error::Result;
use crate::types::{Mtu, PortInfo, QpState};

/// Opaque handle to one enumerated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Opaque handle to a device-list snapshot taken at enumeration time.
///
/// Must be released with [`Adapter::free_device_list`] after the context
/// that was opened from it has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceListHandle(pub u64);

/// Opaque handle to an opened device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Opaque handle to a protection domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PdHandle(pub u64);

/// Handle to a registered memory region.
///
/// Carries the local key the adapter assigned at registration; the lkey is
/// what scatter/gather descriptors reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MrHandle {
    /// Adapter-issued registration identifier.
    pub raw: u64,
    /// Local access key for scatter/gather descriptors.
    pub lkey: u32,
}

/// Opaque handle to a completion queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CqHandle(pub u64);

/// Opaque handle to a queue pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QpHandle(pub u64);

bitflags! {
    /// Memory access flags for memory region registration.
    ///
    /// Values mirror the corresponding `ibv_access_flags` bits. Local read
    /// access is always implied.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        /// Enable local write access.
        const LOCAL_WRITE = 1 << 0;

        /// Allow the NIC to relax the order of data transfer between the
        /// network and the target memory region. Completion semantics are
        /// unchanged: a completion still ensures all prior data is visible.
        const RELAXED_ORDERING = 1 << 20;
    }
}

/// Raw-packet queue pair creation attributes.
#[derive(Debug, Clone, Copy)]
pub struct QpInitAttr {
    /// Completion queue reporting send completions.
    pub send_cq: CqHandle,
    /// Completion queue reporting receive completions.
    pub recv_cq: CqHandle,
    /// Maximum outstanding send work requests.
    pub max_send_wr: u32,
    /// Maximum outstanding receive work requests.
    pub max_recv_wr: u32,
    /// Scatter/gather entries per send work request.
    pub max_send_sge: u32,
    /// Scatter/gather entries per receive work request.
    pub max_recv_sge: u32,
    /// Maximum inline payload; raw-packet sessions use zero.
    pub max_inline_data: u32,
}

/// Capability surface the session core requires from the RDMA adapter stack.
///
/// Every method maps one-to-one onto a verbs call. Implementations own the
/// handle namespace; the core holds handles only between the create call and
/// the matching destroy call.
pub trait Adapter {
    /// Snapshot the device list and locate `name` within it.
    ///
    /// On success the returned snapshot stays live until
    /// [`free_device_list`](Self::free_device_list); the device handle is
    /// valid for the snapshot's lifetime. On failure no snapshot is retained
    /// by the caller.
    ///
    /// # Errors
    /// `NoDevice` if enumeration finds nothing or `name` is not present.
    fn find_device(&mut self, name: &str) -> Result<(DeviceListHandle, DeviceHandle)>;

    /// Release a device-list snapshot.
    fn free_device_list(&mut self, list: DeviceListHandle);

    /// Open a context on an enumerated device.
    ///
    /// # Errors
    /// `NoDevice` if the device cannot be opened.
    fn open_device(&mut self, device: DeviceHandle) -> Result<ContextHandle>;

    /// Close an opened context.
    fn close_device(&mut self, context: ContextHandle) -> Result<()>;

    /// Query state and link layer of a physical port (one-based).
    fn query_port(&mut self, context: ContextHandle, port_id: u8) -> Result<PortInfo>;

    /// Set the active MTU of a physical port (one-based).
    fn set_mtu(&mut self, context: ContextHandle, mtu: Mtu, port_id: u8) -> Result<()>;

    /// Allocate a protection domain on the context.
    fn alloc_pd(&mut self, context: ContextHandle) -> Result<PdHandle>;

    /// Deallocate a protection domain. All registrations and queue pairs in
    /// the domain must have been released first.
    fn dealloc_pd(&mut self, pd: PdHandle) -> Result<()>;

    /// Register `[addr, addr + len)` for DMA access within `pd`.
    ///
    /// The caller keeps the memory mapped for the whole lifetime of the
    /// returned handle; deregistration strictly precedes unmapping.
    fn register_memory(
        &mut self,
        pd: PdHandle,
        addr: *mut u8,
        len: usize,
        access: AccessFlags,
    ) -> Result<MrHandle>;

    /// Deregister a memory region.
    fn deregister_memory(&mut self, mr: MrHandle) -> Result<()>;

    /// Create a completion queue with at least `depth` entries.
    fn create_cq(&mut self, context: ContextHandle, depth: u32) -> Result<CqHandle>;

    /// Destroy a completion queue.
    fn destroy_cq(&mut self, cq: CqHandle) -> Result<()>;

    /// Create a raw-packet queue pair bound to the attribute block's
    /// completion queues.
    fn create_qp(&mut self, pd: PdHandle, attr: &QpInitAttr) -> Result<QpHandle>;

    /// Destroy a queue pair.
    fn destroy_qp(&mut self, qp: QpHandle) -> Result<()>;

    /// Issue a queue-pair state transition, binding `port_id` where the
    /// target state requires it.
    ///
    /// Returns the adapter's raw status code unmodified; zero means the
    /// transition took effect, non-zero means it was rejected.
    fn modify_qp(&mut self, qp: QpHandle, target: QpState, port_id: u8) -> i32;
}
