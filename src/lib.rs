//! # rawqp - raw-packet RDMA session setup and frame construction
//!
//! This crate establishes a point-to-point raw-Ethernet session over an
//! RDMA-capable NIC and hand-builds IPv4/UDP frames directly into
//! registered, hugepage-backed memory for zero-copy transmission.
//!
//! ## Design Philosophy
//!
//! ### Session-Centric Model
//!
//! Everything hangs off one [`session::Session`]:
//!
//! - **Send queue / Receive queue**: each owns a registered hugepage ring
//!   of cache-line-aligned packet slots plus its completion queue
//! - **Session common**: the raw-packet queue pair, its protection domain,
//!   and the device handles, driven through RESET -> INIT -> RTR -> RTS
//! - **Endpoints**: textual MAC/IPv4/port configuration parsed once into
//!   network-byte-order records
//!
//! A session is either fully valid or torn down: the first failure during
//! allocation unwinds everything already created, and every deinitialize
//! routine no-ops on absent resources.
//!
//! ### The Adapter Boundary
//!
//! The verbs/mlx5 driver stack is not part of this crate. The session core
//! reaches it through the [`adapter::Adapter`] trait - find/open devices,
//! register memory, create completion queues, create and modify queue
//! pairs - over opaque handles. Production code implements the trait over
//! a sys crate; tests drive the core with an in-memory simulator.
//!
//! ### In-Place Packet Construction
//!
//! Frames are never assembled in temporary buffers:
//!
//! ```ignore
//! let slot = session.build_packet(payload)?;     // written into the ring
//! let wr = session.send_queue_mut().unwrap().stage_send(seq)?;
//! // hand `wr` to the adapter's post path
//! ```
//!
//! Each frame starts on a 64-byte boundary so the NIC streaming one slot
//! over DMA never shares a cache line with software touching its
//! neighbour.
//!
//! ## Module Overview
//!
//! - [`session`]: session lifecycle and the queue-pair state machine
//! - [`queue`]: packet rings, descriptors, ring-slot alignment
//! - [`packet`]: Ethernet/IPv4/UDP layout, builder, header checksum
//! - [`endpoint`]: textual address parsing into wire form
//! - [`hugepage`]: 2 MiB shared-memory segments for DMA rings
//! - [`adapter`]: the capability surface required from the driver stack
//! - [`config`]: caller-supplied session parameters
//! - [`error`]: the closed error taxonomy
//! - [`types`]: port and queue-pair state types

pub mod adapter;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod hugepage;
pub mod packet;
pub mod queue;
pub mod session;
pub mod types;

pub use config::UserParam;
pub use endpoint::{parse_endpoint, IPV4UDPEndpoint};
pub use error::{Error, ErrorKind, Result};
pub use hugepage::{allocate_huge_memory, round_up_to_hugepage, HugePageMemory};
pub use packet::{ipv4_header_checksum, make_ipv4_packet, set_packet_id, PacketView};
pub use queue::{align_up, Direction, PacketSlot, Queue};
pub use session::{check_port, Session, SessionCommon};
pub use types::{LinkLayer, Mtu, PortInfo, PortState, QpState};
