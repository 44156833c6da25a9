//! Session lifecycle: allocation, queue-pair state machine, teardown.
//!
//! A session is either fully valid or torn down: the allocation path
//! unwinds everything it created on the first failure, and every
//! deinitialize routine no-ops on absent sub-resources so teardown is safe
//! at any point after partial initialization.

use tracing::{info, warn};

use crate::adapter::{Adapter, ContextHandle, CqHandle, DeviceHandle, DeviceListHandle, PdHandle, QpHandle, QpInitAttr};
use crate::config::UserParam;
use crate::endpoint::{parse_endpoint, IPV4UDPEndpoint};
use crate::error::{Error, Result};
use crate::hugepage::{allocate_huge_memory, HugePageMemory};
use crate::packet::{make_ipv4_packet, PACKET_HEADER_SIZE};
use crate::queue::{align_up, Direction, PacketSlot, Queue, CPU_CACHE_LINE_SIZE};
use crate::types::{LinkLayer, Mtu, PortState, QpState};

/// Require that `port_id` on `context` is capable of sending and
/// receiving raw Ethernet frames.
///
/// # Errors
/// `NoDevice` unless the port is active with an Ethernet link layer.
pub fn check_port<A: Adapter>(adapter: &mut A, context: ContextHandle, port_id: u8) -> Result<()> {
    let port = adapter.query_port(context, port_id)?;
    if port.state != PortState::Active {
        warn!(port_id, state = ?port.state, "port is not active");
        return Err(Error::NoDevice(format!(
            "port {} not active (state {:?})",
            port_id, port.state
        )));
    }
    if port.link_layer != LinkLayer::Ethernet {
        warn!(port_id, link_layer = ?port.link_layer, "port is not configured for ethernet");
        return Err(Error::NoDevice(format!(
            "port {} not configured for ethernet (link layer {:?})",
            port_id, port.link_layer
        )));
    }
    Ok(())
}

/// State shared by both directions of a session: the queue pair, its
/// protection domain, and the device handles it was created over.
///
/// The queue pair's lifetime is bounded by this struct; teardown destroys
/// dependents before the resources they depend on.
#[derive(Debug)]
pub struct SessionCommon {
    qp: Option<QpHandle>,
    pd: Option<PdHandle>,
    context: Option<ContextHandle>,
    device: Option<DeviceHandle>,
    device_list: Option<DeviceListHandle>,
    state: QpState,
}

impl SessionCommon {
    fn new() -> Self {
        Self {
            qp: None,
            pd: None,
            context: None,
            device: None,
            device_list: None,
            state: QpState::Reset,
        }
    }

    /// Create the raw-packet queue pair over both completion queues and
    /// immediately drive it RESET -> INIT, binding the physical port.
    ///
    /// # Errors
    /// `ApiError` if queue-pair creation or the INIT transition fails; the
    /// state is not usable until INIT succeeds.
    fn initialize<A: Adapter>(
        &mut self,
        adapter: &mut A,
        param: &UserParam,
        send_cq: CqHandle,
        recv_cq: CqHandle,
    ) -> Result<()> {
        let pd = self
            .pd
            .ok_or_else(|| Error::ApiError("no protection domain allocated".to_string()))?;

        let attr = QpInitAttr {
            send_cq,
            recv_cq,
            max_send_wr: param.tx_depth(),
            max_recv_wr: param.rx_depth(),
            max_send_sge: 1,
            max_recv_sge: 1,
            max_inline_data: 0,
        };

        let qp = adapter.create_qp(pd, &attr).map_err(|e| {
            warn!("create_qp failed: {}", e);
            e
        })?;
        self.qp = Some(qp);

        self.transition(adapter, QpState::Init, param.port_id)
    }

    /// Issue one monotonic state transition.
    fn transition<A: Adapter>(
        &mut self,
        adapter: &mut A,
        target: QpState,
        port_id: u8,
    ) -> Result<()> {
        let required = match target {
            QpState::Init => QpState::Reset,
            QpState::Rtr => QpState::Init,
            QpState::Rts => QpState::Rtr,
            QpState::Reset => {
                return Err(Error::ApiError(
                    "there is no path back to RESET within a session".to_string(),
                ))
            }
        };
        if self.state != required {
            return Err(Error::ApiError(format!(
                "cannot enter {:?} from {:?}; transitions are monotonic and {:?} is required",
                target, self.state, required
            )));
        }
        let qp = self
            .qp
            .ok_or_else(|| Error::ApiError("no queue pair created".to_string()))?;

        let rc = adapter.modify_qp(qp, target, port_id);
        if rc != 0 {
            warn!(code = rc, "modify_qp to {:?} failed", target);
            return Err(Error::ApiError(format!(
                "modify_qp to {:?} failed (code {})",
                target, rc
            )));
        }
        self.state = target;
        Ok(())
    }

    /// Destroy the queue pair, the protection domain, the device context,
    /// and the device-list snapshot, in that order.
    ///
    /// Safe to call repeatedly and on partially populated state; teardown
    /// failures are logged and skipped.
    fn deinitialize<A: Adapter>(&mut self, adapter: &mut A) {
        if let Some(qp) = self.qp.take() {
            if let Err(e) = adapter.destroy_qp(qp) {
                warn!("destroy_qp failed: {}", e);
            }
        }
        if let Some(pd) = self.pd.take() {
            if let Err(e) = adapter.dealloc_pd(pd) {
                warn!("dealloc_pd failed: {}", e);
            }
        }
        if let Some(context) = self.context.take() {
            if let Err(e) = adapter.close_device(context) {
                warn!("close_device failed: {}", e);
            }
        }
        self.device = None;
        if let Some(list) = self.device_list.take() {
            adapter.free_device_list(list);
        }
        self.state = QpState::Reset;
    }

    /// Current queue-pair state.
    pub fn state(&self) -> QpState {
        self.state
    }

    /// Queue-pair handle, while initialized.
    pub fn qp(&self) -> Option<QpHandle> {
        self.qp
    }
}

/// One point-to-point raw-Ethernet session.
///
/// Aggregates one send queue, one receive queue, the shared queue-pair
/// state, the three backing memory regions, and the resolved endpoints.
/// The adapter and configuration are borrowed for the session's lifetime.
#[derive(Debug)]
pub struct Session<'a, A: Adapter> {
    adapter: &'a mut A,
    param: &'a UserParam,
    client: IPV4UDPEndpoint,
    server: IPV4UDPEndpoint,
    send: Option<Queue>,
    recv: Option<Queue>,
    common: SessionCommon,
    /// Region reserved for session-shared state.
    common_memory: Option<HugePageMemory>,
}

impl<'a, A: Adapter> Session<'a, A> {
    /// Allocate and initialize a full session.
    ///
    /// Resolves the textual endpoints, locates and opens the device,
    /// verifies the port, allocates the protection domain and the three
    /// hugepage regions, initializes both queues, and creates the queue
    /// pair in INIT state. On any failure everything allocated so far is
    /// torn down (best effort) before the error is returned; a partially
    /// initialized session is never handed to the caller.
    pub fn allocate(param: &'a UserParam, adapter: &'a mut A) -> Result<Session<'a, A>> {
        param.validate()?;

        let client = parse_endpoint(&param.client_mac, &param.client_ip, param.client_port)?;
        let server = parse_endpoint(&param.server_mac, &param.server_ip, param.server_port)?;

        // From here on, failure paths return through `?`; dropping the
        // partially built session unwinds whatever was allocated.
        let mut session = Session {
            adapter,
            param,
            client,
            server,
            send: None,
            recv: None,
            common: SessionCommon::new(),
            common_memory: None,
        };

        let (device_list, device) = session.adapter.find_device(&param.device_name)?;
        session.common.device_list = Some(device_list);
        session.common.device = Some(device);

        let context = session.adapter.open_device(device)?;
        session.common.context = Some(context);

        check_port(&mut *session.adapter, context, param.port_id)?;

        let pd = session.adapter.alloc_pd(context)?;
        session.common.pd = Some(pd);

        let slot_bytes = align_up(
            PACKET_HEADER_SIZE + param.payload_size as usize,
            CPU_CACHE_LINE_SIZE,
        ) as u64;
        let send_memory = allocate_huge_memory(
            u64::from(param.tx_depth()) * slot_bytes,
            param.use_huge_pages,
        )?;
        let recv_memory = allocate_huge_memory(
            u64::from(param.rx_depth()) * slot_bytes,
            param.use_huge_pages,
        )?;
        let common_memory = allocate_huge_memory(
            std::mem::size_of::<SessionCommon>() as u64,
            param.use_huge_pages,
        )?;
        session.common_memory = Some(common_memory);

        let send = Queue::initialize(
            &mut *session.adapter,
            pd,
            context,
            send_memory,
            Direction::Send,
            param.tx_depth(),
            param.payload_size,
        )?;
        session.send = Some(send);

        let recv = Queue::initialize(
            &mut *session.adapter,
            pd,
            context,
            recv_memory,
            Direction::Recv,
            param.rx_depth(),
            param.payload_size,
        )?;
        session.recv = Some(recv);

        let send_cq = session
            .send
            .as_ref()
            .and_then(Queue::cq)
            .ok_or_else(|| Error::ApiError("send queue has no completion queue".to_string()))?;
        let recv_cq = session
            .recv
            .as_ref()
            .and_then(Queue::cq)
            .ok_or_else(|| Error::ApiError("receive queue has no completion queue".to_string()))?;

        session
            .common
            .initialize(&mut *session.adapter, param, send_cq, recv_cq)?;

        info!(device = %param.device_name, port = param.port_id, "session allocated; queue pair in INIT");
        Ok(session)
    }

    /// Drive the queue pair INIT -> RTR.
    ///
    /// Raw-packet queue pairs need no remote address resolution, so this
    /// commits no routing information. Must not be skipped: `set_rts`
    /// before RTR is rejected.
    ///
    /// # Errors
    /// `ApiError` when called out of order or when the adapter rejects
    /// the transition (the adapter's code is carried in the message).
    pub fn set_rtr(&mut self) -> Result<()> {
        self.common
            .transition(&mut *self.adapter, QpState::Rtr, self.param.port_id)
    }

    /// Drive the queue pair RTR -> RTS, making it eligible to post sends.
    ///
    /// # Errors
    /// Same contract as [`set_rtr`](Self::set_rtr).
    pub fn set_rts(&mut self) -> Result<()> {
        self.common
            .transition(&mut *self.adapter, QpState::Rts, self.param.port_id)
    }

    /// Set the MTU of the session's port.
    ///
    /// # Errors
    /// `ApiError` if the session has no open context or the adapter
    /// rejects the change.
    pub fn set_mtu(&mut self, mtu: Mtu) -> Result<()> {
        let context = self
            .common
            .context
            .ok_or_else(|| Error::ApiError("no device context open".to_string()))?;
        self.adapter.set_mtu(context, mtu, self.param.port_id)
    }

    /// Build one outgoing frame in the send ring.
    ///
    /// Source and destination endpoints follow the configured role: a
    /// client sends client -> server, a server the reverse.
    ///
    /// # Errors
    /// `ApiError` if the session has no send queue or the payload violates
    /// the packet builder's preconditions.
    pub fn build_packet(&mut self, payload: &[u8]) -> Result<PacketSlot> {
        let (src, dst) = if self.param.is_server {
            (self.server, self.client)
        } else {
            (self.client, self.server)
        };
        let queue = self
            .send
            .as_mut()
            .ok_or_else(|| Error::ApiError("session has no send queue".to_string()))?;
        make_ipv4_packet(queue, &src, &dst, payload)
    }

    /// Tear down every sub-resource this session still holds.
    ///
    /// Queues are deinitialized before the common state so registrations
    /// and completion queues go away before the protection domain and
    /// context they depend on; the backing memory detaches last.
    /// Idempotent: calling this on an already-deallocated session is a
    /// no-op.
    pub fn deallocate(&mut self) {
        if let Some(mut queue) = self.send.take() {
            queue.deinitialize(&mut *self.adapter);
        }
        if let Some(mut queue) = self.recv.take() {
            queue.deinitialize(&mut *self.adapter);
        }
        self.common.deinitialize(&mut *self.adapter);
        self.common_memory = None;
    }

    /// The send queue, while allocated.
    pub fn send_queue(&self) -> Option<&Queue> {
        self.send.as_ref()
    }

    /// The send queue, writable.
    pub fn send_queue_mut(&mut self) -> Option<&mut Queue> {
        self.send.as_mut()
    }

    /// The receive queue, while allocated.
    pub fn recv_queue(&self) -> Option<&Queue> {
        self.recv.as_ref()
    }

    /// The receive queue, writable.
    pub fn recv_queue_mut(&mut self) -> Option<&mut Queue> {
        self.recv.as_mut()
    }

    /// The resolved client endpoint.
    pub fn client(&self) -> &IPV4UDPEndpoint {
        &self.client
    }

    /// The resolved server endpoint.
    pub fn server(&self) -> &IPV4UDPEndpoint {
        &self.server
    }

    /// The shared queue-pair state.
    pub fn common(&self) -> &SessionCommon {
        &self.common
    }

    /// The region reserved for session-shared state.
    pub fn common_memory(&self) -> Option<&HugePageMemory> {
        self.common_memory.as_ref()
    }

    /// Current queue-pair state.
    pub fn state(&self) -> QpState {
        self.common.state
    }

    /// The configuration this session was created from.
    pub fn param(&self) -> &UserParam {
        self.param
    }

    /// Read access to the adapter the session was built over.
    pub fn adapter(&self) -> &A {
        &*self.adapter
    }
}

impl<A: Adapter> Drop for Session<'_, A> {
    fn drop(&mut self) {
        self.deallocate();
    }
}
