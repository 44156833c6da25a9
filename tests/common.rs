//! Shared scaffolding for integration tests.
//!
//! Provides an in-memory [`SimAdapter`] implementing the adapter surface
//! with a live-handle ledger and per-call failure injection, plus the
//! session parameters the tests drive the core with.

#![allow(dead_code)]

use std::collections::HashSet;

use rawqp::adapter::{
    AccessFlags, Adapter, ContextHandle, CqHandle, DeviceHandle, DeviceListHandle, MrHandle,
    PdHandle, QpHandle, QpInitAttr,
};
use rawqp::error::{Error, Result};
use rawqp::types::{LinkLayer, Mtu, PortInfo, PortState, QpState};
use rawqp::UserParam;

/// Which adapter call should fail, for unwind tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    None,
    OpenDevice,
    AllocPd,
    RegisterMemory,
    CreateCq,
    CreateQp,
    ModifyQp,
}

/// In-memory adapter: issues handles, keeps a ledger of which are live,
/// and can be told to reject one kind of call.
#[derive(Debug)]
pub struct SimAdapter {
    next_handle: u64,
    pub devices: Vec<String>,
    pub port_state: PortState,
    pub link_layer: LinkLayer,
    pub fail_at: FailPoint,
    pub live_device_lists: HashSet<u64>,
    pub open_contexts: HashSet<u64>,
    pub live_pds: HashSet<u64>,
    pub live_mrs: HashSet<u64>,
    pub live_cqs: HashSet<u64>,
    pub live_qps: HashSet<u64>,
    /// Every state transition requested, in order.
    pub modify_calls: Vec<QpState>,
    /// Attributes of the last queue pair created.
    pub qp_attr: Option<QpInitAttr>,
    /// Lengths of every registration taken.
    pub registered_lens: Vec<usize>,
    pub mtu_calls: Vec<(Mtu, u8)>,
    /// When set, modify calls with index >= this value are rejected.
    pub fail_modify_after: Option<u32>,
    /// Set when a destroy call names a handle that is not live.
    pub double_free: bool,
}

impl SimAdapter {
    pub fn new() -> Self {
        Self {
            next_handle: 0,
            devices: vec!["ethdev0".to_string(), "rocep1s0f1".to_string()],
            port_state: PortState::Active,
            link_layer: LinkLayer::Ethernet,
            fail_at: FailPoint::None,
            live_device_lists: HashSet::new(),
            open_contexts: HashSet::new(),
            live_pds: HashSet::new(),
            live_mrs: HashSet::new(),
            live_cqs: HashSet::new(),
            live_qps: HashSet::new(),
            modify_calls: Vec::new(),
            qp_attr: None,
            registered_lens: Vec::new(),
            mtu_calls: Vec::new(),
            fail_modify_after: None,
            double_free: false,
        }
    }

    pub fn failing_at(fail_at: FailPoint) -> Self {
        Self {
            fail_at,
            ..Self::new()
        }
    }

    /// Let the first `calls` state transitions succeed, reject the rest.
    pub fn failing_modify_after(calls: u32) -> Self {
        Self {
            fail_modify_after: Some(calls),
            ..Self::new()
        }
    }

    fn issue(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// True when every handle ever issued has been released again.
    pub fn all_released(&self) -> bool {
        self.live_device_lists.is_empty()
            && self.open_contexts.is_empty()
            && self.live_pds.is_empty()
            && self.live_mrs.is_empty()
            && self.live_cqs.is_empty()
            && self.live_qps.is_empty()
    }
}

impl Adapter for SimAdapter {
    fn find_device(&mut self, name: &str) -> Result<(DeviceListHandle, DeviceHandle)> {
        if self.devices.is_empty() {
            return Err(Error::NoDevice("no devices enumerated".to_string()));
        }
        if !self.devices.iter().any(|d| d == name) {
            return Err(Error::NoDevice(format!("device '{}' not known", name)));
        }
        let list = self.issue();
        self.live_device_lists.insert(list);
        let device = self.issue();
        Ok((DeviceListHandle(list), DeviceHandle(device)))
    }

    fn free_device_list(&mut self, list: DeviceListHandle) {
        if !self.live_device_lists.remove(&list.0) {
            self.double_free = true;
        }
    }

    fn open_device(&mut self, _device: DeviceHandle) -> Result<ContextHandle> {
        if self.fail_at == FailPoint::OpenDevice {
            return Err(Error::NoDevice("cannot open device (simulated)".to_string()));
        }
        let context = self.issue();
        self.open_contexts.insert(context);
        Ok(ContextHandle(context))
    }

    fn close_device(&mut self, context: ContextHandle) -> Result<()> {
        if !self.open_contexts.remove(&context.0) {
            self.double_free = true;
            return Err(Error::ApiError("unknown context handle".to_string()));
        }
        Ok(())
    }

    fn query_port(&mut self, _context: ContextHandle, _port_id: u8) -> Result<PortInfo> {
        Ok(PortInfo {
            state: self.port_state,
            link_layer: self.link_layer,
        })
    }

    fn set_mtu(&mut self, _context: ContextHandle, mtu: Mtu, port_id: u8) -> Result<()> {
        self.mtu_calls.push((mtu, port_id));
        Ok(())
    }

    fn alloc_pd(&mut self, _context: ContextHandle) -> Result<PdHandle> {
        if self.fail_at == FailPoint::AllocPd {
            return Err(Error::ApiError("alloc_pd rejected (simulated)".to_string()));
        }
        let pd = self.issue();
        self.live_pds.insert(pd);
        Ok(PdHandle(pd))
    }

    fn dealloc_pd(&mut self, pd: PdHandle) -> Result<()> {
        if !self.live_pds.remove(&pd.0) {
            self.double_free = true;
            return Err(Error::ApiError("unknown pd handle".to_string()));
        }
        Ok(())
    }

    fn register_memory(
        &mut self,
        pd: PdHandle,
        addr: *mut u8,
        len: usize,
        _access: AccessFlags,
    ) -> Result<MrHandle> {
        if self.fail_at == FailPoint::RegisterMemory {
            return Err(Error::ApiError(
                "register_memory rejected (simulated)".to_string(),
            ));
        }
        assert!(!addr.is_null());
        assert!(len > 0);
        if !self.live_pds.contains(&pd.0) {
            return Err(Error::ApiError("unknown pd handle".to_string()));
        }
        let raw = self.issue();
        self.live_mrs.insert(raw);
        self.registered_lens.push(len);
        Ok(MrHandle {
            raw,
            lkey: raw as u32,
        })
    }

    fn deregister_memory(&mut self, mr: MrHandle) -> Result<()> {
        if !self.live_mrs.remove(&mr.raw) {
            self.double_free = true;
            return Err(Error::ApiError("unknown mr handle".to_string()));
        }
        Ok(())
    }

    fn create_cq(&mut self, _context: ContextHandle, depth: u32) -> Result<CqHandle> {
        if self.fail_at == FailPoint::CreateCq {
            return Err(Error::ApiError("create_cq rejected (simulated)".to_string()));
        }
        assert!(depth > 0);
        let cq = self.issue();
        self.live_cqs.insert(cq);
        Ok(CqHandle(cq))
    }

    fn destroy_cq(&mut self, cq: CqHandle) -> Result<()> {
        if !self.live_cqs.remove(&cq.0) {
            self.double_free = true;
            return Err(Error::ApiError("unknown cq handle".to_string()));
        }
        Ok(())
    }

    fn create_qp(&mut self, pd: PdHandle, attr: &QpInitAttr) -> Result<QpHandle> {
        if self.fail_at == FailPoint::CreateQp {
            return Err(Error::ApiError("create_qp rejected (simulated)".to_string()));
        }
        if !self.live_pds.contains(&pd.0) {
            return Err(Error::ApiError("unknown pd handle".to_string()));
        }
        if !self.live_cqs.contains(&attr.send_cq.0) || !self.live_cqs.contains(&attr.recv_cq.0) {
            return Err(Error::ApiError("unknown cq handle".to_string()));
        }
        self.qp_attr = Some(*attr);
        let qp = self.issue();
        self.live_qps.insert(qp);
        Ok(QpHandle(qp))
    }

    fn destroy_qp(&mut self, qp: QpHandle) -> Result<()> {
        if !self.live_qps.remove(&qp.0) {
            self.double_free = true;
            return Err(Error::ApiError("unknown qp handle".to_string()));
        }
        Ok(())
    }

    fn modify_qp(&mut self, qp: QpHandle, target: QpState, _port_id: u8) -> i32 {
        self.modify_calls.push(target);
        let call_index = self.modify_calls.len() as u32 - 1;
        if self.fail_at == FailPoint::ModifyQp {
            return 22; // EINVAL
        }
        if let Some(after) = self.fail_modify_after {
            if call_index >= after {
                return 22;
            }
        }
        if !self.live_qps.contains(&qp.0) {
            return 22;
        }
        0
    }
}

/// Session parameters the lifecycle tests drive the core with.
pub fn test_param() -> UserParam {
    UserParam {
        device_name: "ethdev0".to_string(),
        client_mac: "aa:bb:cc:dd:ee:ff".to_string(),
        server_mac: "11:22:33:44:55:66".to_string(),
        client_ip: "10.0.0.1".to_string(),
        server_ip: "10.0.0.2".to_string(),
        client_port: 5000,
        server_port: 6000,
        iters: 1,
        tx_queue_size: 0,
        rx_queue_size: 0,
        payload_size: 64,
        port_id: 1,
        // Plain shared memory so the tests run without a hugepage pool.
        use_huge_pages: false,
        is_server: false,
    }
}

/// True when SysV shared memory works in this environment.
///
/// Tests that need real segments skip (rather than fail) when it does not.
pub fn shm_available() -> bool {
    init_logging();
    rawqp::allocate_huge_memory(1, false).is_ok()
}

/// Route the crate's diagnostics to test output, honouring `RUST_LOG`.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
