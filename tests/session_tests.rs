//! Session lifecycle tests: allocation, state machine, teardown, unwind.
//!
//! Run with:
//! ```bash
//! cargo test --test session_tests -- --nocapture
//! ```

mod common;

use common::{shm_available, test_param, FailPoint, SimAdapter};
use rawqp::types::{LinkLayer, Mtu, PortState, QpState};
use rawqp::{Direction, ErrorKind, Session};

#[test]
fn allocate_initializes_full_session() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();
    let mut sim = SimAdapter::new();
    {
        let session = Session::allocate(&param, &mut sim).expect("allocate");
        assert_eq!(session.state(), QpState::Init);

        let send = session.send_queue().expect("send queue");
        let recv = session.recv_queue().expect("recv queue");
        assert_eq!(send.direction(), Direction::Send);
        assert_eq!(recv.direction(), Direction::Recv);
        assert_eq!(send.depth(), 128);
        assert_eq!(recv.depth(), 128);

        // Ring extents match the hugepage-rounded region size.
        assert_eq!(send.end() - send.start(), 2 * 1024 * 1024);
        assert_eq!(recv.end() - recv.start(), 2 * 1024 * 1024);
        assert!(session.common_memory().is_some());

        // The queue pair was created over both completion queues with the
        // configured depths.
        let attr = session.adapter().qp_attr.expect("qp created");
        assert_eq!(attr.max_send_wr, 128);
        assert_eq!(attr.max_recv_wr, 128);
        assert_eq!(attr.max_send_sge, 1);
        assert_eq!(attr.max_recv_sge, 1);

        // Both rings were registered in full.
        assert_eq!(session.adapter().registered_lens, vec![2 * 1024 * 1024; 2]);
    }
    assert!(sim.all_released());
    assert!(!sim.double_free);
}

#[test]
fn first_packet_matches_wire_expectations() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();
    let mut sim = SimAdapter::new();
    let mut session = Session::allocate(&param, &mut sim).expect("allocate");

    let payload = [0xABu8; 64];
    let slot = session.build_packet(&payload).expect("build packet");
    assert_eq!(slot.offset, 0);
    assert_eq!(slot.len, 42 + 64);

    let queue = session.send_queue().expect("send queue");
    let view = queue.packet(slot);
    assert_eq!(view.dst_mac(), [0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
    assert_eq!(view.src_mac(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    assert_eq!(view.ethertype(), 0x0800);
    assert_eq!(view.version_ihl(), 0x45);
    assert_eq!(view.ipv4_total_len(), 92);
    assert_eq!(view.udp_len(), 72);
    assert_eq!(view.ttl(), 64);
    assert_eq!(view.protocol(), 17);
    assert_ne!(view.ipv4_checksum(), 0);
    assert_eq!(view.udp_checksum(), 0);
    assert_eq!(view.src_ip(), [10, 0, 0, 1]);
    assert_eq!(view.dst_ip(), [10, 0, 0, 2]);
    assert_eq!(view.src_port(), 5000);
    assert_eq!(view.dst_port(), 6000);
    assert_eq!(view.payload(), &payload);
}

#[test]
fn state_machine_requires_documented_order() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();
    let mut sim = SimAdapter::new();
    let mut session = Session::allocate(&param, &mut sim).expect("allocate");

    // Skipping RTR is flagged locally; the adapter never sees the request.
    let err = session.set_rts().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ApiError);
    assert_eq!(session.adapter().modify_calls, vec![QpState::Init]);
    assert_eq!(session.state(), QpState::Init);

    session.set_rtr().expect("rtr");
    assert_eq!(session.state(), QpState::Rtr);

    // Transitions are monotonic; repeating one is also rejected.
    assert!(session.set_rtr().is_err());

    session.set_rts().expect("rts");
    assert_eq!(session.state(), QpState::Rts);
    assert_eq!(
        session.adapter().modify_calls,
        vec![QpState::Init, QpState::Rtr, QpState::Rts]
    );
}

#[test]
fn rejected_transition_leaves_state_unchanged() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();
    // The INIT transition during allocation succeeds; the RTR one is
    // rejected by the adapter.
    let mut sim = SimAdapter::failing_modify_after(1);
    let mut session = Session::allocate(&param, &mut sim).expect("allocate");

    let err = session.set_rtr().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ApiError);
    // The adapter's code travels in the message.
    assert!(err.to_string().contains("22"));
    assert_eq!(session.state(), QpState::Init);
}

#[test]
fn deallocate_is_idempotent() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();
    let mut sim = SimAdapter::new();
    {
        let mut session = Session::allocate(&param, &mut sim).expect("allocate");
        session.deallocate();
        assert!(session.adapter().all_released());
        assert!(session.send_queue().is_none());
        assert!(session.recv_queue().is_none());
        assert!(session.common_memory().is_none());
        assert_eq!(session.state(), QpState::Reset);
        session.deallocate();
        // Drop performs a third, equally harmless pass.
    }
    assert!(sim.all_released());
    assert!(!sim.double_free);
}

#[test]
fn allocation_unwinds_on_adapter_failure() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let cases = [
        (FailPoint::OpenDevice, ErrorKind::NoDevice),
        (FailPoint::AllocPd, ErrorKind::ApiError),
        (FailPoint::RegisterMemory, ErrorKind::ApiError),
        (FailPoint::CreateCq, ErrorKind::ApiError),
        (FailPoint::CreateQp, ErrorKind::ApiError),
        (FailPoint::ModifyQp, ErrorKind::ApiError),
    ];
    for (fail_at, expected) in cases {
        let param = test_param();
        let mut sim = SimAdapter::failing_at(fail_at);
        let err = Session::allocate(&param, &mut sim).unwrap_err();
        assert_eq!(err.kind(), expected, "fail point {:?}", fail_at);
        assert!(sim.all_released(), "leak after {:?}", fail_at);
        assert!(!sim.double_free, "double free after {:?}", fail_at);
    }
}

#[test]
fn unknown_device_reports_no_device() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = rawqp::UserParam {
        device_name: "missing0".to_string(),
        ..test_param()
    };
    let mut sim = SimAdapter::new();
    let err = Session::allocate(&param, &mut sim).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoDevice);
    assert!(sim.all_released());
}

#[test]
fn unusable_port_reports_no_device() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();

    let mut down = SimAdapter::new();
    down.port_state = PortState::Down;
    let err = Session::allocate(&param, &mut down).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoDevice);
    assert!(down.all_released());

    let mut infiniband = SimAdapter::new();
    infiniband.link_layer = LinkLayer::InfiniBand;
    let err = Session::allocate(&param, &mut infiniband).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoDevice);
    assert!(infiniband.all_released());
}

#[test]
fn bad_addresses_fail_before_touching_the_adapter() {
    let param = rawqp::UserParam {
        client_mac: "bad:mac".to_string(),
        ..test_param()
    };
    let mut sim = SimAdapter::new();
    let err = Session::allocate(&param, &mut sim).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadAddress);
    assert!(sim.all_released());
    assert!(sim.modify_calls.is_empty());
}

#[test]
fn invalid_param_is_rejected() {
    let param = rawqp::UserParam {
        port_id: 0,
        ..test_param()
    };
    let mut sim = SimAdapter::new();
    let err = Session::allocate(&param, &mut sim).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ApiError);
}

#[test]
fn set_mtu_forwards_to_the_adapter() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();
    let mut sim = SimAdapter::new();
    {
        let mut session = Session::allocate(&param, &mut sim).expect("allocate");
        session.set_mtu(Mtu::Mtu4096).expect("set mtu");
    }
    assert_eq!(sim.mtu_calls, vec![(Mtu::Mtu4096, 1)]);
}

#[test]
fn staged_descriptors_reference_the_registered_ring() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();
    let mut sim = SimAdapter::new();
    let mut session = Session::allocate(&param, &mut sim).expect("allocate");

    let slot = session.build_packet(&[0x5Au8; 64]).expect("build packet");
    let send = session.send_queue_mut().expect("send queue");
    let send_base = send.base_addr();
    let send_lkey = send.mr().expect("mr").lkey;
    let wr = *send.stage_send(7).expect("stage send");
    assert_eq!(wr.wr_id, 7);
    assert!(wr.signaled);
    assert_eq!(wr.sge.addr, (send_base + slot.offset) as u64);
    assert_eq!(wr.sge.length, slot.len as u32);
    assert_eq!(wr.sge.lkey, send_lkey);

    let recv = session.recv_queue_mut().expect("recv queue");
    let recv_base = recv.base_addr();
    let recv_lkey = recv.mr().expect("mr").lkey;
    let slot_capacity = recv.slot_capacity();
    let wr = *recv.stage_recv(9).expect("stage recv");
    assert_eq!(wr.wr_id, 9);
    assert_eq!(wr.sge.addr, recv_base as u64);
    assert_eq!(wr.sge.length, slot_capacity as u32);
    assert_eq!(wr.sge.lkey, recv_lkey);
    assert_eq!(wr.sge.addr % 64, 0);

    // The next landing slot starts one slot further on.
    let wr = *recv.stage_recv(10).expect("stage recv");
    assert_eq!(wr.sge.addr, (recv_base + slot_capacity) as u64);
    assert_eq!(recv.write_index(), 2);
}

#[test]
fn stage_direction_mismatch_is_flagged() {
    if !shm_available() {
        eprintln!("Skipping test: SysV shared memory unavailable");
        return;
    }
    let param = test_param();
    let mut sim = SimAdapter::new();
    let mut session = Session::allocate(&param, &mut sim).expect("allocate");

    let err = session
        .send_queue_mut()
        .expect("send queue")
        .stage_recv(1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ApiError);

    let err = session
        .recv_queue_mut()
        .expect("recv queue")
        .stage_send(1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ApiError);
}
