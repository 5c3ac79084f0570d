//! End-to-end data-path scenarios across driver, adapter and device.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use vtap::{
    AdapterConfig, AdapterState, DeviceControl, ReadOutcome, ReceiveSink, RxIndication,
    ScatterFrame, TapAdapter, TapDevice, TapDriver, TapError, WriteOutcome,
};

/// Sink that records indications and can hand their ids back for return.
#[derive(Default)]
struct HostStack {
    indicated: Mutex<Vec<RxIndication>>,
}

impl HostStack {
    fn take_ids(&self) -> Vec<u64> {
        self.indicated.lock().iter().map(|i| i.id).collect()
    }
}

impl ReceiveSink for HostStack {
    fn indicate(&self, indication: RxIndication) {
        self.indicated.lock().push(indication);
    }
}

fn bring_up(driver: &TapDriver, stack: Arc<HostStack>) -> (Arc<TapAdapter>, TapDevice) {
    let adapter = driver
        .create_adapter(AdapterConfig::default(), stack)
        .unwrap();
    let device = TapDevice::open(&adapter).unwrap();
    adapter.restart().unwrap();
    (adapter, device)
}

fn eth_frame(dst: [u8; 6], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&dst);
    frame.extend_from_slice(&[0x5E, 0x00, 0x53, 0x00, 0x00, 0x63]);
    frame.extend_from_slice(&0x0800u16.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[test]
fn tun_write_round_trips_through_the_host_stack() {
    let driver = TapDriver::new();
    let stack = Arc::new(HostStack::default());
    let (adapter, device) = bring_up(&driver, Arc::clone(&stack));

    device
        .control(DeviceControl::ConfigTun {
            local_ip: Ipv4Addr::new(10, 8, 0, 2),
            remote_network: Ipv4Addr::new(10, 8, 0, 0),
            remote_netmask: Ipv4Addr::new(255, 255, 255, 0),
        })
        .unwrap();

    // A minimal IPv4 packet, 20 bytes.
    let mut packet = vec![0u8; 20];
    packet[0] = 0x45;

    let WriteOutcome::Pending(ticket) = device.write(&packet).unwrap() else {
        panic!("write must stay pending until the buffer returns");
    };

    {
        let seen = stack.indicated.lock();
        assert_eq!(seen.len(), 1);
        let frame = &seen[0].frame;
        // Synthesized Ethernet header, padded to the minimum frame.
        assert_eq!(frame.len(), 60);
        assert_eq!(&frame[0..6], &adapter.current_address());
        assert_eq!(u16::from_be_bytes([frame[12], frame[13]]), 0x0800);
        assert_eq!(&frame[14..34], &packet[..]);
        assert!(frame[34..].iter().all(|&b| b == 0));
    }
    assert_eq!(adapter.stats().rx_directed_frames, 1);
    assert_eq!(adapter.in_flight(), 1);

    adapter.return_buffers(&stack.take_ids());
    assert_eq!(ticket.wait().unwrap(), packet.len());
    assert_eq!(adapter.in_flight(), 0);
}

#[test]
fn tun_read_strips_the_synthesized_header() {
    let driver = TapDriver::new();
    let stack = Arc::new(HostStack::default());
    let (adapter, device) = bring_up(&driver, stack);

    device
        .control(DeviceControl::ConfigPointToPoint {
            local_ip: Ipv4Addr::new(10, 8, 0, 2),
            remote_ip: Ipv4Addr::new(10, 8, 0, 1),
        })
        .unwrap();

    let mut payload = vec![0u8; 40];
    payload[0] = 0x45;
    let frame = eth_frame(adapter.current_address(), &payload);
    adapter
        .transmit(&[ScatterFrame::from_slice(&frame)])
        .unwrap();

    // User-mode sees the bare IP packet.
    let read = device.read_blocking().unwrap();
    assert_eq!(read, payload);
}

#[test]
fn reads_and_sends_interleave_in_order() {
    let driver = TapDriver::new();
    let stack = Arc::new(HostStack::default());
    let (adapter, device) = bring_up(&driver, stack);

    // Park a read before any traffic exists.
    let ReadOutcome::Pending(early) = device.read().unwrap() else {
        panic!("queue is empty, read must pend");
    };

    let frames: Vec<ScatterFrame> = (1..=3u8)
        .map(|i| ScatterFrame::from_slice(&eth_frame([0x5E, 0, 0x53, 0, 0, i], &[i; 46])))
        .collect();
    adapter.transmit(&frames).unwrap();

    // The parked read got the first frame; the rest arrive in order.
    assert_eq!(early.wait().unwrap()[14], 1);
    assert_eq!(device.read_blocking().unwrap()[14], 2);
    assert_eq!(device.read_blocking().unwrap()[14], 3);
}

#[test]
fn transmit_from_many_threads_loses_nothing_under_capacity() {
    let driver = TapDriver::new();
    let stack = Arc::new(HostStack::default());
    let (adapter, device) = bring_up(&driver, stack);

    let senders: Vec<_> = (0..4u8)
        .map(|t| {
            let adapter = Arc::clone(&adapter);
            std::thread::spawn(move || {
                for i in 0..10u8 {
                    let frame = eth_frame([0x5E, 0, 0x53, 0, t, i], &[t; 46]);
                    adapter
                        .transmit(&[ScatterFrame::from_slice(&frame)])
                        .unwrap();
                }
            })
        })
        .collect();

    let reader = std::thread::spawn(move || {
        let mut got = 0;
        while got < 40 {
            if device.read_blocking().is_ok() {
                got += 1;
            }
        }
        got
    });

    for s in senders {
        s.join().unwrap();
    }
    assert_eq!(reader.join().unwrap(), 40);
    assert_eq!(adapter.stats().tx_frames(), 40);
    assert_eq!(adapter.stats().tx_dropped, 0);
}

#[test]
fn pause_waits_for_lent_buffers() {
    let driver = TapDriver::new();
    let stack = Arc::new(HostStack::default());
    let (adapter, device) = bring_up(&driver, Arc::clone(&stack));

    let frame = eth_frame(adapter.current_address(), &[0u8; 46]);
    let WriteOutcome::Pending(_ticket) = device.write(&frame).unwrap() else {
        panic!("expected pending write");
    };
    assert_eq!(adapter.in_flight(), 1);

    let pauser = {
        let adapter = Arc::clone(&adapter);
        std::thread::spawn(move || {
            adapter.pause();
            adapter.state()
        })
    };

    // The pause cannot finish while the host stack still holds the buffer.
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert!(!pauser.is_finished());

    adapter.return_buffers(&stack.take_ids());
    assert_eq!(pauser.join().unwrap(), AdapterState::Paused);
}

#[test]
fn halt_cancels_outstanding_reads_and_closes_the_path() {
    let driver = TapDriver::new();
    let stack = Arc::new(HostStack::default());
    let adapter = driver
        .create_adapter(
            AdapterConfig {
                instance_id: "{TAP-HALT}".into(),
                ..Default::default()
            },
            stack,
        )
        .unwrap();
    let device = TapDevice::open(&adapter).unwrap();
    adapter.restart().unwrap();

    let ReadOutcome::Pending(ticket) = device.read().unwrap() else {
        panic!("expected pending read");
    };

    driver.halt_adapter("{TAP-HALT}").unwrap();

    assert_eq!(ticket.wait(), Err(TapError::Cancelled));
    assert_eq!(adapter.state(), AdapterState::Halted);
    // Both directions are closed; sends vanish, reads and writes fail.
    adapter
        .transmit(&[ScatterFrame::from_slice(&eth_frame([0xFF; 6], &[0; 46]))])
        .unwrap();
    assert_eq!(adapter.queued_frames(), 0);
    assert!(device.read().is_err());
    assert!(device.write(&eth_frame([0xFF; 6], &[0; 46])).is_err());
}

#[test]
fn paused_adapter_lies_about_sends_but_rejects_reads() {
    let driver = TapDriver::new();
    let stack = Arc::new(HostStack::default());
    let adapter = driver
        .create_adapter(AdapterConfig::default(), stack)
        .unwrap();
    let device = TapDevice::open(&adapter).unwrap();

    // Never restarted: still paused.
    adapter
        .transmit(&[ScatterFrame::from_slice(&eth_frame([0xFF; 6], &[0; 46]))])
        .unwrap();
    assert_eq!(adapter.stats().tx_dropped, 1);
    assert_eq!(device.read().unwrap_err(), TapError::AdapterPaused);
}

#[test]
fn concurrent_read_and_transmit_always_pair_up() {
    // A read parking itself and a transmit pushing the only frame must
    // always meet, whichever order their internal steps interleave in.
    for _ in 0..500 {
        let driver = TapDriver::new();
        let stack = Arc::new(HostStack::default());
        let (adapter, device) = bring_up(&driver, stack);

        let reader = std::thread::spawn(move || device.read_blocking().unwrap());
        let sender = {
            let adapter = Arc::clone(&adapter);
            std::thread::spawn(move || {
                adapter
                    .transmit(&[ScatterFrame::from_slice(&eth_frame(
                        [0x5E, 0, 0x53, 0, 0, 1],
                        &[7; 46],
                    ))])
                    .unwrap();
            })
        };

        sender.join().unwrap();
        let frame = reader.join().unwrap();
        assert_eq!(frame[14], 7);
        assert_eq!(adapter.queued_frames(), 0);
    }
}

/// Sink that hands every buffer straight back and records indications that
/// arrive after the adapter already reports Paused.
#[derive(Default)]
struct ReturningStack {
    adapter: Mutex<Option<Weak<TapAdapter>>>,
    late_indications: AtomicUsize,
}

impl ReceiveSink for ReturningStack {
    fn indicate(&self, indication: RxIndication) {
        let adapter = self
            .adapter
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .expect("indication before the sink was wired up");
        if adapter.state() == AdapterState::Paused {
            self.late_indications.fetch_add(1, Ordering::SeqCst);
        }
        adapter.return_buffers(&[indication.id]);
    }
}

#[test]
fn pause_quiesces_against_concurrent_writes() {
    // Once pause() returns, no indication may still be on its way: the
    // write either lost admission or was counted in-flight before the
    // pause could observe the drain.
    for _ in 0..200 {
        let driver = TapDriver::new();
        let stack = Arc::new(ReturningStack::default());
        let adapter = driver
            .create_adapter(AdapterConfig::default(), Arc::clone(&stack) as Arc<dyn ReceiveSink>)
            .unwrap();
        *stack.adapter.lock() = Some(Arc::downgrade(&adapter));
        let device = TapDevice::open(&adapter).unwrap();
        adapter.restart().unwrap();

        let frame = eth_frame(adapter.current_address(), &[0u8; 46]);
        let writer = std::thread::spawn(move || {
            let _ = device.write_blocking(&frame);
        });
        let pauser = {
            let adapter = Arc::clone(&adapter);
            std::thread::spawn(move || adapter.pause())
        };

        writer.join().unwrap();
        pauser.join().unwrap();
        assert_eq!(stack.late_indications.load(Ordering::SeqCst), 0);
        assert_eq!(adapter.in_flight(), 0);
        assert_eq!(adapter.state(), AdapterState::Paused);
    }
}

#[test]
fn cancel_races_completion_exactly_once() {
    for _ in 0..100 {
        let driver = TapDriver::new();
        let stack = Arc::new(HostStack::default());
        let (adapter, device) = bring_up(&driver, stack);

        let ReadOutcome::Pending(ticket) = device.read().unwrap() else {
            panic!("expected pending read");
        };
        let id = ticket.id;

        let canceller = {
            let adapter = Arc::clone(&adapter);
            std::thread::spawn(move || adapter.cancel_request(id))
        };
        let completer = {
            let adapter = Arc::clone(&adapter);
            std::thread::spawn(move || {
                adapter
                    .transmit(&[ScatterFrame::from_slice(&eth_frame([0xFF; 6], &[9; 46]))])
                    .unwrap();
            })
        };

        let cancelled = canceller.join().unwrap();
        completer.join().unwrap();

        match ticket.wait() {
            Ok(frame) => {
                assert!(!cancelled);
                assert_eq!(frame[14], 9);
            }
            Err(e) => {
                assert!(cancelled);
                assert_eq!(e, TapError::Cancelled);
            }
        }
    }
}
