use std::sync::Arc;
use std::time::Duration;

use instant_replay::core::NS_PER_SEC;
use instant_replay::testing::mocks::{ChannelSource, GateSink, MockSink, wait_until};
use instant_replay::{CaptureSession, FlushCoordinator, ReplayError, RingWindow, Segment};

fn filled_ring(count: u64) -> Arc<RingWindow> {
    let ring = Arc::new(RingWindow::new(Duration::from_secs(300)).unwrap());
    for i in 0..count {
        ring.append(Segment::new(i, i * NS_PER_SEC, vec![i as u8; 16]))
            .unwrap();
    }
    ring
}

#[test]
fn test_flush_concurrent_with_append_sees_fixed_snapshot() {
    let ring = Arc::new(RingWindow::new(Duration::from_secs(300)).unwrap());
    let (source, feed) = ChannelSource::new("live");
    let mut session = CaptureSession::new();
    session.start(Box::new(source), ring.clone()).unwrap();

    for secs in 0..5 {
        feed.push_secs(secs);
    }
    assert!(wait_until(Duration::from_secs(2), || ring.len() == 5));

    let (sink, gate) = GateSink::new("slow-disk");
    let coordinator = FlushCoordinator::new(Box::new(sink));

    let pending = coordinator.begin(&ring).unwrap();
    let worker = std::thread::spawn(move || pending.complete());
    gate.wait_entered();

    // The sixth segment lands while the store is parked in the sink.
    feed.push_secs(5);
    assert!(wait_until(Duration::from_secs(2), || ring.len() == 6));

    assert_eq!(coordinator.flush(&ring), Err(ReplayError::FlushInProgress));

    gate.release();
    let artifact = worker.join().unwrap().unwrap();
    assert_eq!(artifact.segments, 5);

    let stored = gate.stored();
    assert_eq!(stored.len(), 1);
    let seqs: Vec<u64> = stored[0].iter().map(|s| s.sequence()).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);

    // Capture kept going the whole time.
    assert_eq!(ring.len(), 6);
    session.stop();
}

#[test]
fn test_back_to_back_flush_stores_exactly_once() {
    let ring = filled_ring(3);
    let (sink, gate) = GateSink::new("slow-disk");
    let coordinator = FlushCoordinator::new(Box::new(sink));

    let first = {
        let coordinator = coordinator.clone();
        let ring = ring.clone();
        std::thread::spawn(move || coordinator.flush(&ring))
    };
    gate.wait_entered();

    assert_eq!(coordinator.flush(&ring), Err(ReplayError::FlushInProgress));
    assert!(coordinator.is_in_flight());

    gate.release();
    assert!(first.join().unwrap().is_ok());

    assert_eq!(gate.entered(), 1);
    assert_eq!(gate.stored().len(), 1);

    let stats = coordinator.stats();
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.rejected, 1);
    assert!(!coordinator.is_in_flight());
}

#[test]
fn test_flush_empty_window_never_reaches_sink() {
    let ring = RingWindow::new(Duration::from_secs(120)).unwrap();
    let (sink, stored) = MockSink::new_with_shared("mock");
    let coordinator = FlushCoordinator::new(Box::new(sink));

    assert_eq!(coordinator.flush(&ring), Err(ReplayError::EmptyWindow));
    assert!(stored.lock().unwrap().is_empty());
    assert!(!coordinator.is_in_flight());
}

#[test]
fn test_sink_failure_releases_slot_and_keeps_buffer() {
    let ring = filled_ring(4);
    let failing = FlushCoordinator::new(Box::new(MockSink::failing("broken", "disk full")));

    let err = failing.flush(&ring).unwrap_err();
    assert!(matches!(err, ReplayError::SinkFailure { .. }));
    assert!(err.to_string().contains("disk full"));
    assert!(!failing.is_in_flight());
    assert_eq!(ring.len(), 4);

    let (sink, stored) = MockSink::new_with_shared("mock");
    let retry = FlushCoordinator::new(Box::new(sink));
    assert_eq!(retry.flush(&ring).unwrap().segments, 4);
    assert_eq!(stored.lock().unwrap().len(), 1);
}

#[test]
fn test_sequential_flushes_both_succeed() {
    let ring = filled_ring(2);
    let (sink, stored) = MockSink::new_with_shared("mock");
    let coordinator = FlushCoordinator::new(Box::new(sink));

    coordinator.flush(&ring).unwrap();
    ring.append(Segment::new(2, 2 * NS_PER_SEC, vec![2u8])).unwrap();
    coordinator.flush(&ring).unwrap();

    let stored = stored.lock().unwrap();
    assert_eq!(stored[0].len(), 2);
    assert_eq!(stored[1].len(), 3);
}
