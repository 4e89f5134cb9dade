//! Adapter integration tests: restart, rebalance, lagging readers and the
//! send path, checked against the delivery properties.

use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use streamq_adapter::AdapterError;
use streamq_config::{CacheMissPolicy, StreamOptions};
use streamq_core::Offset;
use streamq_dispatch::DispatchError;
use streamq_poller::StartReason;
use streamq_transport::TraceStage;
use tokio::time::Instant;

use crate::harness::{attach, offsets, pull_until, SimCluster};
use crate::properties::DeliveryChecker;
use crate::scenarios::options;

const TOPIC: &str = "orders";

fn record_all_produced(checker: &mut DeliveryChecker, cluster: &SimCluster) {
    for partition in cluster.all_partitions() {
        for record in cluster.transport.records(&partition) {
            checker.record_produced(&partition, record.offset);
        }
    }
}

fn record_all_checkpoints(checker: &mut DeliveryChecker, cluster: &SimCluster) {
    for checkpoint in cluster.store.history() {
        checker.record_checkpoint(&checkpoint);
    }
}

// ============================================================================
// Ordered delivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_adapter_delivers_hundred_messages_in_order() {
    let cluster = SimCluster::new(42, TOPIC, 1);
    let p0 = cluster.partition(0);
    cluster.produce(&p0, 100).unwrap();

    let adapter = cluster.start_adapter(options::from_start(TOPIC)).unwrap();
    let mut receiver = attach(&adapter, &p0).await.unwrap();
    let entries = pull_until(&mut receiver, 100, 100).await.unwrap();
    assert_eq!(offsets(&entries), (0..100).collect::<Vec<u64>>());

    let mut checker = DeliveryChecker::new();
    record_all_produced(&mut checker, &cluster);
    for entry in &entries {
        checker.record_delivered(1, &p0, entry.offset);
        receiver.acknowledge(entry.token()).await.unwrap();
        checker.record_acknowledged(1, &p0, entry.offset);
    }
    drop(receiver);
    adapter.shutdown().await;

    assert_eq!(cluster.store.checkpoint(&p0).unwrap().offset, Offset::new(99));
    record_all_checkpoints(&mut checker, &cluster);
    checker.verify_all_delivered();
    checker.assert_ok("ordered delivery");
}

#[tokio::test(start_paused = true)]
async fn test_adapter_partitions_are_independent() {
    let cluster = SimCluster::new(7, TOPIC, 3);
    let adapter = cluster.start_adapter(options::from_start(TOPIC)).unwrap();

    let mut receivers = Vec::new();
    for partition in cluster.all_partitions() {
        receivers.push(attach(&adapter, &partition).await.unwrap());
    }
    for (i, partition) in cluster.all_partitions().iter().enumerate() {
        cluster.produce(partition, 10 * (i + 1)).unwrap();
    }

    for (i, receiver) in receivers.iter_mut().enumerate() {
        let entries = pull_until(receiver, 10 * (i + 1), 100).await.unwrap();
        assert_eq!(entries.len(), 10 * (i + 1));
        assert!(entries.iter().all(|e| &e.partition == receiver.partition()));
        assert_eq!(offsets(&entries), (0..entries.len() as u64).collect::<Vec<u64>>());
    }

    drop(receivers);
    adapter.shutdown().await;
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_adapter_crash_redelivers_after_last_checkpoint() {
    let cluster = SimCluster::new(42, TOPIC, 1);
    let p0 = cluster.partition(0);
    let opts = options::batched_checkpoints(TOPIC, 50);

    let first = cluster.start_adapter(opts.clone()).unwrap();
    let mut receiver = attach(&first, &p0).await.unwrap();
    cluster.produce(&p0, 100).unwrap();

    let entries = pull_until(&mut receiver, 60, 100).await.unwrap();
    assert_eq!(entries.len(), 60);
    let mut committed = Vec::new();
    for entry in &entries {
        if let Some(checkpoint) = receiver.acknowledge(entry.token()).await.unwrap() {
            committed.push(checkpoint.offset);
        }
    }
    assert_eq!(committed, vec![Offset::new(49)]);

    // No shutdown: acknowledgements 50..59 never reach the store.
    drop(receiver);
    drop(first);
    assert_eq!(cluster.store.checkpoint(&p0).unwrap().offset, Offset::new(49));

    let second = cluster.start_adapter(opts).unwrap();
    let position = second.assign(p0.clone()).await.unwrap();
    assert_eq!(position.offset, Offset::new(50));
    assert_eq!(position.reason, StartReason::Checkpoint);

    let mut receiver = second.create_receiver(p0.clone()).unwrap();
    receiver.initialize().unwrap();
    let entries = pull_until(&mut receiver, 50, 100).await.unwrap();
    assert_eq!(offsets(&entries), (50..100).collect::<Vec<u64>>());

    drop(receiver);
    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_adapter_clean_restart_flushes_pending_acknowledgements() {
    let cluster = SimCluster::new(42, TOPIC, 1);
    let p0 = cluster.partition(0);
    let opts = options::batched_checkpoints(TOPIC, 50);

    let first = cluster.start_adapter(opts.clone()).unwrap();
    let mut receiver = attach(&first, &p0).await.unwrap();
    cluster.produce(&p0, 100).unwrap();
    let entries = pull_until(&mut receiver, 60, 100).await.unwrap();
    receiver.acknowledge(entries[59].token()).await.unwrap();
    drop(receiver);

    let report = first.shutdown().await;
    assert_eq!(report.flushed, 1);
    assert_eq!(cluster.store.checkpoint(&p0).unwrap().offset, Offset::new(59));

    let second = cluster.start_adapter(opts).unwrap();
    let mut receiver = attach(&second, &p0).await.unwrap();
    let entries = pull_until(&mut receiver, 40, 100).await.unwrap();
    assert_eq!(entries[0].offset, Offset::new(60));
    assert_eq!(entries.len(), 40);

    drop(receiver);
    second.shutdown().await;
}

// ============================================================================
// Rebalance
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_adapter_rebalance_moves_partition_with_its_checkpoint() {
    let cluster = SimCluster::new(9, TOPIC, 2);
    let (p0, p1) = (cluster.partition(0), cluster.partition(1));
    let a = cluster.start_adapter(options::resuming(TOPIC)).unwrap();

    let mut a0 = attach(&a, &p0).await.unwrap();
    let mut a1 = attach(&a, &p1).await.unwrap();
    cluster.produce(&p0, 20).unwrap();
    cluster.produce(&p1, 20).unwrap();

    let on_p1 = pull_until(&mut a1, 20, 100).await.unwrap();
    assert_eq!(on_p1.len(), 20);
    let checkpoint = a1.acknowledge(on_p1[9].token()).await.unwrap().unwrap();
    assert_eq!(checkpoint.offset, Offset::new(9));

    a.revoke(&p1).await.unwrap();
    assert!(!a.is_assigned(&p1));
    a1.shutdown().unwrap();

    let b = cluster.start_adapter(options::resuming(TOPIC)).unwrap();
    let position = b.assign(p1.clone()).await.unwrap();
    assert_eq!(position.offset, Offset::new(10));
    let mut b1 = b.create_receiver(p1.clone()).unwrap();
    b1.initialize().unwrap();
    let moved = pull_until(&mut b1, 10, 100).await.unwrap();
    assert_eq!(offsets(&moved), (10..20).collect::<Vec<u64>>());

    // The partition that stayed keeps flowing.
    let stayed = pull_until(&mut a0, 20, 100).await.unwrap();
    assert_eq!(stayed.len(), 20);

    drop((a0, a1, b1));
    a.shutdown().await;
    b.shutdown().await;

    let mut checker = DeliveryChecker::new();
    for entry in on_p1.iter().take(10) {
        checker.record_acknowledged(1, &p1, entry.offset);
    }
    record_all_checkpoints(&mut checker, &cluster);
    assert!(checker.violations().is_empty(), "{:?}", checker.violations());
}

// ============================================================================
// Lagging readers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_adapter_lagging_reader_misses_only_after_forced_eviction() {
    let cluster = SimCluster::new(3, TOPIC, 1);
    let p0 = cluster.partition(0);
    let mut opts = options::from_start(TOPIC);
    opts.cache_max_entries = 10;
    let adapter = cluster.start_adapter(opts).unwrap();
    let mut receiver = attach(&adapter, &p0).await.unwrap();

    cluster.produce(&p0, 25).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let err = receiver.pull_messages(5).unwrap_err();
    assert!(err.is_cache_miss(), "{err}");
    let stats = adapter.cache().stats(&p0).unwrap();
    assert!(stats.forced_evictions >= 15);
    assert_eq!(stats.low_water, Offset::new(15));

    let mut checker = DeliveryChecker::new();
    checker.record_cache_miss(1, &p0, stats.forced_evictions);

    receiver.reset().unwrap();
    checker.record_reset(1, &p0);
    let entries = pull_until(&mut receiver, 10, 100).await.unwrap();
    assert_eq!(offsets(&entries), (15..25).collect::<Vec<u64>>());
    for entry in &entries {
        checker.record_delivered(1, &p0, entry.offset);
    }
    checker.assert_ok("lagging reader");

    drop(receiver);
    adapter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_adapter_rewind_policy_reports_miss_once() {
    let cluster = SimCluster::new(3, TOPIC, 1);
    let p0 = cluster.partition(0);
    let mut opts = options::from_start(TOPIC);
    opts.cache_max_entries = 10;
    opts.cache_miss_policy = CacheMissPolicy::RewindToOldest;
    let adapter = cluster.start_adapter(opts).unwrap();
    let mut receiver = attach(&adapter, &p0).await.unwrap();

    cluster.produce(&p0, 25).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(receiver.pull_messages(5).unwrap_err().is_cache_miss());
    let entries = receiver.pull_messages(5).unwrap();
    assert_eq!(offsets(&entries), vec![15, 16, 17, 18, 19]);

    drop(receiver);
    adapter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_adapter_slow_reader_holds_entries_under_bound() {
    let cluster = SimCluster::new(5, TOPIC, 1);
    let p0 = cluster.partition(0);
    let mut opts = options::from_start(TOPIC);
    opts.cache_max_entries = 50;
    let adapter = cluster.start_adapter(opts).unwrap();
    let mut fast = attach(&adapter, &p0).await.unwrap();
    let mut slow = adapter.create_receiver(p0.clone()).unwrap();
    slow.initialize().unwrap();

    cluster.produce(&p0, 30).unwrap();
    let entries = pull_until(&mut fast, 30, 100).await.unwrap();
    fast.acknowledge(entries[29].token()).await.unwrap();

    // Unacknowledged by the slow reader, so nothing is released.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(adapter.cache().stats(&p0).unwrap().entries, 30);
    let entries = pull_until(&mut slow, 30, 100).await.unwrap();
    assert_eq!(offsets(&entries), (0..30).collect::<Vec<u64>>());

    // Checkpoint follows the slowest reader.
    assert!(cluster
        .store
        .checkpoint(&p0)
        .map_or(true, |c| c.offset < Offset::new(29)));
    slow.acknowledge(entries[29].token()).await.unwrap();
    assert_eq!(cluster.store.checkpoint(&p0).unwrap().offset, Offset::new(29));

    drop((fast, slow));
    adapter.shutdown().await;
}

// ============================================================================
// Send path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_adapter_send_to_unreachable_transport_times_out() {
    let cluster = SimCluster::new(1, TOPIC, 2);
    let adapter = cluster.start_adapter(options::fast(TOPIC)).unwrap();
    cluster.transport.fault_config().unreachable = true;

    let started = Instant::now();
    let err = adapter
        .send(&cluster.topic, None, Bytes::from_static(b"lost"), Vec::new())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        matches!(
            err,
            AdapterError::Dispatch(DispatchError::TimedOut {
                timeout_ms: 200,
                ..
            })
        ),
        "{err}"
    );
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    assert_eq!(cluster.sink.events_for(TraceStage::SendFailed).len(), 1);

    // Recovery: the same adapter sends once the transport is back.
    cluster.transport.fault_config().unreachable = false;
    adapter
        .send(&cluster.topic, None, Bytes::from_static(b"found"), Vec::new())
        .await
        .unwrap();
    adapter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_adapter_sent_items_arrive_in_key_order() {
    let cluster = SimCluster::new(11, TOPIC, 4);
    let adapter = cluster.start_adapter(options::from_start(TOPIC)).unwrap();
    let mut receivers = Vec::new();
    for partition in cluster.all_partitions() {
        receivers.push(attach(&adapter, &partition).await.unwrap());
    }

    let key = Bytes::from_static(b"customer-17");
    let mut partition = None;
    for i in 0..20 {
        let delivery = adapter
            .send_item(&cluster.topic, Some(key.clone()), &format!("event-{i}"), Vec::new())
            .await
            .unwrap();
        let first = partition.get_or_insert_with(|| delivery.partition.clone());
        assert_eq!(*first, delivery.partition);
    }
    let partition = partition.unwrap();

    let receiver = receivers
        .iter_mut()
        .find(|r| r.partition() == &partition)
        .unwrap();
    let entries = pull_until(receiver, 20, 100).await.unwrap();
    let items: Vec<String> = entries.iter().map(|e| e.item.clone()).collect();
    let expected: Vec<String> = (0..20).map(|i| format!("event-{i}")).collect();
    assert_eq!(items, expected);
    assert_eq!(cluster.sink.events_for(TraceStage::Produced).len(), 20);

    drop(receivers);
    adapter.shutdown().await;
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_adapter_starts_from_options_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
broker_list = ["sim-1:9092"]
consume_mode = "stream_start"
poll_timeout_ms = 20
checkpoint_every_acks = 1

[[topics]]
name = "orders"
"#
    )
    .unwrap();

    let opts = StreamOptions::from_file(file.path()).unwrap();
    let cluster = SimCluster::new(2, TOPIC, 1);
    let p0 = cluster.partition(0);
    cluster.produce(&p0, 3).unwrap();

    let adapter = cluster.start_adapter(opts).unwrap();
    let mut receiver = attach(&adapter, &p0).await.unwrap();
    let entries = pull_until(&mut receiver, 3, 100).await.unwrap();
    assert_eq!(offsets(&entries), vec![0, 1, 2]);

    drop(receiver);
    adapter.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_adapter_rejects_topic_missing_from_options() {
    let cluster = SimCluster::new(2, TOPIC, 1);
    let adapter = cluster.start_adapter(options::fast("payments")).unwrap();
    assert!(matches!(
        adapter.assign(cluster.partition(0)).await,
        Err(AdapterError::UnknownTopic { .. })
    ));
    adapter.shutdown().await;
}
