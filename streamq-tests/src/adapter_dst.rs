//! Deterministic simulation of the adapter under transport and store faults.
//!
//! Each seed drives a random sequence of produce, send, pull, acknowledge,
//! sleep and restart steps against a flaky transport and a flaky checkpoint
//! store. Every delivery, acknowledgement and written checkpoint goes
//! through the [`DeliveryChecker`]; after a final drain, every produced
//! record must have reached some reader.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use streamq_checkpoint::{Checkpoint, CheckpointStoreFaultConfig};
use streamq_core::{LogEntry, Offset, PartitionKey};
use streamq_transport::TransportFaultConfig;

use crate::harness::{attach, SimCluster, TestAdapter, TestReceiver};
use crate::properties::DeliveryChecker;
use crate::scenarios::{options, seeds};

const TOPIC: &str = "events";
const PARTITIONS: u32 = 2;

struct Reader {
    id: u64,
    receiver: TestReceiver,
    unacked: Vec<Arc<LogEntry<String>>>,
}

struct Run {
    seed: u64,
    rng: ChaCha8Rng,
    cluster: SimCluster,
    checker: DeliveryChecker,
    produced: BTreeMap<PartitionKey, usize>,
    next_reader: u64,
    restarts: u32,
}

impl Run {
    fn new(seed: u64) -> Self {
        let transport_faults = TransportFaultConfig::none()
            .with_fetch_fail_rate(0.1)
            .with_produce_fail_rate(0.1);
        let store_faults = CheckpointStoreFaultConfig::none().with_save_fail_rate(0.1);
        let cluster = SimCluster::with_faults(seed, TOPIC, PARTITIONS, transport_faults, store_faults);

        // Offset 0 of every partition counts as processed, so every epoch
        // resumes from a checkpoint.
        for partition in cluster.all_partitions() {
            cluster.produce(&partition, 1).unwrap();
            cluster
                .store
                .seed_checkpoint(Checkpoint::new(partition, Offset::new(0), 0));
        }

        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            cluster,
            checker: DeliveryChecker::new(),
            produced: BTreeMap::new(),
            next_reader: 1,
            restarts: 0,
        }
    }

    async fn start_epoch(&mut self) -> (TestAdapter, Vec<Reader>) {
        let mut opts = options::resuming(TOPIC);
        opts.checkpoint_every_acks = self.rng.gen_range(1..=5);
        opts.cache_max_entries = 1024;
        opts.max_pull_batch = 16;
        let adapter = self.cluster.start_adapter(opts).unwrap();

        let mut readers = Vec::new();
        for partition in self.cluster.all_partitions() {
            let receiver = attach(&adapter, &partition).await.unwrap();
            readers.push(Reader {
                id: self.next_reader,
                receiver,
                unacked: Vec::new(),
            });
            self.next_reader += 1;
        }
        (adapter, readers)
    }

    fn record_produced(&mut self, partition: &PartitionKey, offset: Offset) {
        self.checker.record_produced(partition, offset);
        *self.produced.entry(partition.clone()).or_default() += 1;
    }

    fn produce(&mut self) {
        let partition = self
            .cluster
            .partition(self.rng.gen_range(0..u64::from(PARTITIONS)));
        let count = self.rng.gen_range(1..=8);
        for offset in self.cluster.produce(&partition, count).unwrap() {
            self.record_produced(&partition, offset);
        }
    }

    async fn send(&mut self, adapter: &TestAdapter) {
        let n = self.rng.gen::<u32>();
        let key = self
            .rng
            .gen_bool(0.5)
            .then(|| Bytes::from(format!("key-{}", n % 8)));
        match adapter
            .send_item(&self.cluster.topic, key, &format!("sent-{n}"), Vec::new())
            .await
        {
            Ok(delivery) => self.record_produced(&delivery.partition, delivery.offset),
            Err(err) => tracing::debug!(seed = self.seed, error = %err, "Send gave up"),
        }
    }

    fn pull(&mut self, adapter: &TestAdapter, reader: &mut Reader, max: usize) {
        match reader.receiver.pull_messages(max) {
            Ok(entries) => {
                for entry in &entries {
                    self.checker
                        .record_delivered(reader.id, &entry.partition, entry.offset);
                }
                reader.unacked.extend(entries);
            }
            Err(err) if err.is_cache_miss() => {
                let partition = reader.receiver.partition().clone();
                let forced = adapter
                    .cache()
                    .stats(&partition)
                    .map_or(0, |s| s.forced_evictions);
                self.checker.record_cache_miss(reader.id, &partition, forced);
                reader.receiver.reset().unwrap();
                self.checker.record_reset(reader.id, &partition);
                reader.unacked.clear();
            }
            Err(err) => panic!("seed {}: pull failed: {err}", self.seed),
        }
    }

    async fn acknowledge(&mut self, reader: &mut Reader, upto: usize) {
        let Some(entry) = reader.unacked.get(upto).cloned() else {
            return;
        };
        reader.receiver.acknowledge(entry.token()).await.unwrap();
        self.checker
            .record_acknowledged(reader.id, &entry.partition, entry.offset);
        reader.unacked.drain(..=upto);
    }

    fn all_delivered(&self) -> bool {
        self.produced
            .iter()
            .all(|(partition, count)| self.checker.delivered(partition) >= *count)
    }

    async fn run(mut self, steps: usize) -> DeliveryChecker {
        let (mut adapter, mut readers) = self.start_epoch().await;

        for _ in 0..steps {
            let action = self.rng.gen_range(0..100);
            let idx = self.rng.gen_range(0..readers.len());
            match action {
                0..=19 => self.produce(),
                20..=29 => self.send(&adapter).await,
                30..=64 => {
                    let max = self.rng.gen_range(1..=16);
                    self.pull(&adapter, &mut readers[idx], max);
                }
                65..=89 => {
                    let pending = readers[idx].unacked.len();
                    if pending > 0 {
                        let upto = self.rng.gen_range(0..pending);
                        self.acknowledge(&mut readers[idx], upto).await;
                    }
                }
                90..=97 => {
                    let ms = self.rng.gen_range(1..=50);
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
                _ => {
                    drop(readers);
                    adapter.shutdown().await;
                    self.restarts += 1;
                    (adapter, readers) = self.start_epoch().await;
                }
            }
        }

        // Drain: read and acknowledge everything.
        for _ in 0..1_000 {
            if self.all_delivered() {
                break;
            }
            for reader in &mut readers {
                self.pull(&adapter, reader, 16);
                let pending = reader.unacked.len();
                if pending > 0 {
                    self.acknowledge(reader, pending - 1).await;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(readers);
        adapter.shutdown().await;

        for checkpoint in self.cluster.store.history() {
            self.checker.record_checkpoint(&checkpoint);
        }
        self.checker.verify_all_delivered();
        tracing::debug!(seed = self.seed, restarts = self.restarts, "Seed finished");
        self.checker
    }
}

#[tokio::test(start_paused = true)]
async fn test_dst_adapter_regression_seeds() {
    for &seed in seeds::REGRESSION_SEEDS {
        let checker = Run::new(seed).run(300).await;
        checker.assert_ok(&format!("seed {seed}"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_dst_adapter_derived_seeds() {
    for i in 0..seeds::CI_SEED_COUNT {
        let seed = i.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(17);
        let checker = Run::new(seed).run(150).await;
        checker.assert_ok(&format!("seed {seed}"));
    }
}
