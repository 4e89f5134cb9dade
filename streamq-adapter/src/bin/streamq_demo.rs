//! streamq demo: end-to-end run against the simulated transport.
//!
//! Sends `--messages` records through the adapter, reads them back through a
//! receiver per partition, acknowledges them and checks per-partition order.
//!
//! ```bash
//! streamq-demo --messages 1000 --partitions 4
//! streamq-demo --config streamq.toml --log-level debug
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clap::Parser;
use streamq_adapter::{AdapterDeps, QueueAdapter};
use streamq_config::{ConsumeMode, StreamOptions};
use streamq_core::{Offset, PartitionId, PartitionKey, TopicName};
use streamq_transport::{SimulatedTransport, TransportFaultConfig, Utf8Codec};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// streamq end-to-end demo.
#[derive(Parser, Debug)]
#[command(name = "streamq-demo")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Options file (TOML). Defaults are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Number of messages to send.
    #[arg(long, default_value = "100")]
    messages: u64,

    /// Partitions of the demo topic.
    #[arg(long, default_value = "2")]
    partitions: u32,

    /// Transient produce/fetch failure rate injected into the transport.
    #[arg(long, default_value = "0.0")]
    fail_rate: f64,

    /// Seed for injected faults.
    #[arg(long, default_value = "42")]
    seed: u64,
}

fn load_options(args: &Args) -> Result<StreamOptions, Box<dyn std::error::Error>> {
    let mut options = match &args.config {
        Some(path) => StreamOptions::from_file(path)?,
        None => StreamOptions::new(["simulated:9092"]).add_topic("demo", None),
    };
    // The demo reads everything it sends.
    options.consume_mode = ConsumeMode::StreamStart;
    Ok(options)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let options = load_options(&args)?;
    let topic_name = options
        .topics
        .first()
        .map(|t| t.name.clone())
        .ok_or("no topic configured")?;
    let topic = TopicName::new(&topic_name);

    let faults = TransportFaultConfig::none()
        .with_fetch_fail_rate(args.fail_rate)
        .with_produce_fail_rate(args.fail_rate);
    let transport = SimulatedTransport::with_faults(args.seed, faults);
    transport.create_topic(topic.clone(), args.partitions);

    info!(
        topic = %topic,
        partitions = args.partitions,
        messages = args.messages,
        fail_rate = args.fail_rate,
        "Starting streamq demo"
    );

    let adapter = QueueAdapter::start(options, AdapterDeps::new(Arc::new(transport), Utf8Codec))?;
    let partitions: Vec<PartitionKey> = (0..args.partitions)
        .map(|p| PartitionKey::new(topic.clone(), PartitionId::new(u64::from(p))))
        .collect();
    for partition in &partitions {
        adapter.assign(partition.clone()).await?;
    }

    let mut receivers = Vec::new();
    for partition in &partitions {
        let mut receiver = adapter.create_receiver(partition.clone())?;
        receiver.initialize()?;
        receivers.push(receiver);
    }

    let mut expected: BTreeMap<PartitionKey, u64> = BTreeMap::new();
    for i in 0..args.messages {
        let key = Bytes::from(format!("key-{}", i % 16));
        let delivery = adapter
            .send_item(&topic, Some(key), &format!("message-{i}"), Vec::new())
            .await?;
        *expected.entry(delivery.partition).or_default() += 1;
    }

    let mut received: BTreeMap<PartitionKey, u64> = BTreeMap::new();
    let mut last_offset: BTreeMap<PartitionKey, Offset> = BTreeMap::new();
    let mut order_violations = 0u64;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);

    while received.values().sum::<u64>() < args.messages {
        if tokio::time::Instant::now() >= deadline {
            warn!("Timed out waiting for messages");
            break;
        }
        let mut idle = true;
        for receiver in &mut receivers {
            let entries = receiver.pull_messages(100)?;
            let Some(last) = entries.last() else {
                continue;
            };
            idle = false;
            let partition = receiver.partition().clone();
            for entry in &entries {
                if last_offset.get(&partition).is_some_and(|prev| entry.offset <= *prev) {
                    order_violations += 1;
                }
                last_offset.insert(partition.clone(), entry.offset);
            }
            *received.entry(partition).or_default() += entries.len() as u64;
            receiver.acknowledge(last.token()).await?;
        }
        if idle {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    for receiver in &mut receivers {
        receiver.shutdown()?;
    }
    let report = adapter.shutdown().await;

    for partition in &partitions {
        info!(
            partition = %partition,
            sent = expected.get(partition).copied().unwrap_or(0),
            received = received.get(partition).copied().unwrap_or(0),
            "Partition summary"
        );
    }
    info!(
        stopped = report.stopped,
        flushed = report.flushed,
        order_violations,
        "Demo finished"
    );

    if order_violations > 0 || expected != received {
        return Err("demo verification failed".into());
    }
    Ok(())
}
