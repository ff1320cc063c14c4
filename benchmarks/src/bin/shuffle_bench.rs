// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Benchmark of the bypass-merge shuffle writer.
//!
//! Generates synthetic key/value records and measures local-only writes
//! against writes that also push every routed record through a queued
//! push transport.
//!
//! Usage:
//!   cargo run --release --bin shuffle_bench -- --help
//!   cargo run --release --bin shuffle_bench -- --rows 1000000 --partitions 16

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use pipeshuffle_core::config::{
    PIPESHUFFLE_FILE_TRANSFER_TO, PIPESHUFFLE_SHUFFLE_FILE_BUFFER, ShuffleWriterConfig,
};
use pipeshuffle_core::metrics::ShuffleWriteMetrics;
use pipeshuffle_core::partitioner::HashPartitioner;
use pipeshuffle_core::push::{
    EndpointRef, PushClient, PushMessage, QueuedPushTransport, RoutingTable, ShuffleId,
};
use pipeshuffle_core::serde::BytesSerializer;
use pipeshuffle_core::storage::DiskShuffleStorage;
use pipeshuffle_core::{BypassMergeShuffleWriter, ShuffleFileWriter};
use structopt::StructOpt;
use tempfile::TempDir;
use tokio::runtime::Handle;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "shuffle_bench",
    about = "Benchmark of local-only and push-enabled bypass-merge shuffle writes"
)]
struct ShuffleBenchOpt {
    /// Number of records to generate
    #[structopt(short = "r", long = "rows", default_value = "1000000")]
    rows: usize,

    /// Number of output partitions
    #[structopt(short = "p", long = "partitions", default_value = "16")]
    partitions: usize,

    /// Size of every value in bytes
    #[structopt(short = "v", long = "value-size", default_value = "64")]
    value_size: usize,

    /// Number of iterations
    #[structopt(short = "n", long = "iterations", default_value = "3")]
    iterations: usize,

    /// Partition file buffer, e.g. 32k
    #[structopt(long = "file-buffer", default_value = "32k")]
    file_buffer: String,

    /// Concatenate with a user-space copy instead of kernel-assisted copies
    #[structopt(long = "no-transfer-to")]
    no_transfer_to: bool,

    /// Only run local-only writes
    #[structopt(long = "local-only")]
    local_only: bool,

    /// Capacity of the push queue
    #[structopt(long = "push-queue", default_value = "4096")]
    push_queue: usize,
}

/// Accepts every message without sending it anywhere.
#[derive(Default)]
struct DiscardingClient {
    delivered: AtomicUsize,
}

#[async_trait]
impl PushClient for DiscardingClient {
    async fn push(&self, _message: PushMessage) -> pipeshuffle_core::Result<()> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn generate_records(rows: usize, value_size: usize) -> Vec<(Bytes, Bytes)> {
    let value = Bytes::from(vec![b'x'; value_size]);
    (0..rows)
        .map(|i| (Bytes::from(format!("key_{i}")), value.clone()))
        .collect()
}

struct RunStats {
    elapsed: Duration,
    bytes: u64,
    pushed: usize,
    dropped: usize,
}

fn run_once(
    records: &[(Bytes, Bytes)],
    opt: &ShuffleBenchOpt,
    config: &ShuffleWriterConfig,
    work_dir: &Path,
    push: Option<Arc<QueuedPushTransport<Bytes, Bytes>>>,
) -> pipeshuffle_core::Result<RunStats> {
    let storage = Arc::new(DiskShuffleStorage::try_new(
        vec![work_dir.join("local")],
        config.sub_dirs_per_local_dir(),
    )?);
    let mut writer = BypassMergeShuffleWriter::<Bytes, Bytes>::try_new(
        0,
        Arc::new(HashPartitioner::<Bytes>::try_new(opt.partitions)?),
        &BytesSerializer,
        storage,
        config,
        ShuffleWriteMetrics::default(),
    )?;

    let start = Instant::now();
    let mut input = records.iter().cloned();
    match push {
        Some(transport) => {
            writer = writer.with_push_transport(transport);
            // every other partition has a known owner
            let routes: RoutingTable = (0..opt.partitions)
                .step_by(2)
                .map(|p| (p, EndpointRef::new(format!("exec-{p}"), "localhost", 7337)))
                .collect();
            writer.insert_all_remote(&mut input, Some(&routes), ShuffleId(0))?;
        }
        None => writer.insert_all(&mut input)?,
    }
    let lengths = writer.write_partitioned_file(&work_dir.join("shuffle_0_0_0.data"))?;

    Ok(RunStats {
        elapsed: start.elapsed(),
        bytes: lengths.iter().sum(),
        pushed: writer.metrics().records_pushed(),
        dropped: writer.metrics().push_dropped(),
    })
}

fn report(name: &str, runs: &[RunStats], rows: usize) {
    let times: Vec<Duration> = runs.iter().map(|r| r.elapsed).collect();
    let avg_time = times.iter().sum::<Duration>() / times.len().max(1) as u32;
    let min_time = times.iter().min().copied().unwrap_or_default();
    let max_time = times.iter().max().copied().unwrap_or_default();
    let bytes = runs.last().map(|r| r.bytes).unwrap_or(0);

    println!();
    println!("{name} Results:");
    println!("  Average time: {avg_time:?}");
    println!("  Min time: {min_time:?}");
    println!("  Max time: {max_time:?}");
    println!("  Output size: {} KB", bytes / 1024);
    println!(
        "  Throughput: {:.2} MB/s, {:.0} records/s",
        bytes as f64 / avg_time.as_secs_f64() / 1024.0 / 1024.0,
        rows as f64 / avg_time.as_secs_f64()
    );
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let opt = ShuffleBenchOpt::from_args();

    println!("Shuffle Benchmark Configuration:");
    println!("  Rows: {}", opt.rows);
    println!("  Output partitions: {}", opt.partitions);
    println!("  Value size: {} bytes", opt.value_size);
    println!("  Iterations: {}", opt.iterations);
    println!("  File buffer: {}", opt.file_buffer);
    println!("  Transfer to: {}", !opt.no_transfer_to);
    println!();

    let config = ShuffleWriterConfig::default()
        .with_setting(PIPESHUFFLE_SHUFFLE_FILE_BUFFER, opt.file_buffer.clone())?
        .with_setting(PIPESHUFFLE_FILE_TRANSFER_TO, (!opt.no_transfer_to).to_string())?;

    println!("Generating test data...");
    let records = generate_records(opt.rows, opt.value_size);
    println!("Generated {} records", records.len());
    println!();

    println!("=== Local Only ===");
    let mut local_runs = Vec::with_capacity(opt.iterations);
    for i in 0..opt.iterations {
        let temp_dir = TempDir::new()?;
        let stats = run_once(&records, &opt, &config, temp_dir.path(), None)?;
        println!(
            "  Iteration {}: {:?} ({} KB)",
            i + 1,
            stats.elapsed,
            stats.bytes / 1024
        );
        local_runs.push(stats);
    }
    report("Local Only", &local_runs, opt.rows);

    if !opt.local_only {
        println!("=== Local + Push ===");
        let mut push_runs = Vec::with_capacity(opt.iterations);
        for i in 0..opt.iterations {
            let temp_dir = TempDir::new()?;
            let client = Arc::new(DiscardingClient::default());
            let transport = Arc::new(QueuedPushTransport::<Bytes, Bytes>::try_new(
                &BytesSerializer,
                client.clone(),
                opt.push_queue,
                &Handle::current(),
            )?);
            let stats = run_once(
                &records,
                &opt,
                &config,
                temp_dir.path(),
                Some(transport.clone()),
            )?;
            transport.shutdown().await?;
            println!(
                "  Iteration {}: {:?} ({} KB, {} pushed, {} dropped, {} delivered)",
                i + 1,
                stats.elapsed,
                stats.bytes / 1024,
                stats.pushed,
                stats.dropped,
                client.delivered.load(Ordering::Relaxed)
            );
            push_runs.push(stats);
        }
        report("Local + Push", &push_runs, opt.rows);
    }

    Ok(())
}
