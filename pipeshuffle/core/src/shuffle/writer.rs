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

//! Bypass-merge shuffle writer.
//!
//! Every record is appended to the temporary file of its partition; no
//! sorting, aggregation or spilling is involved. Once ingestion is done the
//! partition files are concatenated into one data file, partition 0 first,
//! and the byte length of each partition is reported. This is efficient when
//! the number of partitions is small enough to keep one open file per
//! partition.
//!
//! A writer is used once: one ingestion call, then either
//! [`ShuffleFileWriter::write_partitioned_file`] or [`ShuffleFileWriter::stop`].
//! `stop` may be called from another thread at any time.

use std::fmt::{self, Debug, Formatter};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info};
use parking_lot::Mutex;
use uuid::Uuid;

use super::index::ShuffleIndex;
use super::materialize::{MaterializeOptions, materialize};
use super::pool::PartitionWriterPool;
use super::sink::{LocalAppendSink, RecordSink};
use crate::config::ShuffleWriterConfig;
use crate::error::{Result, ShuffleError};
use crate::metrics::ShuffleWriteMetrics;
use crate::partitioner::Partitioner;
use crate::push::{PushTransport, RemotePushSink, RoutingTable, ShuffleId};
use crate::serde::Serializer;
use crate::storage::ShuffleStorage;

/// Interface used by map tasks to write their shuffle output.
pub trait ShuffleFileWriter<K, V>: Send + Sync {
    /// Routes every record to its partition file.
    ///
    /// # Panics
    /// Panics if records were already inserted into this writer.
    fn insert_all(&self, records: &mut dyn Iterator<Item = (K, V)>) -> Result<()>;

    /// Like [`ShuffleFileWriter::insert_all`], and also pushes each record to
    /// the executor that owns its partition in `routing_table`.
    fn insert_all_remote(
        &self,
        records: &mut dyn Iterator<Item = (K, V)>,
        routing_table: Option<&RoutingTable>,
        shuffle_id: ShuffleId,
    ) -> Result<()>;

    /// Appends all partitions to `destination` and returns their byte
    /// lengths, one per partition.
    ///
    /// # Panics
    /// Panics if nothing was inserted, or if called twice.
    fn write_partitioned_file(&self, destination: &Path) -> Result<Vec<u64>>;

    /// Releases every resource without producing output. Never fails.
    ///
    /// Ingestion checks for `stop` between records while holding the writer
    /// lock, so a call made while the input iterator is blocked waits for its
    /// next record.
    fn stop(&self);

    /// Lengths returned by the last successful `write_partitioned_file`, all
    /// zeros before that or after `stop`.
    fn partition_lengths(&self) -> Vec<u64>;

    /// Writes the data file and its [`ShuffleIndex`]. Both are first written
    /// next to their final location and renamed into place once complete.
    fn write_partitioned_file_and_index(
        &self,
        data_path: &Path,
        index_path: &Path,
    ) -> Result<ShuffleIndex> {
        let tmp_data = temp_sibling(data_path)?;
        let tmp_index = temp_sibling(index_path)?;
        let committed = File::create(&tmp_data)
            .map_err(ShuffleError::from)
            .and_then(|_| self.write_partitioned_file(&tmp_data))
            .and_then(|lengths| {
                let index = ShuffleIndex::from_partition_lengths(&lengths);
                index.write_to_file(&tmp_index)?;
                fs::rename(&tmp_index, index_path)?;
                fs::rename(&tmp_data, data_path)?;
                Ok(index)
            });
        if committed.is_err() {
            for path in [&tmp_data, &tmp_index] {
                if path.exists() {
                    if let Err(e) = fs::remove_file(path) {
                        error!("Failed to delete {path:?}: {e:?}");
                    }
                }
            }
        }
        committed
    }
}

fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
        ShuffleError::General(format!("invalid shuffle output path {path:?}"))
    })?;
    Ok(path.with_file_name(format!("{name}.{}.tmp", Uuid::new_v4())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Idle,
    Ingesting,
    Finalized,
    Aborted,
}

struct WriterInner<K, V> {
    state: WriterState,
    pool: PartitionWriterPool<K, V>,
    /// Set when ingestion saw no records and never opened the pool.
    empty_input: bool,
    partition_lengths: Vec<u64>,
}

pub struct BypassMergeShuffleWriter<K, V> {
    map_id: usize,
    num_partitions: usize,
    partitioner: Arc<dyn Partitioner<K>>,
    push_transport: Option<Arc<dyn PushTransport<K, V>>>,
    materialize_options: MaterializeOptions,
    metrics: ShuffleWriteMetrics,
    stopping: AtomicBool,
    inner: Mutex<WriterInner<K, V>>,
}

impl<K, V> BypassMergeShuffleWriter<K, V> {
    pub fn try_new(
        map_id: usize,
        partitioner: Arc<dyn Partitioner<K>>,
        serializer: &dyn Serializer<K, V>,
        storage: Arc<dyn ShuffleStorage>,
        config: &ShuffleWriterConfig,
        metrics: ShuffleWriteMetrics,
    ) -> Result<Self> {
        let num_partitions = partitioner.num_partitions();
        if num_partitions == 0 {
            return Err(ShuffleError::Configuration(
                "partitioner reports zero partitions".to_string(),
            ));
        }
        let pool = PartitionWriterPool::new(
            storage,
            serializer.new_instance(),
            config,
            metrics.clone(),
        );
        Ok(Self {
            map_id,
            num_partitions,
            partitioner,
            push_transport: None,
            materialize_options: MaterializeOptions::from(config),
            metrics,
            stopping: AtomicBool::new(false),
            inner: Mutex::new(WriterInner {
                state: WriterState::Idle,
                pool,
                empty_input: false,
                partition_lengths: vec![0; num_partitions],
            }),
        })
    }

    /// Transport used by [`ShuffleFileWriter::insert_all_remote`].
    pub fn with_push_transport(mut self, transport: Arc<dyn PushTransport<K, V>>) -> Self {
        self.push_transport = Some(transport);
        self
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn metrics(&self) -> &ShuffleWriteMetrics {
        &self.metrics
    }

    fn ingest(
        &self,
        records: &mut dyn Iterator<Item = (K, V)>,
        push: Option<(Option<&RoutingTable>, ShuffleId)>,
    ) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.state {
            WriterState::Idle => {}
            WriterState::Aborted => return Err(ShuffleError::Cancelled),
            WriterState::Ingesting | WriterState::Finalized => {
                panic!("records were already inserted into shuffle writer for map {}", self.map_id)
            }
        }
        if self.stopping.load(Ordering::Acquire) {
            return Err(ShuffleError::Cancelled);
        }
        inner.state = WriterState::Ingesting;

        let mut records = records.peekable();
        if records.peek().is_none() {
            debug!("Map {} has no records, no partition files opened", self.map_id);
            inner.empty_input = true;
            return Ok(());
        }
        inner.pool.open(self.num_partitions)?;

        let mut local = LocalAppendSink::new(&mut inner.pool);
        let mut remote = push.and_then(|(routing_table, shuffle_id)| {
            RemotePushSink::resolve(
                self.push_transport.as_deref(),
                routing_table,
                shuffle_id,
                &self.metrics,
            )
        });

        for (key, value) in records {
            if self.stopping.load(Ordering::Acquire) {
                info!("Shuffle writer for map {} stopped during ingestion", self.map_id);
                return Err(ShuffleError::Cancelled);
            }
            let partition = self.partitioner.partition(&key);
            local.accept(partition, &key, &value)?;
            if let Some(remote) = remote.as_mut() {
                remote.accept(partition, &key, &value)?;
            }
        }
        Ok(())
    }
}

impl<K, V> ShuffleFileWriter<K, V> for BypassMergeShuffleWriter<K, V>
where
    K: Send,
    V: Send,
{
    fn insert_all(&self, records: &mut dyn Iterator<Item = (K, V)>) -> Result<()> {
        self.ingest(records, None)
    }

    fn insert_all_remote(
        &self,
        records: &mut dyn Iterator<Item = (K, V)>,
        routing_table: Option<&RoutingTable>,
        shuffle_id: ShuffleId,
    ) -> Result<()> {
        self.ingest(records, Some((routing_table, shuffle_id)))
    }

    fn write_partitioned_file(&self, destination: &Path) -> Result<Vec<u64>> {
        let mut inner = self.inner.lock();
        match inner.state {
            WriterState::Ingesting => {}
            WriterState::Aborted => return Err(ShuffleError::Cancelled),
            WriterState::Idle => {
                panic!("no records were inserted into shuffle writer for map {}", self.map_id)
            }
            WriterState::Finalized => {
                panic!("shuffle writer for map {} was already finalized", self.map_id)
            }
        }
        if self.stopping.load(Ordering::Acquire) {
            return Err(ShuffleError::Cancelled);
        }

        let lengths = if inner.pool.is_open() {
            let committed = inner.pool.commit_all()?;
            materialize(
                committed,
                destination,
                &self.materialize_options,
                &self.metrics,
            )?
        } else if inner.empty_input {
            vec![0; self.num_partitions]
        } else {
            return Err(ShuffleError::Internal(format!(
                "partition files of map {} were released by an earlier failed finalize",
                self.map_id
            )));
        };
        inner.partition_lengths = lengths.clone();
        inner.state = WriterState::Finalized;
        Ok(lengths)
    }

    fn stop(&self) {
        self.stopping.store(true, Ordering::Release);
        let mut inner = self.inner.lock();
        if matches!(inner.state, WriterState::Finalized | WriterState::Aborted) {
            return;
        }
        let report = inner.pool.abort();
        if !report.is_clean() {
            error!(
                "Shuffle writer for map {} left {} temporary files behind: {:?}",
                self.map_id,
                report.failed.len(),
                report.failed
            );
        }
        inner.state = WriterState::Aborted;
        inner.partition_lengths = vec![0; self.num_partitions];
    }

    fn partition_lengths(&self) -> Vec<u64> {
        self.inner.lock().partition_lengths.clone()
    }
}

impl<K, V> Debug for BypassMergeShuffleWriter<K, V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("BypassMergeShuffleWriter")
            .field("map_id", &self.map_id)
            .field("num_partitions", &self.num_partitions)
            .field("push", &self.push_transport.is_some())
            .field("state", &self.inner.try_lock().map(|inner| inner.state))
            .finish()
    }
}
