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

//! One temporary partition file per output partition, opened, committed and
//! aborted as a unit.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, warn};

use super::block_writer::{DiskBlockWriter, FileSegment};
use crate::config::ShuffleWriterConfig;
use crate::error::{Result, ShuffleError};
use crate::metrics::ShuffleWriteMetrics;
use crate::serde::SerializerInstance;
use crate::storage::ShuffleStorage;

#[derive(Debug)]
enum PoolState {
    Unopened,
    Open(Vec<DiskBlockWriter>),
    Released,
}

/// Outcome of [`PartitionWriterPool::abort`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AbortReport {
    /// Writers whose partial output was reverted
    pub reverted: usize,
    /// Temporary files deleted
    pub deleted: usize,
    /// Temporary files that could not be deleted
    pub failed: Vec<PathBuf>,
}

impl AbortReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct PartitionWriterPool<K, V> {
    storage: Arc<dyn ShuffleStorage>,
    serializer: Box<dyn SerializerInstance<K, V>>,
    buffer_size: usize,
    sync_writes: bool,
    metrics: ShuffleWriteMetrics,
    state: PoolState,
    scratch: Vec<u8>,
}

impl<K, V> PartitionWriterPool<K, V> {
    pub fn new(
        storage: Arc<dyn ShuffleStorage>,
        serializer: Box<dyn SerializerInstance<K, V>>,
        config: &ShuffleWriterConfig,
        metrics: ShuffleWriteMetrics,
    ) -> Self {
        Self {
            storage,
            serializer,
            buffer_size: config.file_buffer_size(),
            sync_writes: config.sync_writes(),
            metrics,
            state: PoolState::Unopened,
            scratch: vec![],
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PoolState::Open(_))
    }

    /// Opens one writer per partition, each on a fresh temporary block.
    ///
    /// # Panics
    /// Panics if the pool has been opened before.
    pub fn open(&mut self, num_partitions: usize) -> Result<()> {
        assert!(
            matches!(self.state, PoolState::Unopened),
            "partition writers have already been opened"
        );
        let start = Instant::now();
        let mut writers = Vec::with_capacity(num_partitions);
        let opened = self.open_writers(num_partitions, &mut writers);
        // writers opened before a failure stay in the pool so abort can remove them
        self.state = PoolState::Open(writers);
        opened?;
        self.metrics
            .inc_write_time(start.elapsed().as_nanos() as u64);
        debug!("Opened {num_partitions} partition writers");
        Ok(())
    }

    fn open_writers(
        &self,
        num_partitions: usize,
        writers: &mut Vec<DiskBlockWriter>,
    ) -> Result<()> {
        for _ in 0..num_partitions {
            let (block, path) = self.storage.create_temp_shuffle_block()?;
            writers.push(DiskBlockWriter::open(
                block,
                path,
                self.buffer_size,
                self.sync_writes,
                self.metrics.clone(),
            )?);
        }
        Ok(())
    }

    /// Serializes a record and appends it to the writer of `partition`.
    pub fn append(&mut self, partition: usize, key: &K, value: &V) -> Result<()> {
        let PoolState::Open(writers) = &mut self.state else {
            return Err(ShuffleError::Internal(
                "append to partition writers that are not open".to_string(),
            ));
        };
        let num_partitions = writers.len();
        let writer = writers.get_mut(partition).ok_or_else(|| {
            ShuffleError::Internal(format!(
                "partition {partition} out of range for {num_partitions} partitions"
            ))
        })?;
        self.scratch.clear();
        self.serializer
            .serialize_record(key, value, &mut self.scratch)?;
        writer.write_record(&self.scratch)
    }

    /// Commits every writer. On success the temporary files are handed over
    /// to the returned [`CommittedPartitions`]; on failure every writer stays
    /// in the pool, committed or not, for [`PartitionWriterPool::abort`].
    pub fn commit_all(&mut self) -> Result<CommittedPartitions> {
        let PoolState::Open(writers) = &mut self.state else {
            return Err(ShuffleError::Internal(
                "commit of partition writers that are not open".to_string(),
            ));
        };
        let mut segments = Vec::with_capacity(writers.len());
        for writer in writers.iter_mut() {
            segments.push(writer.commit_and_close()?);
        }
        self.state = PoolState::Released;
        Ok(CommittedPartitions {
            segments: segments.into_iter().map(Some).collect(),
            storage: self.storage.clone(),
        })
    }

    /// Reverts, closes and deletes every writer still owned by the pool.
    pub fn abort(&mut self) -> AbortReport {
        let mut report = AbortReport::default();
        let PoolState::Open(writers) =
            std::mem::replace(&mut self.state, PoolState::Released)
        else {
            return report;
        };
        for mut writer in writers {
            writer.revert_partial_writes_and_close();
            report.reverted += 1;
            if self.storage.remove_block(writer.block()) {
                report.deleted += 1;
            } else {
                error!("Error while deleting file {:?}", writer.path());
                report.failed.push(writer.path().to_path_buf());
            }
        }
        report
    }
}

impl<K, V> Drop for PartitionWriterPool<K, V> {
    fn drop(&mut self) {
        if self.is_open() {
            warn!("Partition writers dropped while open, aborting them");
            self.abort();
        }
    }
}

/// Committed partition files awaiting materialization, indexed by partition.
///
/// Files that are still owned when this is dropped are deleted.
pub struct CommittedPartitions {
    segments: Vec<Option<FileSegment>>,
    storage: Arc<dyn ShuffleStorage>,
}

impl CommittedPartitions {
    pub fn num_partitions(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, partition: usize) -> Option<&FileSegment> {
        self.segments.get(partition).and_then(Option::as_ref)
    }

    /// Deletes the temporary file of `partition`. Failures are only logged.
    pub fn release(&mut self, partition: usize) {
        if let Some(segment) = self.segments.get_mut(partition).and_then(Option::take) {
            if !self.storage.remove_block(&segment.block) {
                error!("Unable to delete file for partition {partition}");
            }
        }
    }
}

impl Drop for CommittedPartitions {
    fn drop(&mut self) {
        for partition in 0..self.segments.len() {
            self.release(partition);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serde::{BytesSerializer, Serializer};
    use crate::storage::DiskShuffleStorage;
    use bytes::Bytes;
    use std::fs;
    use tempfile::TempDir;

    fn pool(dir: &TempDir) -> Result<(Arc<DiskShuffleStorage>, PartitionWriterPool<Bytes, Bytes>)> {
        let storage = Arc::new(DiskShuffleStorage::try_new(
            vec![dir.path().to_path_buf()],
            4,
        )?);
        let pool = PartitionWriterPool::new(
            storage.clone(),
            BytesSerializer.new_instance(),
            &ShuffleWriterConfig::default(),
            ShuffleWriteMetrics::default(),
        );
        Ok((storage, pool))
    }

    fn record(key: &'static str, value: &'static str) -> (Bytes, Bytes) {
        (Bytes::from_static(key.as_bytes()), Bytes::from_static(value.as_bytes()))
    }

    #[test]
    fn commit_hands_files_over() -> Result<()> {
        let dir = TempDir::new()?;
        let (storage, mut pool) = pool(&dir)?;
        pool.open(2)?;
        let (k, v) = record("k", "v");
        pool.append(1, &k, &v)?;

        let committed = pool.commit_all()?;
        assert!(!pool.is_open());
        assert_eq!(committed.num_partitions(), 2);
        assert_eq!(committed.segment(0).map(|s| s.length), Some(0));
        // 4 byte prefix + 1 byte key, 4 byte prefix + 1 byte value
        assert_eq!(committed.segment(1).map(|s| s.length), Some(10));
        let path = committed.segment(1).map(|s| s.path.clone());
        assert_eq!(storage.temp_blocks()?.len(), 2);

        drop(committed);
        assert!(storage.temp_blocks()?.is_empty());
        assert!(path.is_some_and(|p| !p.exists()));
        Ok(())
    }

    #[test]
    fn abort_removes_every_file() -> Result<()> {
        let dir = TempDir::new()?;
        let (storage, mut pool) = pool(&dir)?;
        pool.open(3)?;
        let (k, v) = record("key", "value");
        pool.append(0, &k, &v)?;
        pool.append(2, &k, &v)?;

        let report = pool.abort();
        assert_eq!(report.reverted, 3);
        assert_eq!(report.deleted, 3);
        assert!(report.is_clean());
        assert!(storage.temp_blocks()?.is_empty());

        // a second abort finds nothing left to do
        assert_eq!(pool.abort(), AbortReport::default());
        Ok(())
    }

    #[test]
    fn failed_commit_leaves_writers_for_abort() -> Result<()> {
        let dir = TempDir::new()?;
        let (storage, mut pool) = pool(&dir)?;
        pool.open(3)?;
        let (k, v) = record("key", "value");
        pool.append(0, &k, &v)?;
        pool.append(2, &k, &v)?;
        if let PoolState::Open(writers) = &mut pool.state {
            // a writer that is already closed cannot be committed again
            writers[1].commit_and_close()?;
        }

        assert!(matches!(pool.commit_all(), Err(ShuffleError::Internal(_))));
        assert!(pool.is_open());
        assert_eq!(storage.temp_blocks()?.len(), 3);

        let report = pool.abort();
        assert_eq!(report.reverted, 3);
        assert_eq!(report.deleted, 3);
        assert!(report.is_clean());
        assert!(storage.temp_blocks()?.is_empty());
        Ok(())
    }

    #[test]
    fn drop_while_open_aborts() -> Result<()> {
        let dir = TempDir::new()?;
        let (storage, mut pool) = pool(&dir)?;
        pool.open(2)?;
        drop(pool);
        assert!(storage.temp_blocks()?.is_empty());
        Ok(())
    }

    #[test]
    fn out_of_range_partition_is_rejected() -> Result<()> {
        let dir = TempDir::new()?;
        let (_storage, mut pool) = pool(&dir)?;
        pool.open(2)?;
        let (k, v) = record("k", "v");
        assert!(matches!(
            pool.append(2, &k, &v),
            Err(ShuffleError::Internal(_))
        ));
        Ok(())
    }

    #[test]
    #[should_panic(expected = "already been opened")]
    fn open_twice_panics() {
        let dir = TempDir::new().unwrap();
        let (_storage, mut pool) = pool(&dir).unwrap();
        pool.open(1).unwrap();
        let _ = pool.open(1);
    }

    #[test]
    fn release_tolerates_missing_files() -> Result<()> {
        let dir = TempDir::new()?;
        let (_storage, mut pool) = pool(&dir)?;
        pool.open(1)?;
        let mut committed = pool.commit_all()?;
        if let Some(segment) = committed.segment(0) {
            fs::remove_file(&segment.path)?;
        }
        committed.release(0);
        assert!(committed.segment(0).is_none());
        Ok(())
    }
}
