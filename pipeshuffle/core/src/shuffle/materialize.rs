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

//! Concatenation of committed partition files into a single output file.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use log::debug;

use super::pool::CommittedPartitions;
use crate::config::ShuffleWriterConfig;
use crate::error::{Result, ShuffleError};
use crate::metrics::ShuffleWriteMetrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeOptions {
    /// Let the kernel move bytes between files where the platform supports it
    pub transfer_to: bool,
    /// Buffer size of the user-space copy
    pub buffer_size: usize,
}

impl From<&ShuffleWriterConfig> for MaterializeOptions {
    fn from(config: &ShuffleWriterConfig) -> Self {
        Self {
            transfer_to: config.transfer_to_enabled(),
            buffer_size: config.file_buffer_size(),
        }
    }
}

/// Appends every committed partition to `destination` in partition order and
/// returns the number of bytes each partition contributed.
///
/// Each temporary file is deleted once copied. Failing to delete it is
/// logged, failing to write the destination is returned. Files not yet copied
/// when an error is returned are deleted when `committed` is dropped.
pub fn materialize(
    mut committed: CommittedPartitions,
    destination: &Path,
    options: &MaterializeOptions,
    metrics: &ShuffleWriteMetrics,
) -> Result<Vec<u64>> {
    let mut lengths = vec![0u64; committed.num_partitions()];
    let timer = metrics.write_time.timer();
    let mut out = OpenOptions::new()
        .create(true)
        .append(true)
        .open(destination)?;

    for (partition, length) in lengths.iter_mut().enumerate() {
        let Some(segment) = committed.segment(partition) else {
            continue;
        };
        let mut input = File::open(&segment.path)?;
        let copied = copy_stream(&mut input, &mut out, options)?;
        if copied != segment.length {
            return Err(ShuffleError::Internal(format!(
                "copied {copied} bytes of partition {partition} but {} were committed",
                segment.length
            )));
        }
        *length = copied;
        committed.release(partition);
    }
    out.flush()?;
    timer.done();

    debug!(
        "Materialized {} partitions, {} bytes into {destination:?}",
        lengths.len(),
        lengths.iter().sum::<u64>()
    );
    Ok(lengths)
}

fn copy_stream(input: &mut File, out: &mut File, options: &MaterializeOptions) -> Result<u64> {
    if options.transfer_to {
        // std specializes file to file copies into copy_file_range/sendfile
        return Ok(io::copy(input, out)?);
    }
    let mut buf = vec![0u8; options.buffer_size.max(1)];
    let mut copied = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => return Ok(copied),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        out.write_all(&buf[..n])?;
        copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serde::{BytesSerializer, Serializer};
    use crate::shuffle::pool::PartitionWriterPool;
    use crate::storage::{DiskShuffleStorage, ShuffleStorage};
    use bytes::Bytes;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn committed_partitions(
        storage: Arc<DiskShuffleStorage>,
        records: &[(usize, &'static str)],
    ) -> Result<CommittedPartitions> {
        let mut pool = PartitionWriterPool::new(
            storage,
            BytesSerializer.new_instance(),
            &ShuffleWriterConfig::default(),
            ShuffleWriteMetrics::default(),
        );
        pool.open(3)?;
        for (partition, payload) in records {
            let bytes = Bytes::from_static(payload.as_bytes());
            pool.append(*partition, &bytes, &bytes)?;
        }
        pool.commit_all()
    }

    fn check_copy_mode(transfer_to: bool) -> Result<()> {
        let dir = TempDir::new()?;
        let storage = Arc::new(DiskShuffleStorage::try_new(
            vec![dir.path().join("local")],
            2,
        )?);
        let committed =
            committed_partitions(storage.clone(), &[(2, "zz"), (0, "a"), (2, "y")])?;

        let destination = dir.path().join("output.data");
        fs::write(&destination, b"prefix")?;
        let options = MaterializeOptions {
            transfer_to,
            buffer_size: 3,
        };
        let metrics = ShuffleWriteMetrics::default();
        let lengths = materialize(committed, &destination, &options, &metrics)?;

        // every field carries a 4 byte length prefix
        assert_eq!(lengths, vec![10, 0, 22]);
        let data = fs::read(&destination)?;
        assert_eq!(&data[..6], b"prefix");
        assert_eq!(data.len() as u64, 6 + lengths.iter().sum::<u64>());
        assert!(storage.temp_blocks()?.is_empty());
        assert!(metrics.write_time_nanos() > 0);
        Ok(())
    }

    #[test]
    fn kernel_copy() -> Result<()> {
        check_copy_mode(true)
    }

    #[test]
    fn buffered_copy() -> Result<()> {
        check_copy_mode(false)
    }

    #[test]
    fn both_copy_modes_produce_identical_bytes() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = Arc::new(DiskShuffleStorage::try_new(
            vec![dir.path().join("local")],
            2,
        )?);
        let metrics = ShuffleWriteMetrics::default();
        let mut outputs = vec![];
        for transfer_to in [true, false] {
            let committed =
                committed_partitions(storage.clone(), &[(1, "one"), (0, "zero")])?;
            let destination = dir.path().join(format!("out-{transfer_to}"));
            let options = MaterializeOptions {
                transfer_to,
                buffer_size: 5,
            };
            materialize(committed, &destination, &options, &metrics)?;
            outputs.push(fs::read(&destination)?);
        }
        assert_eq!(outputs[0], outputs[1]);
        Ok(())
    }

    #[test]
    fn destination_failure_cleans_up_temp_files() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = Arc::new(DiskShuffleStorage::try_new(
            vec![dir.path().join("local")],
            2,
        )?);
        let committed = committed_partitions(storage.clone(), &[(0, "a")])?;
        let missing_parent = dir.path().join("no-such-dir").join("output.data");
        let result = materialize(
            committed,
            &missing_parent,
            &MaterializeOptions {
                transfer_to: true,
                buffer_size: 1024,
            },
            &ShuffleWriteMetrics::default(),
        );
        assert!(matches!(result, Err(ShuffleError::IoError(_))));
        assert!(storage.temp_blocks()?.is_empty());
        Ok(())
    }

    #[test]
    fn missing_committed_file_fails() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = Arc::new(DiskShuffleStorage::try_new(
            vec![dir.path().join("local")],
            2,
        )?);
        let committed = committed_partitions(storage.clone(), &[(0, "a"), (1, "b")])?;
        let lost = committed.segment(1).map(|s| s.path.clone());
        if let Some(lost) = &lost {
            fs::remove_file(lost)?;
        }

        let destination = dir.path().join("output.data");
        let result = materialize(
            committed,
            &destination,
            &MaterializeOptions {
                transfer_to: true,
                buffer_size: 1024,
            },
            &ShuffleWriteMetrics::default(),
        );
        assert!(matches!(result, Err(ShuffleError::IoError(_))));
        assert!(storage.temp_blocks()?.is_empty());
        Ok(())
    }
}
