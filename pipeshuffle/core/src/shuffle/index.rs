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

//! Companion index of a materialized shuffle data file.
//!
//! ```text
//! [i64: start of partition 0] ... [i64: start of partition n-1][i64: data length]
//! ```
//!
//! Entries are little-endian. Partition `i` occupies bytes
//! `[entry_i, entry_{i+1})` of the data file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{Result, ShuffleError};

const ENTRY_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleIndex {
    offsets: Vec<i64>,
}

impl ShuffleIndex {
    /// Builds the index of a data file from the per-partition byte lengths
    /// returned by materialization.
    pub fn from_partition_lengths(lengths: &[u64]) -> Self {
        let mut offsets = Vec::with_capacity(lengths.len() + 1);
        let mut offset = 0i64;
        offsets.push(offset);
        for length in lengths {
            offset += *length as i64;
            offsets.push(offset);
        }
        Self { offsets }
    }

    pub fn partition_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Byte range `[start, end)` of `partition`.
    ///
    /// # Panics
    /// Panics if `partition >= partition_count()`.
    pub fn partition_range(&self, partition: usize) -> (i64, i64) {
        (self.offsets[partition], self.offsets[partition + 1])
    }

    pub fn partition_lengths(&self) -> Vec<u64> {
        self.offsets
            .windows(2)
            .map(|w| (w[1] - w[0]) as u64)
            .collect()
    }

    pub fn total_length(&self) -> i64 {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        for offset in &self.offsets {
            writer.write_all(&offset.to_le_bytes())?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len() as usize;
        if file_size % ENTRY_SIZE != 0 {
            return Err(ShuffleError::General(format!(
                "Invalid index file size: {file_size} (must be multiple of {ENTRY_SIZE})"
            )));
        }
        let entry_count = file_size / ENTRY_SIZE;
        if entry_count < 2 {
            return Err(ShuffleError::General(format!(
                "Index file too small: {entry_count} entries (need at least 2)"
            )));
        }

        let mut reader = BufReader::new(file);
        let mut offsets = Vec::with_capacity(entry_count);
        let mut buf = [0u8; ENTRY_SIZE];
        for _ in 0..entry_count {
            reader.read_exact(&mut buf)?;
            offsets.push(i64::from_le_bytes(buf));
        }
        if offsets.windows(2).any(|w| w[1] < w[0]) {
            return Err(ShuffleError::General(format!(
                "Index file {path:?} has decreasing offsets"
            )));
        }
        Ok(Self { offsets })
    }
}
