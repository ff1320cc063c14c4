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

//! Buffered append-only writer for a single temporary shuffle block.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::error;

use crate::error::{Result, ShuffleError};
use crate::metrics::ShuffleWriteMetrics;
use crate::storage::TempShuffleBlockId;

/// A committed region of a temporary block. Partition writers always start at
/// offset zero, so only the length is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSegment {
    pub block: TempShuffleBlockId,
    pub path: PathBuf,
    pub length: u64,
}

#[derive(Debug)]
enum WriterStatus {
    Open(BufWriter<File>),
    Committed,
    Reverted,
}

/// Appends serialized records to one temporary file.
///
/// Bytes become visible to readers only once [`DiskBlockWriter::commit_and_close`]
/// returns. Anything written after the last commit is discarded by
/// [`DiskBlockWriter::revert_partial_writes_and_close`].
#[derive(Debug)]
pub struct DiskBlockWriter {
    block: TempShuffleBlockId,
    path: PathBuf,
    sync_writes: bool,
    status: WriterStatus,
    committed_position: u64,
    position: u64,
    records_since_commit: usize,
    metrics: ShuffleWriteMetrics,
}

impl DiskBlockWriter {
    /// Creates the backing file of `block`. Fails if it already exists.
    pub fn open(
        block: TempShuffleBlockId,
        path: PathBuf,
        buffer_size: usize,
        sync_writes: bool,
        metrics: ShuffleWriteMetrics,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self {
            block,
            path,
            sync_writes,
            status: WriterStatus::Open(BufWriter::with_capacity(buffer_size, file)),
            committed_position: 0,
            position: 0,
            records_since_commit: 0,
            metrics,
        })
    }

    pub fn block(&self) -> &TempShuffleBlockId {
        &self.block
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        matches!(self.status, WriterStatus::Open(_))
    }

    /// Bytes written so far, committed or not.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_record(&mut self, record: &[u8]) -> Result<()> {
        let WriterStatus::Open(out) = &mut self.status else {
            return Err(ShuffleError::Internal(format!(
                "write to closed shuffle block {}",
                self.block
            )));
        };
        out.write_all(record)?;
        self.position += record.len() as u64;
        self.records_since_commit += 1;
        Ok(())
    }

    /// Flushes buffered bytes, optionally syncs them, and closes the file.
    ///
    /// If the flush fails the writer stays open so that it can still be
    /// reverted.
    pub fn commit_and_close(&mut self) -> Result<FileSegment> {
        let WriterStatus::Open(out) = &mut self.status else {
            return Err(ShuffleError::Internal(format!(
                "shuffle block {} is already closed",
                self.block
            )));
        };

        let timer = self.metrics.write_time.timer();
        out.flush()?;
        if self.sync_writes {
            out.get_ref().sync_all()?;
        }
        timer.done();
        self.status = WriterStatus::Committed;

        self.metrics
            .bytes_written
            .add((self.position - self.committed_position) as usize);
        self.metrics.records_written.add(self.records_since_commit);
        self.committed_position = self.position;
        self.records_since_commit = 0;

        Ok(FileSegment {
            block: self.block,
            path: self.path.clone(),
            length: self.committed_position,
        })
    }

    /// Discards uncommitted bytes and closes the file. Never fails; problems
    /// are logged.
    pub fn revert_partial_writes_and_close(&mut self) {
        let status = std::mem::replace(&mut self.status, WriterStatus::Reverted);
        if let WriterStatus::Open(out) = status {
            // the unflushed buffer is dropped with the writer
            let (file, _) = out.into_parts();
            if let Err(e) = file.set_len(self.committed_position) {
                error!(
                    "Failed to revert partial writes to shuffle block {:?}: {e:?}",
                    self.path
                );
            }
        }
        self.position = self.committed_position;
        self.records_since_commit = 0;
    }
}
