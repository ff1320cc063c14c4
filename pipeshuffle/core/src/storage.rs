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

//! Allocation and deletion of the temporary files backing partition writers.

use std::fmt::{self, Display, Formatter};
use std::fs;
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, error, warn};
use seahash::SeaHasher;
use uuid::Uuid;

use crate::error::{Result, ShuffleError};

const TEMP_SHUFFLE_PREFIX: &str = "temp_shuffle_";

/// Identifier of a temporary shuffle block, unique per executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempShuffleBlockId(Uuid);

impl TempShuffleBlockId {
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }

    /// File name of the block, `temp_shuffle_<uuid>`.
    pub fn name(&self) -> String {
        format!("{TEMP_SHUFFLE_PREFIX}{}", self.0)
    }

    /// Parses a file name produced by [`TempShuffleBlockId::name`].
    pub fn parse(name: &str) -> Option<Self> {
        name.strip_prefix(TEMP_SHUFFLE_PREFIX)
            .and_then(|id| Uuid::parse_str(id).ok())
            .map(Self)
    }
}

impl Display for TempShuffleBlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Storage that hands out temporary files for partition writers.
///
/// The shuffle writer only appends to, truncates, and deletes these files; it
/// never assumes anything about where they live.
pub trait ShuffleStorage: Send + Sync {
    /// Allocates a fresh temporary block and the path backing it. The file
    /// itself is created by the writer that opens it.
    fn create_temp_shuffle_block(&self) -> Result<(TempShuffleBlockId, PathBuf)>;

    /// Deletes the storage backing `block`. Returns false if nothing was deleted.
    fn remove_block(&self, block: &TempShuffleBlockId) -> bool;

    /// Temporary blocks that currently have backing storage.
    fn temp_blocks(&self) -> Result<Vec<TempShuffleBlockId>>;
}

/// Temporary blocks spread over hashed sub-directories of local directories,
/// so that no single directory grows too large.
#[derive(Debug)]
pub struct DiskShuffleStorage {
    local_dirs: Vec<PathBuf>,
    sub_dirs_per_local_dir: usize,
}

impl DiskShuffleStorage {
    pub fn try_new(local_dirs: Vec<PathBuf>, sub_dirs_per_local_dir: usize) -> Result<Self> {
        if local_dirs.is_empty() {
            return Err(ShuffleError::Configuration(
                "at least one local directory is required".to_string(),
            ));
        }
        if sub_dirs_per_local_dir == 0 {
            return Err(ShuffleError::Configuration(
                "sub_dirs_per_local_dir must be positive".to_string(),
            ));
        }
        for dir in &local_dirs {
            fs::create_dir_all(dir).map_err(|e| {
                error!("Failed to create local shuffle dir {dir:?}: {e:?}");
                ShuffleError::IoError(e)
            })?;
        }
        Ok(Self {
            local_dirs,
            sub_dirs_per_local_dir,
        })
    }

    pub fn local_dirs(&self) -> &[PathBuf] {
        &self.local_dirs
    }

    /// Path of the file backing `name`, creating its sub-directory if needed.
    pub fn get_file(&self, name: &str) -> Result<PathBuf> {
        let dir = self.sub_dir_for(name);
        fs::create_dir_all(&dir)?;
        Ok(dir.join(name))
    }

    fn sub_dir_for(&self, name: &str) -> PathBuf {
        let mut hasher = SeaHasher::new();
        hasher.write(name.as_bytes());
        let hash = hasher.finish() as usize;
        let dir_id = hash % self.local_dirs.len();
        let sub_dir_id = (hash / self.local_dirs.len()) % self.sub_dirs_per_local_dir;
        self.local_dirs[dir_id].join(format!("{sub_dir_id:02x}"))
    }

    fn scan_dir(dir: &Path, found: &mut Vec<TempShuffleBlockId>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                Self::scan_dir(&entry.path(), found)?;
            } else if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(TempShuffleBlockId::parse)
            {
                found.push(id);
            }
        }
        Ok(())
    }
}

impl ShuffleStorage for DiskShuffleStorage {
    fn create_temp_shuffle_block(&self) -> Result<(TempShuffleBlockId, PathBuf)> {
        loop {
            let id = TempShuffleBlockId::new_random();
            let path = self.get_file(&id.name())?;
            if !path.exists() {
                debug!("Allocated temporary shuffle block {id} at {path:?}");
                return Ok((id, path));
            }
        }
    }

    fn remove_block(&self, block: &TempShuffleBlockId) -> bool {
        let path = self.sub_dir_for(&block.name()).join(block.name());
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to delete temporary shuffle block {path:?}: {e:?}");
                false
            }
        }
    }

    fn temp_blocks(&self) -> Result<Vec<TempShuffleBlockId>> {
        let mut found = vec![];
        for dir in &self.local_dirs {
            Self::scan_dir(dir, &mut found)?;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn block_names_round_trip() {
        let id = TempShuffleBlockId::new_random();
        assert!(id.name().starts_with("temp_shuffle_"));
        assert_eq!(TempShuffleBlockId::parse(&id.name()), Some(id));
        assert_eq!(TempShuffleBlockId::parse("shuffle_0_1_0.data"), None);
    }

    #[test]
    fn temp_blocks_are_distinct_and_tracked() -> Result<()> {
        let dirs = [TempDir::new()?, TempDir::new()?];
        let storage = DiskShuffleStorage::try_new(
            dirs.iter().map(|d| d.path().to_path_buf()).collect(),
            4,
        )?;

        let (a, path_a) = storage.create_temp_shuffle_block()?;
        let (b, path_b) = storage.create_temp_shuffle_block()?;
        assert_ne!(a, b);
        assert_ne!(path_a, path_b);
        assert!(storage.temp_blocks()?.is_empty());

        fs::write(&path_a, b"abc")?;
        fs::write(&path_b, b"def")?;
        let mut live = storage.temp_blocks()?;
        live.sort_by_key(|id| id.name());
        let mut expected = vec![a, b];
        expected.sort_by_key(|id| id.name());
        assert_eq!(live, expected);

        assert!(storage.remove_block(&a));
        assert!(!storage.remove_block(&a));
        assert_eq!(storage.temp_blocks()?, vec![b]);
        Ok(())
    }

    #[test]
    fn requires_a_local_dir() {
        assert!(matches!(
            DiskShuffleStorage::try_new(vec![], 64),
            Err(ShuffleError::Configuration(_))
        ));
    }
}
