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

//! Routing of record keys to output partitions.

use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use seahash::SeaHasher;

use crate::error::{Result, ShuffleError};

/// Maps a record key to one of `num_partitions` output partitions.
///
/// Implementations must be pure: the same key always lands in the same
/// partition, for any process that builds the partitioner with the same
/// partition count.
pub trait Partitioner<K>: Send + Sync {
    /// Number of output partitions.
    fn num_partitions(&self) -> usize;

    /// Output partition of `key`, always in `[0, num_partitions)`.
    fn partition(&self, key: &K) -> usize;
}

/// `x mod n` that never returns a negative value.
pub fn non_negative_mod(x: i64, n: usize) -> usize {
    let n = n as i64;
    let raw = x % n;
    (if raw < 0 { raw + n } else { raw }) as usize
}

fn check_partition_count(num_partitions: usize) -> Result<()> {
    if num_partitions == 0 {
        return Err(ShuffleError::Configuration(
            "number of shuffle partitions must be positive".to_string(),
        ));
    }
    Ok(())
}

/// Hash partitioning over any [`Hash`] key.
///
/// Keys are hashed with SeaHash using its fixed default seeds, so the mapping
/// is stable across executors and restarts.
pub struct HashPartitioner<K> {
    num_partitions: usize,
    _key: PhantomData<fn(&K)>,
}

impl<K> HashPartitioner<K> {
    pub fn try_new(num_partitions: usize) -> Result<Self> {
        check_partition_count(num_partitions)?;
        Ok(Self {
            num_partitions,
            _key: PhantomData,
        })
    }
}

impl<K> Debug for HashPartitioner<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashPartitioner")
            .field("num_partitions", &self.num_partitions)
            .finish()
    }
}

impl<K: Hash> Partitioner<K> for HashPartitioner<K> {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn partition(&self, key: &K) -> usize {
        let mut hasher = SeaHasher::new();
        key.hash(&mut hasher);
        non_negative_mod(hasher.finish() as i64, self.num_partitions)
    }
}

/// Partitioning through a caller supplied function of the key.
///
/// The function result is reduced with [`non_negative_mod`], so it may return
/// any integer.
pub struct FnPartitioner<K> {
    num_partitions: usize,
    func: Box<dyn Fn(&K) -> i64 + Send + Sync>,
}

impl<K> FnPartitioner<K> {
    pub fn try_new(
        num_partitions: usize,
        func: impl Fn(&K) -> i64 + Send + Sync + 'static,
    ) -> Result<Self> {
        check_partition_count(num_partitions)?;
        Ok(Self {
            num_partitions,
            func: Box::new(func),
        })
    }
}

impl<K> Debug for FnPartitioner<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnPartitioner")
            .field("num_partitions", &self.num_partitions)
            .finish_non_exhaustive()
    }
}

impl<K> Partitioner<K> for FnPartitioner<K> {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn partition(&self, key: &K) -> usize {
        non_negative_mod((self.func)(key), self.num_partitions)
    }
}
