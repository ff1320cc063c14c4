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

use super::pool::PartitionWriterPool;
use crate::error::Result;

/// Destination of routed records during ingestion.
pub trait RecordSink<K, V> {
    fn accept(&mut self, partition: usize, key: &K, value: &V) -> Result<()>;
}

/// Appends records to the local partition files.
pub struct LocalAppendSink<'a, K, V> {
    pool: &'a mut PartitionWriterPool<K, V>,
}

impl<'a, K, V> LocalAppendSink<'a, K, V> {
    pub fn new(pool: &'a mut PartitionWriterPool<K, V>) -> Self {
        Self { pool }
    }
}

impl<K, V> RecordSink<K, V> for LocalAppendSink<'_, K, V> {
    fn accept(&mut self, partition: usize, key: &K, value: &V) -> Result<()> {
        self.pool.append(partition, key, value)
    }
}
