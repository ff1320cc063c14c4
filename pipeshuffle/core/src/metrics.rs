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

//! Shuffle write metrics.

use std::time::Duration;

use datafusion::physical_plan::metrics::{
    self, ExecutionPlanMetricsSet, MetricBuilder, MetricsSet,
};

/// Metrics reported by one shuffle map task.
#[derive(Debug, Clone)]
pub struct ShuffleWriteMetrics {
    /// Time spent opening, flushing and concatenating shuffle files.
    /// Maps to "shuffleWriteTime" on the engine side.
    pub(crate) write_time: metrics::Time,
    /// Bytes appended to partition files
    pub(crate) bytes_written: metrics::Count,
    /// Records appended to partition files
    pub(crate) records_written: metrics::Count,
    /// Records handed to the push transport
    pub(crate) records_pushed: metrics::Count,
    /// Records whose partition had no known remote owner
    pub(crate) push_missing_route: metrics::Count,
    /// Records the push transport dropped because its queue was full
    pub(crate) push_dropped: metrics::Count,
    set: ExecutionPlanMetricsSet,
}

impl ShuffleWriteMetrics {
    /// Registers the shuffle write metrics for `map_partition` in `metrics`.
    pub fn new(map_partition: usize, metrics: &ExecutionPlanMetricsSet) -> Self {
        Self {
            write_time: MetricBuilder::new(metrics)
                .subset_time("write_time", map_partition),
            bytes_written: MetricBuilder::new(metrics)
                .counter("bytes_written", map_partition),
            records_written: MetricBuilder::new(metrics)
                .counter("records_written", map_partition),
            records_pushed: MetricBuilder::new(metrics)
                .counter("records_pushed", map_partition),
            push_missing_route: MetricBuilder::new(metrics)
                .counter("push_missing_route", map_partition),
            push_dropped: MetricBuilder::new(metrics)
                .counter("push_dropped", map_partition),
            set: metrics.clone(),
        }
    }

    /// Adds time measured outside of a timer guard, in nanoseconds.
    pub fn inc_write_time(&self, nanos: u64) {
        self.write_time.add_duration(Duration::from_nanos(nanos));
    }

    pub fn write_time_nanos(&self) -> usize {
        self.write_time.value()
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written.value()
    }

    pub fn records_written(&self) -> usize {
        self.records_written.value()
    }

    pub fn records_pushed(&self) -> usize {
        self.records_pushed.value()
    }

    pub fn push_missing_route(&self) -> usize {
        self.push_missing_route.value()
    }

    pub fn push_dropped(&self) -> usize {
        self.push_dropped.value()
    }

    /// Snapshot of every metric registered in the underlying set.
    pub fn metrics_set(&self) -> MetricsSet {
        self.set.clone_inner()
    }
}

impl Default for ShuffleWriteMetrics {
    fn default() -> Self {
        Self::new(0, &ExecutionPlanMetricsSet::new())
    }
}
