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

#![doc = include_str!("../README.md")]

/// The current version of pipeshuffle, derived from the Cargo package version.
pub const PIPESHUFFLE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shuffle writer configuration settings.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// Shuffle write metrics.
pub mod metrics;
/// Routing of keys to output partitions.
pub mod partitioner;
/// Eager delivery of records to remote executors.
pub mod push;
/// Record serialization.
pub mod serde;
/// Partition files and the bypass-merge shuffle writer.
pub mod shuffle;
/// Temporary shuffle file storage.
pub mod storage;

pub use error::{Result, ShuffleError};
pub use shuffle::{BypassMergeShuffleWriter, ShuffleFileWriter};
