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

//! Eager delivery of shuffle records to the executors that will consume them.
//!
//! Push runs next to the local write and never replaces it: every record is
//! still appended to its partition file, and a record whose partition has no
//! known owner is simply not pushed.

pub mod queued;

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use log::{error, info, warn};

use crate::error::Result;
use crate::metrics::ShuffleWriteMetrics;
use crate::shuffle::sink::RecordSink;

pub use queued::{PushClient, PushMessage, QueuedPushTransport};

/// Identifier of a shuffle registered with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShuffleId(pub i32);

impl ShuffleId {
    /// Shuffle that was never registered. Push is disabled for it.
    pub const UNREGISTERED: ShuffleId = ShuffleId(-1);

    pub fn is_registered(&self) -> bool {
        *self != Self::UNREGISTERED
    }
}

impl Display for ShuffleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a remote executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointRef {
    pub executor_id: String,
    pub host: String,
    pub port: u16,
}

impl EndpointRef {
    pub fn new(executor_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            executor_id: executor_id.into(),
            host: host.into(),
            port,
        }
    }
}

impl Display for EndpointRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.executor_id, self.host, self.port)
    }
}

/// Owner of each reduce partition, as known when the map task started.
/// Partitions without an entry are not pushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingTable {
    routes: HashMap<usize, EndpointRef>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, partition: usize, endpoint: EndpointRef) -> Option<EndpointRef> {
        self.routes.insert(partition, endpoint)
    }

    pub fn get(&self, partition: usize) -> Option<&EndpointRef> {
        self.routes.get(&partition)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<(usize, EndpointRef)> for RoutingTable {
    fn from_iter<T: IntoIterator<Item = (usize, EndpointRef)>>(iter: T) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

/// What a transport did with a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The transport had no room for the record.
    Dropped,
}

/// Non-blocking delivery of single records to remote executors.
///
/// `send` returns as soon as the record is handed off; it does not wait for
/// the remote side. Errors are reserved for records that cannot be encoded.
pub trait PushTransport<K, V>: Send + Sync {
    fn send(
        &self,
        endpoint: &EndpointRef,
        shuffle_id: ShuffleId,
        partition: usize,
        key: &K,
        value: &V,
    ) -> Result<PushOutcome>;
}

/// Sends records to the owner of their partition.
pub struct RemotePushSink<'a, K, V> {
    transport: &'a dyn PushTransport<K, V>,
    routing_table: &'a RoutingTable,
    shuffle_id: ShuffleId,
    metrics: &'a ShuffleWriteMetrics,
}

impl<'a, K, V> RemotePushSink<'a, K, V> {
    /// Returns a sink when push can run for this call, `None` otherwise.
    ///
    /// Push needs a transport, a non-empty routing table, and a registered
    /// shuffle. Missing any of them logs one diagnostic and falls back to
    /// local-only writes.
    pub fn resolve(
        transport: Option<&'a dyn PushTransport<K, V>>,
        routing_table: Option<&'a RoutingTable>,
        shuffle_id: ShuffleId,
        metrics: &'a ShuffleWriteMetrics,
    ) -> Option<Self> {
        let routing_table = match routing_table {
            Some(table) if !table.is_empty() && shuffle_id.is_registered() => table,
            _ => {
                error!(
                    "Routing table is empty or shuffle {shuffle_id} is not registered, records will not be pushed"
                );
                return None;
            }
        };
        let Some(transport) = transport else {
            warn!("No push transport configured, records of shuffle {shuffle_id} will not be pushed");
            return None;
        };
        Some(Self {
            transport,
            routing_table,
            shuffle_id,
            metrics,
        })
    }
}

impl<K, V> RecordSink<K, V> for RemotePushSink<'_, K, V> {
    fn accept(&mut self, partition: usize, key: &K, value: &V) -> Result<()> {
        let Some(endpoint) = self.routing_table.get(partition) else {
            // TODO: report unroutable partitions to the scheduler instead of only counting them
            info!(
                "No executor registered for partition {partition} of shuffle {}",
                self.shuffle_id
            );
            self.metrics.push_missing_route.add(1);
            return Ok(());
        };
        match self
            .transport
            .send(endpoint, self.shuffle_id, partition, key, value)?
        {
            PushOutcome::Queued => self.metrics.records_pushed.add(1),
            PushOutcome::Dropped => self.metrics.push_dropped.add(1),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(String, i32, usize, u32)>>,
    }

    impl PushTransport<u32, u32> for RecordingTransport {
        fn send(
            &self,
            endpoint: &EndpointRef,
            shuffle_id: ShuffleId,
            partition: usize,
            key: &u32,
            _value: &u32,
        ) -> Result<PushOutcome> {
            self.sent
                .lock()
                .push((endpoint.executor_id.clone(), shuffle_id.0, partition, *key));
            Ok(PushOutcome::Queued)
        }
    }

    fn table() -> RoutingTable {
        [(0, EndpointRef::new("exec-1", "localhost", 7337))]
            .into_iter()
            .collect()
    }

    #[test]
    fn push_disabled_without_route_or_registration() {
        let transport = RecordingTransport::default();
        let metrics = ShuffleWriteMetrics::default();
        let empty = RoutingTable::new();
        let routes = table();

        assert!(
            RemotePushSink::<u32, u32>::resolve(Some(&transport), None, ShuffleId(1), &metrics)
                .is_none()
        );
        assert!(
            RemotePushSink::<u32, u32>::resolve(
                Some(&transport),
                Some(&empty),
                ShuffleId(1),
                &metrics
            )
            .is_none()
        );
        assert!(
            RemotePushSink::<u32, u32>::resolve(
                Some(&transport),
                Some(&routes),
                ShuffleId::UNREGISTERED,
                &metrics
            )
            .is_none()
        );
        assert!(
            RemotePushSink::<u32, u32>::resolve(None, Some(&routes), ShuffleId(1), &metrics)
                .is_none()
        );
    }

    #[test]
    fn missing_route_is_counted_and_skipped() -> Result<()> {
        let transport = RecordingTransport::default();
        let metrics = ShuffleWriteMetrics::default();
        let routes = table();
        let mut sink =
            RemotePushSink::resolve(Some(&transport), Some(&routes), ShuffleId(3), &metrics)
                .expect("push should be enabled");

        sink.accept(0, &10, &0)?;
        sink.accept(1, &11, &0)?;
        sink.accept(0, &12, &0)?;

        assert_eq!(
            *transport.sent.lock(),
            vec![
                ("exec-1".to_string(), 3, 0, 10),
                ("exec-1".to_string(), 3, 0, 12)
            ]
        );
        assert_eq!(metrics.records_pushed(), 2);
        assert_eq!(metrics.push_missing_route(), 1);
        Ok(())
    }

    #[test]
    fn endpoint_display() {
        let endpoint = EndpointRef::new("exec-1", "10.0.0.1", 50051);
        assert_eq!(endpoint.to_string(), "exec-1@10.0.0.1:50051");
        assert!(!ShuffleId::UNREGISTERED.is_registered());
        assert!(ShuffleId(0).is_registered());
    }
}
