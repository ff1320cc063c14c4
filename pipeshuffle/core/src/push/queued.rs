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

//! Push transport backed by a bounded queue and a background delivery task.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::{EndpointRef, PushOutcome, PushTransport, ShuffleId};
use crate::error::{Result, ShuffleError};
use crate::serde::{Serializer, SerializerInstance};

/// A serialized record addressed to a remote executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub endpoint: EndpointRef,
    pub shuffle_id: ShuffleId,
    pub partition: usize,
    pub key: Bytes,
    pub value: Bytes,
}

/// Network client that delivers one message to its endpoint.
///
/// Timeouts and retries belong to the implementation.
#[async_trait]
pub trait PushClient: Send + Sync {
    async fn push(&self, message: PushMessage) -> Result<()>;
}

/// [`PushTransport`] that serializes records on the caller's thread and
/// delivers them from a tokio task.
///
/// `send` never blocks. When the queue is full the record is dropped with a
/// warning; the local partition file still has it.
pub struct QueuedPushTransport<K, V> {
    session: Mutex<Box<dyn SerializerInstance<K, V>>>,
    tx: Mutex<Option<mpsc::Sender<PushMessage>>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
    failed: Arc<AtomicUsize>,
}

impl<K, V> QueuedPushTransport<K, V> {
    /// Starts the delivery task on `runtime`.
    pub fn try_new(
        serializer: &dyn Serializer<K, V>,
        client: Arc<dyn PushClient>,
        queue_size: usize,
        runtime: &Handle,
    ) -> Result<Self> {
        if queue_size == 0 {
            return Err(ShuffleError::Configuration(
                "push queue size must be positive".to_string(),
            ));
        }
        let (tx, mut rx) = mpsc::channel::<PushMessage>(queue_size);
        let failed = Arc::new(AtomicUsize::new(0));
        let failed_count = failed.clone();
        let delivery = runtime.spawn(async move {
            info!("Starting push delivery loop");
            while let Some(message) = rx.recv().await {
                let endpoint = message.endpoint.clone();
                let partition = message.partition;
                if let Err(e) = client.push(message).await {
                    error!("Failed to push partition {partition} record to {endpoint}: {e}");
                    failed_count.fetch_add(1, Ordering::Relaxed);
                }
            }
            info!("Push queue closed, delivery loop stopped");
        });
        Ok(Self {
            session: Mutex::new(serializer.new_instance()),
            tx: Mutex::new(Some(tx)),
            delivery: Mutex::new(Some(delivery)),
            failed,
        })
    }

    /// Messages the client failed to deliver so far.
    pub fn failed_deliveries(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Closes the queue and waits until every queued message was handed to
    /// the client. Later sends are dropped.
    pub async fn shutdown(&self) -> Result<()> {
        drop(self.tx.lock().take());
        let delivery = self.delivery.lock().take();
        if let Some(delivery) = delivery {
            delivery.await?;
        }
        Ok(())
    }
}

impl<K, V> PushTransport<K, V> for QueuedPushTransport<K, V> {
    fn send(
        &self,
        endpoint: &EndpointRef,
        shuffle_id: ShuffleId,
        partition: usize,
        key: &K,
        value: &V,
    ) -> Result<PushOutcome> {
        let (key, value) = {
            let mut session = self.session.lock();
            let mut key_buf = vec![];
            session.serialize_key(key, &mut key_buf)?;
            let mut value_buf = vec![];
            session.serialize_value(value, &mut value_buf)?;
            (Bytes::from(key_buf), Bytes::from(value_buf))
        };
        let message = PushMessage {
            endpoint: endpoint.clone(),
            shuffle_id,
            partition,
            key,
            value,
        };

        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            warn!("Push transport is shut down, dropping record for {endpoint}");
            return Ok(PushOutcome::Dropped);
        };
        match tx.try_send(message) {
            Ok(()) => Ok(PushOutcome::Queued),
            Err(TrySendError::Full(_)) => {
                warn!("Push queue is full, dropping record for partition {partition} to {endpoint}");
                Ok(PushOutcome::Dropped)
            }
            Err(TrySendError::Closed(_)) => {
                warn!("Push delivery loop has stopped, dropping record for {endpoint}");
                Ok(PushOutcome::Dropped)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serde::BytesSerializer;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct CollectingClient {
        received: Mutex<Vec<PushMessage>>,
    }

    #[async_trait]
    impl PushClient for CollectingClient {
        async fn push(&self, message: PushMessage) -> Result<()> {
            if message.partition == 13 {
                return Err(ShuffleError::Push("connection refused".to_string()));
            }
            self.received.lock().push(message);
            Ok(())
        }
    }

    /// Holds every delivery until released.
    struct GatedClient {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl PushClient for GatedClient {
        async fn push(&self, _message: PushMessage) -> Result<()> {
            self.gate.notified().await;
            Ok(())
        }
    }

    fn bytes(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn queued_messages_are_delivered() -> Result<()> {
        let client = Arc::new(CollectingClient::default());
        let transport = QueuedPushTransport::<Bytes, Bytes>::try_new(
            &BytesSerializer,
            client.clone(),
            16,
            &Handle::current(),
        )?;
        let endpoint = EndpointRef::new("exec-2", "localhost", 7000);

        for partition in [0, 13, 1] {
            let outcome =
                transport.send(&endpoint, ShuffleId(4), partition, &bytes("k"), &bytes("v"))?;
            assert_eq!(outcome, PushOutcome::Queued);
        }
        transport.shutdown().await?;

        let received = client.received.lock();
        assert_eq!(
            received.iter().map(|m| m.partition).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(received[0].key, Bytes::from_static(&[0, 0, 0, 1, b'k']));
        assert_eq!(transport.failed_deliveries(), 1);

        assert_eq!(
            transport.send(&endpoint, ShuffleId(4), 0, &bytes("k"), &bytes("v"))?,
            PushOutcome::Dropped
        );
        Ok(())
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() -> Result<()> {
        let gate = Arc::new(Notify::new());
        let transport = QueuedPushTransport::<Bytes, Bytes>::try_new(
            &BytesSerializer,
            Arc::new(GatedClient { gate: gate.clone() }),
            1,
            &Handle::current(),
        )?;
        let endpoint = EndpointRef::new("exec-3", "localhost", 7001);

        let outcomes = (0..8)
            .map(|p| transport.send(&endpoint, ShuffleId(1), p, &bytes("k"), &bytes("v")))
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(outcomes[0], PushOutcome::Queued);
        assert!(outcomes.contains(&PushOutcome::Dropped));

        // release every delivery that may be waiting
        for _ in 0..8 {
            gate.notify_one();
        }
        transport.shutdown().await?;
        Ok(())
    }

    #[test]
    fn zero_queue_is_rejected() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let result = QueuedPushTransport::<Bytes, Bytes>::try_new(
            &BytesSerializer,
            Arc::new(CollectingClient::default()),
            0,
            runtime.handle(),
        );
        assert!(matches!(result, Err(ShuffleError::Configuration(_))));
    }
}
