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

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pipeshuffle_core::Result;
use pipeshuffle_core::push::{PushClient, PushMessage};
use pipeshuffle_core::serde::{Serializer, SerializerInstance};
use pipeshuffle_core::storage::DiskShuffleStorage;
use tempfile::TempDir;

/// Two byte big-endian key followed by a two byte big-endian value.
pub struct FixedWidthSerializer;

impl Serializer<u16, u16> for FixedWidthSerializer {
    fn new_instance(&self) -> Box<dyn SerializerInstance<u16, u16>> {
        Box::new(FixedWidthSerializer)
    }
}

impl SerializerInstance<u16, u16> for FixedWidthSerializer {
    fn serialize_key(&mut self, key: &u16, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&key.to_be_bytes());
        Ok(())
    }

    fn serialize_value(&mut self, value: &u16, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }
}

/// Push client that keeps every delivered message.
#[derive(Default)]
pub struct CollectingClient {
    pub received: Mutex<Vec<PushMessage>>,
}

#[async_trait]
impl PushClient for CollectingClient {
    async fn push(&self, message: PushMessage) -> Result<()> {
        self.received.lock().push(message);
        Ok(())
    }
}

pub struct TestDirs {
    pub root: TempDir,
    pub storage: Arc<DiskShuffleStorage>,
}

impl TestDirs {
    pub fn new() -> Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        let root = TempDir::new()?;
        let storage = Arc::new(DiskShuffleStorage::try_new(
            vec![root.path().join("local-0"), root.path().join("local-1")],
            8,
        )?);
        Ok(Self { root, storage })
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.root.path().join(name)
    }
}

pub fn letters() -> Vec<(u16, u16)> {
    vec![
        (0, b'a' as u16),
        (1, b'b' as u16),
        (3, b'c' as u16),
        (4, b'd' as u16),
    ]
}
