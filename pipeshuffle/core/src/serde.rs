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

//! Record serialization used by the shuffle writer and the push transport.
//!
//! A [`Serializer`] is shared by the whole task, a [`SerializerInstance`] is a
//! session owned by one ingestion pass. The on-disk form of a record is its
//! serialized key immediately followed by its serialized value; the encoding
//! must therefore be self-delimiting.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, Bytes};
use prost::Message;

use crate::error::{Result, ShuffleError};

/// Factory of serialization sessions.
pub trait Serializer<K, V>: Send + Sync {
    fn new_instance(&self) -> Box<dyn SerializerInstance<K, V>>;
}

/// A serialization session. Not shared between threads.
pub trait SerializerInstance<K, V>: Send {
    /// Appends the encoded key to `buf`.
    fn serialize_key(&mut self, key: &K, buf: &mut Vec<u8>) -> Result<()>;

    /// Appends the encoded value to `buf`.
    fn serialize_value(&mut self, value: &V, buf: &mut Vec<u8>) -> Result<()>;

    /// Appends the encoded record (key, then value) to `buf`.
    fn serialize_record(&mut self, key: &K, value: &V, buf: &mut Vec<u8>) -> Result<()> {
        self.serialize_key(key, buf)?;
        self.serialize_value(value, buf)
    }
}

/// Length-delimited protobuf encoding for prost messages.
pub struct ProstSerializer<K, V> {
    _types: PhantomData<fn(&K, &V)>,
}

impl<K, V> ProstSerializer<K, V> {
    pub fn new() -> Self {
        Self {
            _types: PhantomData,
        }
    }
}

impl<K, V> Default for ProstSerializer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Serializer<K, V> for ProstSerializer<K, V>
where
    K: Message + 'static,
    V: Message + 'static,
{
    fn new_instance(&self) -> Box<dyn SerializerInstance<K, V>> {
        Box::new(ProstSerializerInstance::<K, V> {
            _types: PhantomData,
        })
    }
}

struct ProstSerializerInstance<K, V> {
    _types: PhantomData<fn(&K, &V)>,
}

impl<K: Message, V: Message> SerializerInstance<K, V> for ProstSerializerInstance<K, V> {
    fn serialize_key(&mut self, key: &K, buf: &mut Vec<u8>) -> Result<()> {
        key.encode_length_delimited(buf)?;
        Ok(())
    }

    fn serialize_value(&mut self, value: &V, buf: &mut Vec<u8>) -> Result<()> {
        value.encode_length_delimited(buf)?;
        Ok(())
    }
}

/// Raw byte keys and values, each prefixed with its length as a big-endian u32.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesSerializer;

impl Serializer<Bytes, Bytes> for BytesSerializer {
    fn new_instance(&self) -> Box<dyn SerializerInstance<Bytes, Bytes>> {
        Box::new(BytesSerializer)
    }
}

impl BytesSerializer {
    fn put_framed(bytes: &Bytes, buf: &mut Vec<u8>) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            ShuffleError::Serialization(format!(
                "field of {} bytes exceeds the u32 length prefix",
                bytes.len()
            ))
        })?;
        buf.put_u32(len);
        buf.put_slice(bytes);
        Ok(())
    }

    /// Reads back one length-prefixed field written by this serializer.
    pub fn read_framed(buf: &mut impl Buf) -> Result<Bytes> {
        if buf.remaining() < 4 {
            return Err(ShuffleError::Serialization(
                "truncated length prefix".to_string(),
            ));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(ShuffleError::Serialization(format!(
                "field declares {len} bytes but only {} remain",
                buf.remaining()
            )));
        }
        Ok(buf.copy_to_bytes(len))
    }
}

impl SerializerInstance<Bytes, Bytes> for BytesSerializer {
    fn serialize_key(&mut self, key: &Bytes, buf: &mut Vec<u8>) -> Result<()> {
        Self::put_framed(key, buf)
    }

    fn serialize_value(&mut self, value: &Bytes, buf: &mut Vec<u8>) -> Result<()> {
        Self::put_framed(value, buf)
    }
}
