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
//

//! Shuffle writer configuration

use std::collections::HashMap;
use std::result;
use std::sync::LazyLock;

use crate::error::{Result, ShuffleError};

use datafusion::arrow::datatypes::DataType;

/// Size of the in-memory buffer of each partition file writer.
/// Unit-less values are interpreted as KiB.
pub const PIPESHUFFLE_SHUFFLE_FILE_BUFFER: &str = "pipeshuffle.shuffle.file.buffer";
/// Whether partition files are concatenated with kernel-assisted copies.
pub const PIPESHUFFLE_FILE_TRANSFER_TO: &str = "pipeshuffle.file.transfer_to";
/// Whether partition files are fsync'ed when committed.
pub const PIPESHUFFLE_SHUFFLE_SYNC: &str = "pipeshuffle.shuffle.sync";
/// Capacity of the outbound queue used by the push transport.
pub const PIPESHUFFLE_PUSH_QUEUE_SIZE: &str = "pipeshuffle.shuffle.push.queue_size";
/// Number of hashed sub-directories created under every local directory.
pub const PIPESHUFFLE_SUB_DIRS_PER_LOCAL_DIR: &str =
    "pipeshuffle.storage.sub_dirs_per_local_dir";

/// Data type tag for byte sizes such as `32k` or `4m`.
///
/// Arrow has no dedicated type for this, sizes travel as strings and are
/// validated by [`parse_size_as_kb`].
const SIZE_TYPE: DataType = DataType::LargeUtf8;

pub type ParseResult<T> = result::Result<T, String>;

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(PIPESHUFFLE_SHUFFLE_FILE_BUFFER.to_string(),
                         "Size of the in-memory buffer for each partition file writer, in KiB unless a unit is given".to_string(),
                         SIZE_TYPE, Some("32k".to_string())),
        ConfigEntry::new(PIPESHUFFLE_FILE_TRANSFER_TO.to_string(),
                         "Use kernel-assisted copies when concatenating partition files".to_string(),
                         DataType::Boolean, Some(true.to_string())),
        ConfigEntry::new(PIPESHUFFLE_SHUFFLE_SYNC.to_string(),
                         "Force partition files to disk when they are committed".to_string(),
                         DataType::Boolean, Some(false.to_string())),
        ConfigEntry::new(PIPESHUFFLE_PUSH_QUEUE_SIZE.to_string(),
                         "Number of records the push transport may queue before dropping".to_string(),
                         DataType::UInt64, Some(4096.to_string())),
        ConfigEntry::new(PIPESHUFFLE_SUB_DIRS_PER_LOCAL_DIR.to_string(),
                         "Number of hashed sub-directories per local shuffle directory".to_string(),
                         DataType::UInt64, Some(64.to_string())),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Configuration option meta-data
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    name: String,
    description: String,
    data_type: DataType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        data_type: DataType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            data_type,
            default_value,
        }
    }
}

/// Shuffle writer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleWriterConfig {
    /// Settings stored in map for easy serde
    settings: HashMap<String, String>,
}

impl Default for ShuffleWriterConfig {
    fn default() -> Self {
        // the built-in defaults are validated by `default_entries_are_valid`
        Self::with_settings(HashMap::new()).unwrap()
    }
}

impl ShuffleWriterConfig {
    /// Create a new configuration based on key-value pairs
    pub fn with_settings(settings: HashMap<String, String>) -> Result<Self> {
        for name in settings.keys() {
            if !Self::valid_entries().contains_key(name) {
                return Err(ShuffleError::Configuration(format!(
                    "configuration key `{name}` does not exist"
                )));
            }
        }

        for (name, entry) in Self::valid_entries() {
            if let Some(v) = settings.get(name) {
                // validate that we can parse the user-supplied value
                Self::parse_value(v.as_str(), entry.data_type.clone()).map_err(|e| ShuffleError::Configuration(format!("Failed to parse user-supplied value '{v}' for configuration setting '{name}' ({}): {e}", entry.description)))?;
            } else if let Some(v) = entry.default_value.clone() {
                Self::parse_value(v.as_str(), entry.data_type.clone()).map_err(|e| ShuffleError::Configuration(format!("Failed to parse default value '{v}' for configuration setting '{name}': {e}")))?;
            } else {
                return Err(ShuffleError::Configuration(format!(
                    "No value specified for mandatory configuration setting '{name}'"
                )));
            }
        }

        Ok(Self { settings })
    }

    /// Returns a copy of this configuration with one setting replaced.
    pub fn with_setting(&self, key: &str, value: impl Into<String>) -> Result<Self> {
        let mut settings = self.settings.clone();
        settings.insert(key.to_string(), value.into());
        Self::with_settings(settings)
    }

    pub fn parse_value(val: &str, data_type: DataType) -> ParseResult<()> {
        match data_type {
            DataType::UInt64 => {
                val.parse::<usize>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::Boolean => {
                val.parse::<bool>().map_err(|e| format!("{e:?}"))?;
            }
            DataType::LargeUtf8 => {
                parse_size_as_kb(val)?;
            }
            _ => {
                return Err(format!("not support data type: {data_type}"));
            }
        }

        Ok(())
    }

    // All available configuration options
    pub fn valid_entries() -> &'static HashMap<String, ConfigEntry> {
        &CONFIG_ENTRIES
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    /// Buffer size of each partition writer, in bytes.
    pub fn file_buffer_size(&self) -> usize {
        let kb = parse_size_as_kb(&self.get_string_setting(PIPESHUFFLE_SHUFFLE_FILE_BUFFER))
            // infallible because we validate all configs in the constructor
            .unwrap();
        (kb as usize) * 1024
    }

    pub fn transfer_to_enabled(&self) -> bool {
        self.get_bool_setting(PIPESHUFFLE_FILE_TRANSFER_TO)
    }

    pub fn sync_writes(&self) -> bool {
        self.get_bool_setting(PIPESHUFFLE_SHUFFLE_SYNC)
    }

    pub fn push_queue_size(&self) -> usize {
        self.get_usize_setting(PIPESHUFFLE_PUSH_QUEUE_SIZE)
    }

    pub fn sub_dirs_per_local_dir(&self) -> usize {
        self.get_usize_setting(PIPESHUFFLE_SUB_DIRS_PER_LOCAL_DIR)
    }

    fn get_usize_setting(&self, key: &str) -> usize {
        // infallible because we validate all configs in the constructor
        self.get_string_setting(key).parse().unwrap()
    }

    fn get_bool_setting(&self, key: &str) -> bool {
        // infallible because we validate all configs in the constructor
        self.get_string_setting(key).parse::<bool>().unwrap()
    }

    fn get_string_setting(&self, key: &str) -> String {
        if let Some(v) = self.settings.get(key) {
            v.to_string()
        } else {
            let entries = Self::valid_entries();
            // infallible because we validate all configs in the constructor
            let v = entries.get(key).unwrap().default_value.as_ref().unwrap();
            v.to_string()
        }
    }
}

/// Parses a byte size such as `32k`, `1m` or `512` into KiB.
///
/// A bare number is already in KiB. Accepted suffixes are `b`, `k`, `m`, `g`
/// optionally followed by `b` (`kb`, `mb`, ...), case-insensitive.
pub fn parse_size_as_kb(val: &str) -> ParseResult<u64> {
    let lower = val.trim().to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, unit) = lower.split_at(split);
    let amount = digits
        .parse::<u64>()
        .map_err(|e| format!("invalid size '{val}': {e:?}"))?;
    let bytes = match unit {
        "" | "k" | "kb" => amount.checked_mul(1024),
        "b" => Some(amount),
        "m" | "mb" => amount.checked_mul(1024 * 1024),
        "g" | "gb" => amount.checked_mul(1024 * 1024 * 1024),
        other => return Err(format!("invalid size unit '{other}' in '{val}'")),
    }
    .ok_or_else(|| format!("size '{val}' overflows"))?;
    Ok(bytes / 1024)
}
