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

//! Shuffle writer error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

/// Result type alias for shuffle write operations.
pub type Result<T> = result::Result<T, ShuffleError>;

/// Errors raised by the shuffle write path.
#[derive(Debug)]
pub enum ShuffleError {
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Configuration error with invalid settings.
    Configuration(String),
    /// I/O operation error.
    IoError(io::Error),
    /// A key or value could not be encoded.
    Serialization(String),
    /// The push transport rejected or failed to deliver a record.
    Push(String),
    /// Tokio task join error.
    TokioError(tokio::task::JoinError),
    /// The writer was stopped while an operation was in flight.
    Cancelled,
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for ShuffleError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}

impl From<String> for ShuffleError {
    fn from(e: String) -> Self {
        ShuffleError::General(e)
    }
}

impl From<io::Error> for ShuffleError {
    fn from(e: io::Error) -> Self {
        ShuffleError::IoError(e)
    }
}

impl From<prost::EncodeError> for ShuffleError {
    fn from(e: prost::EncodeError) -> Self {
        ShuffleError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ShuffleError {
    fn from(e: tokio::task::JoinError) -> Self {
        ShuffleError::TokioError(e)
    }
}

impl Display for ShuffleError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            ShuffleError::General(desc) => write!(f, "General error: {desc}"),
            ShuffleError::Internal(desc) => {
                write!(f, "Internal shuffle error: {desc}")
            }
            ShuffleError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            ShuffleError::IoError(desc) => write!(f, "IO error: {desc}"),
            ShuffleError::Serialization(desc) => {
                write!(f, "Serialization error: {desc}")
            }
            ShuffleError::Push(desc) => write!(f, "Push error: {desc}"),
            ShuffleError::TokioError(desc) => write!(f, "Tokio join error: {desc}"),
            ShuffleError::Cancelled => write!(f, "Shuffle write cancelled"),
        }
    }
}

impl Error for ShuffleError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ShuffleError::IoError(e) => Some(e),
            ShuffleError::TokioError(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_keep_their_source() {
        let err: ShuffleError =
            io::Error::new(io::ErrorKind::Other, "no space left").into();
        assert!(matches!(err, ShuffleError::IoError(_)));
        assert!(err.source().is_some());
        assert!(ShuffleError::Cancelled.source().is_none());
    }

    #[test]
    fn display_includes_description() {
        let err = ShuffleError::from("boom".to_string());
        assert_eq!(err.to_string(), "General error: boom");
        assert_eq!(ShuffleError::Cancelled.to_string(), "Shuffle write cancelled");
    }
}
