// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

/// Failures reported by an audio-server backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioServerError {
    #[error("Connection refused")]
    ConnectionRefused,

    #[error("Connection to the audio server is gone")]
    Disconnected,

    #[error("No such entity: {0}")]
    NoSuchEntity(u32),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Failures reported by a device-bus backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceBusError {
    #[error("Proxy for {0} is unavailable")]
    ProxyUnavailable(String),

    #[error("Call failed: {0}")]
    Call(String),

    #[error("Property '{0}' not found")]
    MissingProperty(&'static str),
}

/// Conditions that end the bridge with a failure exit status.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Could not connect to the audio server within {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("Another instance of {0} is already connected.")]
    DuplicateInstance(String),

    #[error("Audio server terminated the session")]
    SessionTerminated,

    #[error("Could not reconnect to the audio server within {0:?}")]
    ReconnectFailed(std::time::Duration),

    #[error("Device bus contract violated: {0}")]
    DeviceBusContract(DeviceBusError),
}
