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

//! Device-bus collaborator interface, used to observe the connection state of Bluetooth devices.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::errors::DeviceBusError;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Str(String),
    Bool(bool),
    U32(u32),
    Other,
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// A single `PropertyChanged` signal.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub key: String,
    pub value: PropertyValue,
}

pub type PropertyChangeStream = futures::channel::mpsc::Receiver<PropertyChange>;

#[async_trait]
pub trait DeviceProxy: Send + Sync {
    /// Fetch the whole property dictionary of the proxied object.
    async fn get_properties(&self) -> Result<HashMap<String, PropertyValue>, DeviceBusError>;

    /// Property-changed signals scoped to this proxy.
    fn property_changes(&self) -> Result<PropertyChangeStream, DeviceBusError>;
}

#[async_trait]
pub trait DeviceBus: Send + Sync {
    async fn proxy(
        &self,
        service: &str,
        path: &str,
        interface: &str,
    ) -> Result<Box<dyn DeviceProxy>, DeviceBusError>;
}
