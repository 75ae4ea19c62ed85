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

//! Observes the high-level connection state ("connected", "playing", ...) of routed Bluetooth
//! devices on the device bus. Purely informational: routing never depends on it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::definitions::{AUDIO_SOURCE_INTERFACE, BLUEZ_SERVICE, STATE_PROPERTY};
use crate::device_bus::{DeviceBus, PropertyValue};
use crate::errors::DeviceBusError;
use crate::service::{spawn_service, ServiceHandle};

/// Last known state per device path, shared by all watchers.
///
/// Each entry belongs to the watcher that claimed it last, so a stopping watcher never
/// clears the entry of a newer watcher for the same device.
#[derive(Clone, Default)]
pub struct DeviceConnectionState {
    inner: Arc<Mutex<CacheInner>>,
}

#[derive(Default)]
struct CacheInner {
    next_watcher: u64,
    entries: HashMap<String, CacheEntry>,
}

struct CacheEntry {
    watcher: u64,
    state: Option<String>,
}

impl DeviceConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, device_path: &str) -> Option<String> {
        self.inner.lock().unwrap().entries.get(device_path).and_then(|e| e.state.clone())
    }

    /// Number of devices with a known state.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.values().filter(|e| e.state.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim(&self, device_path: &str) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_watcher += 1;
        let watcher = inner.next_watcher;
        inner.entries.insert(device_path.to_string(), CacheEntry { watcher, state: None });
        watcher
    }

    fn set(&self, device_path: &str, watcher: u64, state: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(device_path).filter(|e| e.watcher == watcher) {
            entry.state = Some(state.to_string());
        }
    }

    fn release(&self, device_path: &str, watcher: u64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.get(device_path).is_some_and(|e| e.watcher == watcher) {
            inner.entries.remove(device_path);
        }
    }
}

/// Reported when a watcher stops because the device bus broke its contract.
#[derive(Debug, Clone, PartialEq)]
pub struct WatcherFailure {
    pub device_path: String,
    pub error: DeviceBusError,
}

/// Spawn a watcher for one device. Its cache entry is removed when the watcher ends.
pub fn watch_connection_state<B: DeviceBus + 'static>(
    bus: Arc<B>,
    device_path: String,
    description: String,
    cache: DeviceConnectionState,
    failures: mpsc::UnboundedSender<WatcherFailure>,
) -> ServiceHandle {
    let watcher = cache.claim(&device_path);
    spawn_service(move |mut stop_handle| async move {
        tokio::select! {
            biased;
            _ = stop_handle.signaled() => {
                debug!("Connection state watch for {} stopped", description);
            }
            _ = run_watch(bus.as_ref(), &device_path, watcher, &description, &cache, &failures) => {
                debug!("Connection state watch for {} ended", description);
            }
        }
        cache.release(&device_path, watcher);
    })
}

async fn run_watch<B: DeviceBus + ?Sized>(
    bus: &B,
    device_path: &str,
    watcher: u64,
    description: &str,
    cache: &DeviceConnectionState,
    failures: &mpsc::UnboundedSender<WatcherFailure>,
) {
    let proxy = match bus.proxy(BLUEZ_SERVICE, device_path, AUDIO_SOURCE_INTERFACE).await {
        Ok(proxy) => proxy,
        Err(e) => {
            warn!("DBus Failure: {}", e);
            return;
        }
    };

    // Subscribe before fetching so no change between the two is lost.
    let changes = match proxy.property_changes() {
        Ok(changes) => Some(changes),
        Err(e) => {
            warn!("DBus Failure: {}", e);
            None
        }
    };

    match proxy.get_properties().await {
        Ok(properties) => match properties.get(STATE_PROPERTY).and_then(PropertyValue::as_str) {
            Some(state) => {
                debug!("Device state for {}: {}", description, state);
                cache.set(device_path, watcher, state);
            }
            None => {
                error!("BlueZ property '{}' not found.", STATE_PROPERTY);
                let _ = failures.send(WatcherFailure {
                    device_path: device_path.to_string(),
                    error: DeviceBusError::MissingProperty(STATE_PROPERTY),
                });
                return;
            }
        },
        Err(e) => warn!("DBus Failure: {}", e),
    }

    let Some(mut changes) = changes else {
        return;
    };
    while let Some(change) = changes.next().await {
        if change.key != STATE_PROPERTY {
            continue;
        }
        match change.value.as_str() {
            Some(state) => {
                info!("New device state for {}: {}", description, state);
                cache.set(device_path, watcher, state);
            }
            None => warn!("Ignoring non-string state for {}: {:?}", description, change.value),
        }
    }
}
