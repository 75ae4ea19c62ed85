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

use std::time::Duration;

use crate::definitions::APPLICATION_NAME;

/// Runtime settings of the bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Name announced to the audio server and matched by the duplicate-instance guard.
    pub application_name: String,
    /// How long `connect` keeps retrying before giving up.
    pub connect_timeout: Duration,
    /// Pause between two failed connection attempts.
    pub retry_delay: Duration,
    /// How long shutdown waits for stream teardown acknowledgements.
    pub drain_timeout: Duration,
    /// Flush each leg of a route when it becomes ready.
    pub flush_on_ready: bool,
    /// Treat a device-bus reply lacking the `State` property as fatal for the whole process.
    pub strict_device_bus: bool,
    /// Start a connection-state watcher for every routed device.
    pub watch_device_state: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            application_name: APPLICATION_NAME.to_string(),
            connect_timeout: Duration::from_secs(30),
            retry_delay: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
            flush_on_ready: true,
            strict_device_bus: false,
            watch_device_state: true,
        }
    }
}
