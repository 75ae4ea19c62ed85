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

pub mod definitions;
pub mod errors;
pub mod audio_server;
pub mod device_bus;
pub mod classifier;
pub mod relay;
pub mod route_registry;
pub mod session_manager;
pub mod shutdown;
pub mod connection_state_watcher;
pub mod config;
pub mod cli;
pub mod logger;

mod service;
mod bridge;

#[cfg(test)]
mod testing;

pub use service::{spawn_service, ServiceHandle, StopHandle};
pub use bridge::{run_bridge, run_service, shutdown_signal, BridgeExit};
pub use session_manager::{SessionManager, SessionPhase};
pub use route_registry::{RouteId, RouteRegistry};
pub use classifier::DeviceClassifier;
pub use connection_state_watcher::DeviceConnectionState;
pub use config::BridgeConfig;
pub use cli::Cli;
pub use errors::{AudioServerError, BridgeError, DeviceBusError};
