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

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audio_server::{
    AudioServer, ClientInfo, ContextState, Endpoint, EndpointId, Facility, RouteEvent, ServerEvent,
    ServerEventReceiver, SubscriptionEventKind,
};
use crate::bridge::BridgeExit;
use crate::classifier::DeviceClassifier;
use crate::config::BridgeConfig;
use crate::connection_state_watcher::{watch_connection_state, DeviceConnectionState, WatcherFailure};
use crate::definitions::{
    SubscriptionMask, CLIENT_APPLICATION_NAME_PROPERTY, CLIENT_PROCESS_ID_PROPERTY, DEVICE_PATH_PROPERTY,
};
use crate::device_bus::DeviceBus;
use crate::errors::BridgeError;
use crate::route_registry::RouteRegistry;
use crate::service::StopHandle;
use crate::shutdown::ShutdownCoordinator;

/// Lifecycle of the session as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Disconnected,
    Connecting,
    /// The previous session failed; connection attempts block the loop until the deadline.
    Reconnecting,
    Ready,
    /// The session failed and could not be re-established.
    Failed,
    Terminated,
}

/// Returns the first client that looks like another running instance of this program.
///
/// Clients lacking a name or process id are skipped, as is the client whose process id is
/// our own.
pub fn find_conflicting_instance<'a>(
    clients: &'a [ClientInfo],
    application_name: &str,
    own_pid: u32,
) -> Option<&'a ClientInfo> {
    clients.iter().find(|client| {
        let (Some(name), Some(pid)) = (
            client.property(CLIENT_APPLICATION_NAME_PROPERTY),
            client.property(CLIENT_PROCESS_ID_PROPERTY),
        ) else {
            return false;
        };
        if pid.trim().parse::<u32>().ok() == Some(own_pid) {
            return false;
        }
        name == application_name
    })
}

async fn next_server_event(server_rx: &mut Option<ServerEventReceiver>) -> Option<ServerEvent> {
    match server_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Owns the audio-server session and every route created on it, and runs the single event
/// loop all notifications are dispatched on.
pub struct SessionManager<S: AudioServer, B: DeviceBus> {
    server: Arc<S>,
    bus: Arc<B>,
    config: BridgeConfig,
    classifier: DeviceClassifier,
    phase: SessionPhase,
    server_rx: Option<ServerEventReceiver>,
    registry: RouteRegistry,
    route_rx: mpsc::UnboundedReceiver<RouteEvent>,
    watcher_tx: mpsc::UnboundedSender<WatcherFailure>,
    watcher_rx: mpsc::UnboundedReceiver<WatcherFailure>,
    device_states: DeviceConnectionState,
    own_pid: u32,
}

impl<S: AudioServer + 'static, B: DeviceBus + 'static> SessionManager<S, B> {
    pub fn new(config: BridgeConfig, server: Arc<S>, bus: Arc<B>) -> Self {
        let (route_tx, route_rx) = mpsc::unbounded_channel();
        let (watcher_tx, watcher_rx) = mpsc::unbounded_channel();
        let registry = RouteRegistry::new(route_tx, config.flush_on_ready);
        Self {
            server,
            bus,
            config,
            classifier: DeviceClassifier::default(),
            phase: SessionPhase::Disconnected,
            server_rx: None,
            registry,
            route_rx,
            watcher_tx,
            watcher_rx,
            device_states: DeviceConnectionState::new(),
            own_pid: std::process::id(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    pub fn device_states(&self) -> &DeviceConnectionState {
        &self.device_states
    }

    /// Connect, process notifications until stopped or a fatal condition occurs, then drain
    /// all routes and release the session.
    pub async fn run(mut self, mut stop: StopHandle) -> BridgeExit {
        let result = match self.connect(self.config.connect_timeout).await {
            Ok(()) => self.event_loop(&mut stop).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!("{}", e);
        }

        self.shutdown().await;

        match result {
            Ok(()) => BridgeExit::Clean,
            Err(e) => BridgeExit::Fatal(e),
        }
    }

    /// Try to establish a session, retrying after `retry_delay` until `timeout` has elapsed.
    ///
    /// Blocks the event loop while retrying.
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), BridgeError> {
        if self.phase != SessionPhase::Reconnecting {
            self.phase = SessionPhase::Connecting;
        }
        self.server_rx = None;

        let deadline = Instant::now() + timeout;
        loop {
            match self.server.connect(&self.config.application_name).await {
                Ok(server_rx) => {
                    debug!("Connection to audio server initiated");
                    self.server_rx = Some(server_rx);
                    return Ok(());
                }
                Err(e) => {
                    warn!("Connection failure: {}", e);
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
            if Instant::now() > deadline {
                break;
            }
        }

        self.phase = SessionPhase::Disconnected;
        Err(BridgeError::ConnectTimeout(timeout))
    }

    async fn event_loop(&mut self, stop: &mut StopHandle) -> Result<(), BridgeError> {
        loop {
            select! {
                biased;
                _ = stop.signaled() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                event = next_server_event(&mut self.server_rx) => match event {
                    Some(event) => self.on_server_event(event).await?,
                    None => {
                        self.phase = SessionPhase::Terminated;
                        self.server_rx = None;
                        return Err(BridgeError::SessionTerminated);
                    }
                },
                Some(event) = self.route_rx.recv() => self.registry.on_route_event(event),
                Some(failure) = self.watcher_rx.recv() => self.on_watcher_failure(failure)?,
            }
        }
    }

    async fn on_server_event(&mut self, event: ServerEvent) -> Result<(), BridgeError> {
        match event {
            ServerEvent::StateChanged(state) => self.on_context_state(state).await,
            ServerEvent::Subscription { facility: Facility::Source, kind, index } => {
                self.on_source_event(kind, index).await;
                Ok(())
            }
            ServerEvent::Subscription { .. } => Ok(()),
        }
    }

    async fn on_context_state(&mut self, state: ContextState) -> Result<(), BridgeError> {
        match state {
            ContextState::Unconnected
            | ContextState::Connecting
            | ContextState::Authorizing
            | ContextState::SettingName => {
                debug!("Audio server context state: {:?}", state);
                Ok(())
            }
            ContextState::Ready => self.on_ready().await,
            ContextState::Failed => {
                warn!("Connection failure: audio server session failed");
                self.registry.release_all();

                self.phase = SessionPhase::Reconnecting;
                let timeout = self.config.connect_timeout;
                if self.connect(timeout).await.is_err() {
                    self.phase = SessionPhase::Failed;
                    return Err(BridgeError::ReconnectFailed(timeout));
                }
                Ok(())
            }
            ContextState::Terminated => {
                self.phase = SessionPhase::Terminated;
                self.registry.release_all();
                self.server_rx = None;
                Err(BridgeError::SessionTerminated)
            }
        }
    }

    async fn on_ready(&mut self) -> Result<(), BridgeError> {
        info!("Connected to audio server");
        self.phase = SessionPhase::Ready;

        self.check_duplicate_instance().await?;

        if let Err(e) = self.server.subscribe(SubscriptionMask::SOURCE).await {
            warn!("Failed to subscribe to source events: {}", e);
        }
        match self.server.source_info_list().await {
            Ok(endpoints) => {
                for endpoint in endpoints {
                    self.on_endpoint_discovered(endpoint);
                }
            }
            Err(e) => warn!("Failed to list sources: {}", e),
        }
        Ok(())
    }

    async fn check_duplicate_instance(&mut self) -> Result<(), BridgeError> {
        let clients = match self.server.client_info_list().await {
            Ok(clients) => clients,
            Err(e) => {
                warn!("Failed to list clients, skipping duplicate instance check: {}", e);
                return Ok(());
            }
        };
        match find_conflicting_instance(&clients, &self.config.application_name, self.own_pid) {
            Some(client) => {
                debug!("Conflicting client {}", client.index);
                Err(BridgeError::DuplicateInstance(self.config.application_name.clone()))
            }
            None => Ok(()),
        }
    }

    async fn on_source_event(&mut self, kind: SubscriptionEventKind, index: EndpointId) {
        match kind {
            SubscriptionEventKind::New => match self.server.source_info(index).await {
                Ok(endpoint) => self.on_endpoint_discovered(endpoint),
                Err(e) => debug!("Source {} could not be inspected: {}", index, e),
            },
            SubscriptionEventKind::Remove => {
                if !self.registry.remove(index) {
                    debug!("Removed source {} was not routed", index);
                }
            }
            SubscriptionEventKind::Change => {}
        }
    }

    fn on_endpoint_discovered(&mut self, endpoint: Endpoint) {
        if !self.classifier.classify(&endpoint) {
            debug!("Ignoring source {} ({})", endpoint.id, endpoint.description);
            return;
        }
        match self.registry.add(self.server.as_ref(), &endpoint) {
            Ok(Some(_)) => self.start_watcher(&endpoint),
            Ok(None) => {}
            Err(e) => warn!("Failed to route {}: {}", endpoint.description, e),
        }
    }

    fn start_watcher(&mut self, endpoint: &Endpoint) {
        if !self.config.watch_device_state {
            return;
        }
        let Some(device_path) = endpoint.property(DEVICE_PATH_PROPERTY) else {
            debug!("No device path for {}, not watching its state", endpoint.description);
            return;
        };
        let watcher = watch_connection_state(
            self.bus.clone(),
            device_path.to_string(),
            endpoint.description.clone(),
            self.device_states.clone(),
            self.watcher_tx.clone(),
        );
        self.registry.attach_watcher(endpoint.id, watcher);
    }

    fn on_watcher_failure(&mut self, failure: WatcherFailure) -> Result<(), BridgeError> {
        if self.config.strict_device_bus {
            return Err(BridgeError::DeviceBusContract(failure.error));
        }
        warn!("Stopped watching {}: {}", failure.device_path, failure.error);
        Ok(())
    }

    async fn shutdown(&mut self) {
        let session_alive = self.server_rx.is_some();
        ShutdownCoordinator::new(self.config.drain_timeout)
            .drain(self.server.as_ref(), &mut self.registry, &mut self.route_rx, session_alive)
            .await;
        if session_alive {
            self.server.disconnect().await;
        }
        self.server_rx = None;
        if !matches!(self.phase, SessionPhase::Failed | SessionPhase::Terminated) {
            self.phase = SessionPhase::Disconnected;
        }
        info!("Audio server session released");
    }

    /// Handle every notification that is already queued, without waiting for new ones.
    #[cfg(test)]
    async fn pump(&mut self) -> Result<(), BridgeError> {
        loop {
            let server_event = self.server_rx.as_mut().and_then(|rx| rx.try_recv().ok());
            if let Some(event) = server_event {
                self.on_server_event(event).await?;
                continue;
            }
            if let Ok(event) = self.route_rx.try_recv() {
                self.registry.on_route_event(event);
                continue;
            }
            if let Ok(failure) = self.watcher_rx.try_recv() {
                self.on_watcher_failure(failure)?;
                continue;
            }
            return Ok(());
        }
    }
}
