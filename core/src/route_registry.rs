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

use std::collections::HashMap;
use std::fmt;

use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::audio_server::{AudioServer, Endpoint, EndpointId, Leg, RouteEvent, StreamNotification};
use crate::errors::AudioServerError;
use crate::relay::StreamRelay;
use crate::service::ServiceHandle;

/// Identity of one route instance. Never reused, so late notifications of a stopped route
/// cannot reach a newer route created for the same endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub u64);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Starting,
    Active,
    Failed,
    Stopped,
}

/// Live pairing of a capture stream from one endpoint with a playback stream on the default output.
pub struct Route {
    id: RouteId,
    endpoint_id: EndpointId,
    description: String,
    state: RouteState,
    relay: Option<StreamRelay>,
    watcher: Option<ServiceHandle>,
}

impl Route {
    fn new(id: RouteId, endpoint: &Endpoint) -> Self {
        Self {
            id,
            endpoint_id: endpoint.id,
            description: endpoint.description.clone(),
            state: RouteState::Starting,
            relay: None,
            watcher: None,
        }
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.endpoint_id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    fn start<S: AudioServer + ?Sized>(
        &mut self,
        server: &S,
        endpoint: &Endpoint,
        events: &mpsc::UnboundedSender<RouteEvent>,
        flush_on_ready: bool,
    ) -> Result<(), AudioServerError> {
        match StreamRelay::start(server, self.id, endpoint, events, flush_on_ready) {
            Ok(relay) => {
                self.relay = Some(relay);
                self.state = RouteState::Active;
                Ok(())
            }
            Err(e) => {
                self.state = RouteState::Failed;
                Err(e)
            }
        }
    }

    /// Disconnect both legs and stop the watcher. Returns the number of legs still terminating.
    fn stop(&mut self) -> usize {
        if self.state != RouteState::Failed {
            self.state = RouteState::Stopped;
        }
        if let Some(mut watcher) = self.watcher.take() {
            watcher.request_shutdown();
        }
        self.relay.as_mut().map(StreamRelay::stop).unwrap_or(0)
    }

    fn on_leg_finished(&mut self, leg: Leg) -> bool {
        self.relay.as_mut().map(|r| r.on_leg_finished(leg)).unwrap_or(true)
    }
}

/// Counts route teardowns that still wait for their streams to terminate, and turns that
/// fan-out into a single drained notification.
#[derive(Default)]
pub struct TeardownTracker {
    pending: HashMap<RouteId, Route>,
    drained_tx: Option<oneshot::Sender<()>>,
}

impl TeardownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn is_drained(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_tracking(&self, route: RouteId) -> bool {
        self.pending.contains_key(&route)
    }

    /// Park a stopped route until its legs report termination.
    pub fn begin(&mut self, route: Route) {
        debug!("Route {} waiting for {} teardown", route.id, route.description);
        self.pending.insert(route.id, route);
    }

    /// Record a terminal notification of one leg. Returns true when this completed the route's
    /// teardown; its stream handles are released at that point.
    pub fn leg_finished(&mut self, route: RouteId, leg: Leg) -> bool {
        let Some(parked) = self.pending.get_mut(&route) else {
            return false;
        };
        if !parked.on_leg_finished(leg) {
            return false;
        }
        if let Some(parked) = self.pending.remove(&route) {
            debug!("Route {} teardown complete", parked.id);
        }
        self.notify_if_drained();
        true
    }

    /// Resolves once no teardown is pending; immediately if none is.
    pub fn notify_when_drained(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.drained_tx = Some(tx);
        self.notify_if_drained();
        rx
    }

    /// Release every parked route without waiting for acknowledgements.
    pub fn release_all(&mut self) -> usize {
        let released = self.pending.len();
        self.pending.clear();
        self.notify_if_drained();
        released
    }

    fn notify_if_drained(&mut self) {
        if self.pending.is_empty() {
            if let Some(tx) = self.drained_tx.take() {
                let _ = tx.send(());
            }
        }
    }
}

/// Table of active routes keyed by source endpoint; at most one route per endpoint.
pub struct RouteRegistry {
    routes: HashMap<EndpointId, Route>,
    endpoints_by_route: HashMap<RouteId, EndpointId>,
    next_route_id: u64,
    teardown: TeardownTracker,
    events_tx: mpsc::UnboundedSender<RouteEvent>,
    flush_on_ready: bool,
}

impl RouteRegistry {
    /// `events_tx` is handed to every stream created by this registry.
    pub fn new(events_tx: mpsc::UnboundedSender<RouteEvent>, flush_on_ready: bool) -> Self {
        Self {
            routes: HashMap::new(),
            endpoints_by_route: HashMap::new(),
            next_route_id: 1,
            teardown: TeardownTracker::new(),
            events_tx,
            flush_on_ready,
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn contains(&self, endpoint_id: EndpointId) -> bool {
        self.routes.contains_key(&endpoint_id)
    }

    pub fn get(&self, endpoint_id: EndpointId) -> Option<&Route> {
        self.routes.get(&endpoint_id)
    }

    pub fn endpoint_ids(&self) -> Vec<EndpointId> {
        self.routes.keys().copied().collect()
    }

    pub fn teardown(&self) -> &TeardownTracker {
        &self.teardown
    }

    pub fn teardown_mut(&mut self) -> &mut TeardownTracker {
        &mut self.teardown
    }

    /// Create and start a route for an accepted endpoint. Returns `Ok(None)` when the endpoint
    /// is already routed.
    pub fn add<S: AudioServer + ?Sized>(
        &mut self,
        server: &S,
        endpoint: &Endpoint,
    ) -> Result<Option<RouteId>, AudioServerError> {
        if self.contains(endpoint.id) {
            debug!("Endpoint {} is already routed", endpoint.id);
            return Ok(None);
        }

        let route_id = RouteId(self.next_route_id);
        self.next_route_id += 1;

        info!("New A2DP Source: {}", endpoint.description);
        let mut route = Route::new(route_id, endpoint);
        route.start(server, endpoint, &self.events_tx, self.flush_on_ready)?;

        self.endpoints_by_route.insert(route_id, endpoint.id);
        self.routes.insert(endpoint.id, route);
        Ok(Some(route_id))
    }

    /// Attach the connection-state watcher of a route; it is stopped together with the route.
    pub fn attach_watcher(&mut self, endpoint_id: EndpointId, watcher: ServiceHandle) {
        match self.routes.get_mut(&endpoint_id) {
            Some(route) => route.watcher = Some(watcher),
            None => {
                let mut watcher = watcher;
                watcher.request_shutdown();
            }
        }
    }

    /// Remove and stop the route of an endpoint. Returns false if the endpoint was not routed.
    pub fn remove(&mut self, endpoint_id: EndpointId) -> bool {
        let Some(mut route) = self.routes.remove(&endpoint_id) else {
            return false;
        };
        self.endpoints_by_route.remove(&route.id);

        info!("Removed A2DP Source: {}", route.description);
        let pending_legs = route.stop();
        if pending_legs > 0 {
            self.teardown.begin(route);
        }
        true
    }

    /// Stop every route. Teardowns that need acknowledgement are left in the tracker.
    pub fn stop_all(&mut self) {
        for endpoint_id in self.endpoint_ids() {
            self.remove(endpoint_id);
        }
    }

    /// Stop every route and release it immediately. Used when the session is gone and no
    /// acknowledgement can arrive anymore.
    pub fn release_all(&mut self) {
        self.stop_all();
        let released = self.teardown.release_all();
        if released > 0 {
            debug!("Released {} routes without teardown acknowledgement", released);
        }
    }

    /// Dispatch a stream notification to the route it belongs to.
    pub fn on_route_event(&mut self, event: RouteEvent) {
        if let Some(endpoint_id) = self.endpoints_by_route.get(&event.route).copied() {
            self.on_active_route_event(endpoint_id, event);
        } else if self.teardown.is_tracking(event.route) {
            if let StreamNotification::StateChanged(state) = event.notification {
                if state.is_terminal() {
                    self.teardown.leg_finished(event.route, event.leg);
                }
            }
        } else {
            debug!("Dropping notification for stopped route {}: {:?}", event.route, event.notification);
        }
    }

    fn on_active_route_event(&mut self, endpoint_id: EndpointId, event: RouteEvent) {
        let Some(route) = self.routes.get_mut(&endpoint_id) else {
            return;
        };
        let Some(relay) = route.relay.as_mut() else {
            return;
        };

        let failed = match event.notification {
            StreamNotification::Readable(_) if event.leg == Leg::Capture => match relay.on_readable() {
                Ok(_) => false,
                Err(e) => {
                    warn!("Relay failure for {}: {}", route.description, e);
                    true
                }
            },
            StreamNotification::Readable(_) => false,
            StreamNotification::StateChanged(state) => {
                let failed = relay.on_state_changed(event.leg, state);
                if failed {
                    warn!("Stream failure: {:?} leg of {} failed", event.leg, route.description);
                }
                failed
            }
        };

        if failed {
            route.state = RouteState::Failed;
            self.remove(endpoint_id);
        }
    }
}
