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

use log::{debug, info, warn};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::audio_server::{AudioServer, RouteEvent};
use crate::definitions::SubscriptionMask;
use crate::route_registry::RouteRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every route acknowledged its teardown.
    Drained,
    /// The deadline passed; the given number of routes were released unacknowledged.
    TimedOut { abandoned: usize },
}

/// Stops every route and waits until their streams are gone before the session may be released.
pub struct ShutdownCoordinator {
    drain_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self { drain_timeout }
    }

    /// Unsubscribe from endpoint events, disconnect every route and keep dispatching stream
    /// notifications until all teardowns completed or the drain timeout expired.
    ///
    /// Without a live session no acknowledgement can arrive, so routes are released at once.
    pub async fn drain<S: AudioServer + ?Sized>(
        &self,
        server: &S,
        registry: &mut RouteRegistry,
        route_rx: &mut mpsc::UnboundedReceiver<RouteEvent>,
        session_alive: bool,
    ) -> DrainOutcome {
        if !session_alive {
            registry.release_all();
            return DrainOutcome::Drained;
        }

        if let Err(e) = server.subscribe(SubscriptionMask::empty()).await {
            debug!("Failed to unsubscribe from source events: {}", e);
        }

        info!("Stopping {} routes", registry.len());
        registry.stop_all();

        let mut drained = registry.teardown_mut().notify_when_drained();
        let deadline = Instant::now() + self.drain_timeout;
        loop {
            select! {
                biased;
                _ = &mut drained => {
                    debug!("All routes drained");
                    return DrainOutcome::Drained;
                }
                Some(event) = route_rx.recv() => registry.on_route_event(event),
                _ = tokio::time::sleep_until(deadline) => {
                    let abandoned = registry.teardown().pending();
                    warn!("{} routes did not finish teardown within {:?}, releasing them", abandoned, self.drain_timeout);
                    registry.release_all();
                    return DrainOutcome::TimedOut { abandoned };
                }
            }
        }
    }
}
