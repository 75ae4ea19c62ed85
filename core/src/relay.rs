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

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::audio_server::{
    AudioServer, AudioStream, Endpoint, Leg, Peeked, RouteEvent, StreamConfig, StreamDirection,
    StreamEventSender, StreamState,
};
use crate::definitions::{BufferAttr, StreamFlags};
use crate::errors::AudioServerError;
use crate::route_registry::RouteId;

struct RelayLeg {
    stream: Box<dyn AudioStream>,
    finished: bool,
}

impl RelayLeg {
    fn new(stream: Box<dyn AudioStream>) -> Self {
        Self { stream, finished: false }
    }

    /// Request disconnection unless the leg already reached a terminal state.
    /// Returns true while a `Terminated` notification is still expected.
    fn disconnect(&mut self, leg: Leg) -> bool {
        if self.finished || self.stream.state().is_terminal() {
            self.finished = true;
            return false;
        }
        if let Err(e) = self.stream.disconnect() {
            warn!("Failed to disconnect {:?} stream: {}", leg, e);
            self.finished = true;
            return false;
        }
        true
    }
}

/// Capture/playback stream pair forwarding raw frames from one endpoint to the default output.
pub struct StreamRelay {
    capture: RelayLeg,
    playback: RelayLeg,
    flush_on_ready: bool,
}

impl StreamRelay {
    /// Open both legs with the endpoint's sample format. The capture leg is pinned to the
    /// endpoint; the playback leg goes to the default output with server-chosen latency.
    pub fn start<S: AudioServer + ?Sized>(
        server: &S,
        route: RouteId,
        endpoint: &Endpoint,
        events: &mpsc::UnboundedSender<RouteEvent>,
        flush_on_ready: bool,
    ) -> Result<Self, AudioServerError> {
        let capture = server.open_stream(
            StreamConfig {
                name: endpoint.description.clone(),
                sample_spec: endpoint.sample_spec,
                direction: StreamDirection::Record { source: endpoint.name.clone() },
                flags: StreamFlags::DONT_MOVE,
                buffer_attr: None,
            },
            StreamEventSender::new(route, Leg::Capture, events.clone()),
        )?;

        let playback = server.open_stream(
            StreamConfig {
                name: endpoint.description.clone(),
                sample_spec: endpoint.sample_spec,
                direction: StreamDirection::Playback { sink: None },
                flags: StreamFlags::ADJUST_LATENCY,
                buffer_attr: Some(BufferAttr::server_default()),
            },
            StreamEventSender::new(route, Leg::Playback, events.clone()),
        );
        let playback = match playback {
            Ok(playback) => playback,
            Err(e) => {
                let mut capture = RelayLeg::new(capture);
                capture.disconnect(Leg::Capture);
                return Err(e);
            }
        };

        Ok(Self {
            capture: RelayLeg::new(capture),
            playback: RelayLeg::new(playback),
            flush_on_ready,
        })
    }

    /// Forward the next captured block to playback unchanged. Returns the number of bytes written.
    pub fn on_readable(&mut self) -> Result<usize, AudioServerError> {
        let written = match self.capture.stream.peek()? {
            Peeked::Empty => return Ok(0),
            Peeked::Hole(length) => {
                debug!("Skipping hole of {} bytes in captured data", length);
                0
            }
            Peeked::Data(data) => {
                self.playback.stream.write(data)?;
                data.len()
            }
        };
        self.capture.stream.discard()?;
        Ok(written)
    }

    /// Handle a state notification of one leg. Returns true when the leg failed, which
    /// invalidates the whole relay.
    pub fn on_state_changed(&mut self, leg: Leg, state: StreamState) -> bool {
        match state {
            StreamState::Creating | StreamState::Unconnected => false,
            StreamState::Terminated => {
                self.leg_mut(leg).finished = true;
                false
            }
            StreamState::Ready => {
                if self.flush_on_ready {
                    if let Err(e) = self.leg_mut(leg).stream.flush() {
                        warn!("Failed to flush {:?} stream: {}", leg, e);
                    }
                }
                false
            }
            StreamState::Failed => {
                self.leg_mut(leg).finished = true;
                true
            }
        }
    }

    /// Disconnect both legs. Returns the number of legs whose termination is still pending.
    pub fn stop(&mut self) -> usize {
        let capture_pending = self.capture.disconnect(Leg::Capture);
        let playback_pending = self.playback.disconnect(Leg::Playback);
        capture_pending as usize + playback_pending as usize
    }

    /// Record a terminal notification received while stopping. Returns true once both legs
    /// are finished and the handles can be released.
    pub fn on_leg_finished(&mut self, leg: Leg) -> bool {
        self.leg_mut(leg).finished = true;
        self.is_finished()
    }

    pub fn is_finished(&self) -> bool {
        self.capture.finished && self.playback.finished
    }

    fn leg_mut(&mut self, leg: Leg) -> &mut RelayLeg {
        match leg {
            Leg::Capture => &mut self.capture,
            Leg::Playback => &mut self.playback,
        }
    }
}
