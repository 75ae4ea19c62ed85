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

//! Audio-server collaborator interface.
//!
//! The core never talks a wire protocol itself. A backend implements [`AudioServer`] and
//! [`AudioStream`] and reports asynchronous notifications through the channels handed to it:
//! session notifications through the receiver returned by [`AudioServer::connect`], stream
//! notifications through a [`StreamEventSender`]. Requests made on one connection complete in
//! the order they were issued.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::definitions::{BufferAttr, SampleSpec, StreamFlags, SubscriptionMask};
use crate::errors::AudioServerError;
use crate::route_registry::RouteId;

/// Identity of an endpoint, stable for the lifetime of one session.
pub type EndpointId = u32;

/// Read-only view of an audio source as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub id: EndpointId,
    pub name: String,
    pub description: String,
    pub sample_spec: SampleSpec,
    pub properties: HashMap<String, String>,
}

impl Endpoint {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// A client connected to the audio server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClientInfo {
    pub index: u32,
    pub properties: HashMap<String, String>,
}

impl ClientInfo {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Connection state of the session as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unconnected,
    Connecting,
    Authorizing,
    SettingName,
    Ready,
    Failed,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facility {
    Source,
    Sink,
    Client,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEventKind {
    New,
    Change,
    Remove,
}

/// Notification delivered on the session channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    StateChanged(ContextState),
    Subscription {
        facility: Facility,
        kind: SubscriptionEventKind,
        index: u32,
    },
}

pub type ServerEventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Unconnected,
    Creating,
    Ready,
    Failed,
    Terminated,
}

impl StreamState {
    /// No further notifications follow a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Failed | StreamState::Terminated)
    }
}

/// The two halves of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    Capture,
    Playback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamNotification {
    StateChanged(StreamState),
    /// Captured data of the given length can be peeked.
    Readable(usize),
}

/// Stream notification tagged with the route and leg it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEvent {
    pub route: RouteId,
    pub leg: Leg,
    pub notification: StreamNotification,
}

/// Handle given to a backend stream for reporting its notifications into the event loop.
#[derive(Debug, Clone)]
pub struct StreamEventSender {
    route: RouteId,
    leg: Leg,
    tx: mpsc::UnboundedSender<RouteEvent>,
}

impl StreamEventSender {
    pub fn new(route: RouteId, leg: Leg, tx: mpsc::UnboundedSender<RouteEvent>) -> Self {
        Self { route, leg, tx }
    }

    pub fn state_changed(&self, state: StreamState) {
        self.send(StreamNotification::StateChanged(state));
    }

    pub fn readable(&self, length: usize) {
        self.send(StreamNotification::Readable(length));
    }

    fn send(&self, notification: StreamNotification) {
        // The loop has already exited when the receiver is gone; nothing is left to notify.
        let _ = self.tx.send(RouteEvent {
            route: self.route,
            leg: self.leg,
            notification,
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamDirection {
    /// Capture from the named source.
    Record { source: String },
    /// Play to the named sink, or to the default output when `None`.
    Playback { sink: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub name: String,
    pub sample_spec: SampleSpec,
    pub direction: StreamDirection,
    pub flags: StreamFlags,
    pub buffer_attr: Option<BufferAttr>,
}

/// Result of peeking at a capture stream.
#[derive(Debug, PartialEq)]
pub enum Peeked<'a> {
    Data(&'a [u8]),
    /// A gap of the given length in the captured data. It must be discarded.
    Hole(usize),
    Empty,
}

/// A connected stream. Dropping the handle releases it.
pub trait AudioStream: Send {
    fn state(&self) -> StreamState;

    /// Borrow the next block of captured data without copying it.
    fn peek(&mut self) -> Result<Peeked<'_>, AudioServerError>;

    /// Advance the read position past the block returned by the last `peek`.
    fn discard(&mut self) -> Result<(), AudioServerError>;

    fn write(&mut self, data: &[u8]) -> Result<(), AudioServerError>;

    fn flush(&mut self) -> Result<(), AudioServerError>;

    /// Request disconnection. Completion is reported as a `Terminated` state notification.
    fn disconnect(&mut self) -> Result<(), AudioServerError>;
}

#[async_trait]
pub trait AudioServer: Send + Sync {
    /// Initiate a session. An error means the connection attempt could not even be started;
    /// later failures arrive as `ContextState::Failed` on the returned channel.
    async fn connect(&self, application_name: &str) -> Result<ServerEventReceiver, AudioServerError>;

    async fn disconnect(&self);

    async fn subscribe(&self, mask: SubscriptionMask) -> Result<(), AudioServerError>;

    async fn source_info(&self, index: EndpointId) -> Result<Endpoint, AudioServerError>;

    async fn source_info_list(&self) -> Result<Vec<Endpoint>, AudioServerError>;

    async fn client_info_list(&self) -> Result<Vec<ClientInfo>, AudioServerError>;

    /// Create and connect a stream. Its notifications are reported through `events`.
    fn open_stream(
        &self,
        config: StreamConfig,
        events: StreamEventSender,
    ) -> Result<Box<dyn AudioStream>, AudioServerError>;
}
