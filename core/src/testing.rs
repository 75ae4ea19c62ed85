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

//! Mock backends and fixtures shared by the unit tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::ThreadId;
use std::time::Duration;

use async_trait::async_trait;
use log::{LevelFilter, Log, Metadata, Record};
use tokio::sync::mpsc;

use crate::audio_server::{
    AudioServer, AudioStream, ClientInfo, ContextState, Endpoint, EndpointId, Facility, Peeked, ServerEvent,
    ServerEventReceiver, StreamConfig, StreamEventSender, StreamState, SubscriptionEventKind,
};
use crate::definitions::{
    SampleSpec, SubscriptionMask, A2DP_SOURCE_PROFILE, CLIENT_APPLICATION_NAME_PROPERTY, CLIENT_PROCESS_ID_PROPERTY,
    PROFILE_PROPERTY,
};
use crate::device_bus::{DeviceBus, DeviceProxy, PropertyChange, PropertyChangeStream, PropertyValue};
use crate::errors::{AudioServerError, DeviceBusError};

/// Forwards to `env_logger` and keeps every message, tagged with the thread that logged it.
struct CapturingLogger {
    inner: env_logger::Logger,
    records: Mutex<Vec<(ThreadId, String)>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        self.records
            .lock()
            .unwrap()
            .push((std::thread::current().id(), record.args().to_string()));
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

static LOGGER: OnceLock<&'static CapturingLogger> = OnceLock::new();

fn logger() -> &'static CapturingLogger {
    LOGGER.get_or_init(|| {
        let logger: &'static CapturingLogger = Box::leak(Box::new(CapturingLogger {
            inner: env_logger::Builder::from_default_env().is_test(true).build(),
            records: Mutex::new(Vec::new()),
        }));
        if log::set_logger(logger).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
        logger
    })
}

pub fn init_logger() {
    logger();
}

/// Messages logged so far by the calling thread. `#[tokio::test]` runs the test body and the
/// event loop on that thread.
pub fn captured_logs() -> Vec<String> {
    let thread = std::thread::current().id();
    logger()
        .records
        .lock()
        .unwrap()
        .iter()
        .filter(|(id, _)| *id == thread)
        .map(|(_, message)| message.clone())
        .collect()
}

pub async fn short_wait() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

pub fn endpoint(id: EndpointId, description: &str, properties: &[(&str, &str)]) -> Endpoint {
    Endpoint {
        id,
        name: format!("source.{}", id),
        description: description.to_string(),
        sample_spec: SampleSpec::default(),
        properties: properties.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
}

pub fn a2dp_endpoint(id: EndpointId, description: &str) -> Endpoint {
    endpoint(id, description, &[(PROFILE_PROPERTY, A2DP_SOURCE_PROFILE)])
}

pub fn client(index: u32, application_name: Option<&str>, process_id: Option<&str>) -> ClientInfo {
    let mut properties = HashMap::new();
    if let Some(name) = application_name {
        properties.insert(CLIENT_APPLICATION_NAME_PROPERTY.to_string(), name.to_string());
    }
    if let Some(pid) = process_id {
        properties.insert(CLIENT_PROCESS_ID_PROPERTY.to_string(), pid.to_string());
    }
    ClientInfo { index, properties }
}

enum Block {
    Data(Vec<u8>),
    Hole(usize),
}

struct StreamInner {
    state: StreamState,
    pending: VecDeque<Block>,
    written: Vec<Vec<u8>>,
    discarded: usize,
    flushes: usize,
    disconnected: bool,
    released: bool,
    auto_terminate: bool,
    events: StreamEventSender,
}

/// Test-side view of a stream opened through [`MockAudioServer`].
#[derive(Clone)]
pub struct MockStream {
    inner: Arc<Mutex<StreamInner>>,
}

impl MockStream {
    pub fn push_block(&self, data: Vec<u8>) {
        self.inner.lock().unwrap().pending.push_back(Block::Data(data));
    }

    pub fn push_hole(&self, length: usize) {
        self.inner.lock().unwrap().pending.push_back(Block::Hole(length));
    }

    pub fn set_state(&self, state: StreamState) {
        self.inner.lock().unwrap().state = state;
    }

    /// Change the state and report it like the server would.
    pub fn notify_state(&self, state: StreamState) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = state;
        inner.events.state_changed(state);
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.lock().unwrap().written.clone()
    }

    pub fn discarded(&self) -> usize {
        self.inner.lock().unwrap().discarded
    }

    pub fn flushes(&self) -> usize {
        self.inner.lock().unwrap().flushes
    }

    pub fn disconnected(&self) -> bool {
        self.inner.lock().unwrap().disconnected
    }

    pub fn released(&self) -> bool {
        self.inner.lock().unwrap().released
    }
}

struct MockStreamHandle {
    inner: Arc<Mutex<StreamInner>>,
    peeked: Option<Block>,
}

impl AudioStream for MockStreamHandle {
    fn state(&self) -> StreamState {
        self.inner.lock().unwrap().state
    }

    fn peek(&mut self) -> Result<Peeked<'_>, AudioServerError> {
        if self.peeked.is_none() {
            self.peeked = self.inner.lock().unwrap().pending.pop_front();
        }
        Ok(match &self.peeked {
            Some(Block::Data(data)) => Peeked::Data(data),
            Some(Block::Hole(length)) => Peeked::Hole(*length),
            None => Peeked::Empty,
        })
    }

    fn discard(&mut self) -> Result<(), AudioServerError> {
        self.peeked = None;
        self.inner.lock().unwrap().discarded += 1;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), AudioServerError> {
        self.inner.lock().unwrap().written.push(data.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> Result<(), AudioServerError> {
        self.inner.lock().unwrap().flushes += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), AudioServerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnected = true;
        if inner.auto_terminate {
            inner.state = StreamState::Terminated;
            inner.events.state_changed(StreamState::Terminated);
        }
        Ok(())
    }
}

impl Drop for MockStreamHandle {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.released = true;
        }
    }
}

#[derive(Default)]
struct ServerInner {
    failing_connects: usize,
    connect_attempts: usize,
    application_names: Vec<String>,
    events_tx: Option<mpsc::UnboundedSender<ServerEvent>>,
    disconnects: usize,
    subscriptions: Vec<SubscriptionMask>,
    sources: BTreeMap<EndpointId, Endpoint>,
    clients: Vec<ClientInfo>,
    opened_configs: Vec<StreamConfig>,
    streams: Vec<MockStream>,
    fail_stream_open_after: Option<usize>,
    auto_terminate: bool,
}

/// In-memory audio server. A successful `connect` immediately reports `Connecting` then `Ready`.
#[derive(Default)]
pub struct MockAudioServer {
    inner: Mutex<ServerInner>,
}

impl MockAudioServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_connects(&self, count: usize) {
        self.inner.lock().unwrap().failing_connects = count;
    }

    /// Opening streams fails once `count` streams exist.
    pub fn fail_stream_open_after(&self, count: usize) {
        self.inner.lock().unwrap().fail_stream_open_after = Some(count);
    }

    /// Streams opened from now on report `Terminated` as soon as they are disconnected.
    pub fn set_auto_terminate(&self, auto_terminate: bool) {
        self.inner.lock().unwrap().auto_terminate = auto_terminate;
    }

    pub fn add_client(&self, client: ClientInfo) {
        self.inner.lock().unwrap().clients.push(client);
    }

    /// Make a source known without announcing it.
    pub fn add_source(&self, endpoint: Endpoint) {
        self.inner.lock().unwrap().sources.insert(endpoint.id, endpoint);
    }

    pub fn announce_source(&self, endpoint: Endpoint) {
        let id = endpoint.id;
        self.add_source(endpoint);
        self.emit_source_event(SubscriptionEventKind::New, id);
    }

    pub fn remove_source(&self, id: EndpointId) {
        self.inner.lock().unwrap().sources.remove(&id);
        self.emit_source_event(SubscriptionEventKind::Remove, id);
    }

    pub fn emit_source_event(&self, kind: SubscriptionEventKind, index: EndpointId) {
        self.emit(ServerEvent::Subscription { facility: Facility::Source, kind, index });
    }

    pub fn emit_state(&self, state: ContextState) {
        self.emit(ServerEvent::StateChanged(state));
    }

    pub fn emit(&self, event: ServerEvent) {
        if let Some(tx) = &self.inner.lock().unwrap().events_tx {
            let _ = tx.send(event);
        }
    }

    pub fn connect_attempts(&self) -> usize {
        self.inner.lock().unwrap().connect_attempts
    }

    pub fn application_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().application_names.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.inner.lock().unwrap().disconnects
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionMask> {
        self.inner.lock().unwrap().subscriptions.clone()
    }

    pub fn opened_configs(&self) -> Vec<StreamConfig> {
        self.inner.lock().unwrap().opened_configs.clone()
    }

    /// The `index`-th stream opened, counting from zero.
    pub fn stream(&self, index: usize) -> MockStream {
        self.inner.lock().unwrap().streams[index].clone()
    }
}

#[async_trait]
impl AudioServer for MockAudioServer {
    async fn connect(&self, application_name: &str) -> Result<ServerEventReceiver, AudioServerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connect_attempts += 1;
        inner.application_names.push(application_name.to_string());
        if inner.failing_connects > 0 {
            inner.failing_connects -= 1;
            return Err(AudioServerError::ConnectionRefused);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ServerEvent::StateChanged(ContextState::Connecting));
        let _ = tx.send(ServerEvent::StateChanged(ContextState::Ready));
        inner.events_tx = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnects += 1;
        inner.events_tx = None;
    }

    async fn subscribe(&self, mask: SubscriptionMask) -> Result<(), AudioServerError> {
        self.inner.lock().unwrap().subscriptions.push(mask);
        Ok(())
    }

    async fn source_info(&self, index: EndpointId) -> Result<Endpoint, AudioServerError> {
        self.inner
            .lock()
            .unwrap()
            .sources
            .get(&index)
            .cloned()
            .ok_or(AudioServerError::NoSuchEntity(index))
    }

    async fn source_info_list(&self) -> Result<Vec<Endpoint>, AudioServerError> {
        Ok(self.inner.lock().unwrap().sources.values().cloned().collect())
    }

    async fn client_info_list(&self) -> Result<Vec<ClientInfo>, AudioServerError> {
        Ok(self.inner.lock().unwrap().clients.clone())
    }

    fn open_stream(
        &self,
        config: StreamConfig,
        events: StreamEventSender,
    ) -> Result<Box<dyn AudioStream>, AudioServerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_stream_open_after.is_some_and(|limit| inner.streams.len() >= limit) {
            return Err(AudioServerError::Stream(format!("cannot open {}", config.name)));
        }
        let stream = Arc::new(Mutex::new(StreamInner {
            state: StreamState::Ready,
            pending: VecDeque::new(),
            written: Vec::new(),
            discarded: 0,
            flushes: 0,
            disconnected: false,
            released: false,
            auto_terminate: inner.auto_terminate,
            events,
        }));
        inner.opened_configs.push(config);
        inner.streams.push(MockStream { inner: stream.clone() });
        Ok(Box::new(MockStreamHandle { inner: stream, peeked: None }))
    }
}

struct DeviceInner {
    properties: Result<HashMap<String, PropertyValue>, DeviceBusError>,
    subscribers: Vec<futures::channel::mpsc::Sender<PropertyChange>>,
}

/// Test-side handle of a device registered on [`MockDeviceBus`].
#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<Mutex<DeviceInner>>,
}

impl MockDevice {
    /// Send a property-changed signal to every subscriber.
    pub fn emit(&self, key: &str, value: PropertyValue) {
        let mut inner = self.inner.lock().unwrap();
        for subscriber in inner.subscribers.iter_mut() {
            let _ = subscriber.try_send(PropertyChange { key: key.to_string(), value: value.clone() });
        }
    }
}

struct MockProxy {
    device: MockDevice,
}

#[async_trait]
impl DeviceProxy for MockProxy {
    async fn get_properties(&self) -> Result<HashMap<String, PropertyValue>, DeviceBusError> {
        self.device.inner.lock().unwrap().properties.clone()
    }

    fn property_changes(&self) -> Result<PropertyChangeStream, DeviceBusError> {
        let (tx, rx) = futures::channel::mpsc::channel(16);
        self.device.inner.lock().unwrap().subscribers.push(tx);
        Ok(rx)
    }
}

#[derive(Default)]
pub struct MockDeviceBus {
    devices: Mutex<HashMap<String, MockDevice>>,
    opened: Mutex<Vec<(String, String, String)>>,
}

impl MockDeviceBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(
        &self,
        path: &str,
        properties: Result<Vec<(&str, PropertyValue)>, DeviceBusError>,
    ) -> MockDevice {
        let properties = properties.map(|p| p.into_iter().map(|(k, v)| (k.to_string(), v)).collect());
        let device = MockDevice {
            inner: Arc::new(Mutex::new(DeviceInner { properties, subscribers: Vec::new() })),
        };
        self.devices.lock().unwrap().insert(path.to_string(), device.clone());
        device
    }

    /// Every proxy requested so far as (service, path, interface).
    pub fn opened(&self) -> Vec<(String, String, String)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceBus for MockDeviceBus {
    async fn proxy(
        &self,
        service: &str,
        path: &str,
        interface: &str,
    ) -> Result<Box<dyn DeviceProxy>, DeviceBusError> {
        self.opened
            .lock()
            .unwrap()
            .push((service.to_string(), path.to_string(), interface.to_string()));
        let device = self.devices.lock().unwrap().get(path).cloned();
        match device {
            Some(device) => Ok(Box::new(MockProxy { device })),
            None => Err(DeviceBusError::ProxyUnavailable(path.to_string())),
        }
    }
}
