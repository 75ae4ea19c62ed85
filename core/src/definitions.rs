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

use bitflags::bitflags;

/// Client name announced to the audio server. Also used to detect a second running copy.
pub const APPLICATION_NAME: &str = "BluePulse";

/// Endpoint property carrying the Bluetooth profile of a source.
pub const PROFILE_PROPERTY: &str = "bluetooth.protocol";
/// Profile value of endpoints that should be routed to the default output.
pub const A2DP_SOURCE_PROFILE: &str = "a2dp_source";
/// Endpoint property carrying the device-bus object path of the Bluetooth device.
pub const DEVICE_PATH_PROPERTY: &str = "bluez.path";

/// Client properties read by the duplicate-instance guard.
pub const CLIENT_APPLICATION_NAME_PROPERTY: &str = "application.name";
pub const CLIENT_PROCESS_ID_PROPERTY: &str = "application.process.id";

pub const BLUEZ_SERVICE: &str = "org.bluez";
pub const AUDIO_SOURCE_INTERFACE: &str = "org.bluez.AudioSource";
pub const STATE_PROPERTY: &str = "State";

bitflags! {
    /// Flags applied when connecting a capture or playback stream.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    pub struct StreamFlags: u32 {
        /// The server must not relocate the stream to a different endpoint.
        const DONT_MOVE = 0x0001;
        /// Let the server adjust its own latency to the requested buffer attributes.
        const ADJUST_LATENCY = 0x0002;
    }
}

bitflags! {
    /// Facilities the session subscribes to. Empty means unsubscribed.
    #[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
    pub struct SubscriptionMask: u32 {
        const SOURCE = 0x0002;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SampleFormat {
    U8,
    S16Le,
    S16Be,
    S24Le,
    S32Le,
    Float32Le,
}

/// Sample format descriptor of an endpoint. Both legs of a route use the same spec.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SampleSpec {
    pub format: SampleFormat,
    pub rate: u32,
    pub channels: u8,
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            format: SampleFormat::S16Le,
            rate: 44_100,
            channels: 2,
        }
    }
}

/// Playback buffer metrics. `u32::MAX` leaves the choice to the server.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct BufferAttr {
    pub max_length: u32,
    pub target_length: u32,
    pub prebuf: u32,
    pub min_request: u32,
    pub fragment_size: u32,
}

impl BufferAttr {
    /// Every field left to the server. Combined with `StreamFlags::ADJUST_LATENCY` this yields
    /// the server's generous default latency, which avoids audible rate-adjustment artifacts.
    pub const fn server_default() -> Self {
        Self {
            max_length: u32::MAX,
            target_length: u32::MAX,
            prebuf: u32::MAX,
            min_request: u32::MAX,
            fragment_size: u32::MAX,
        }
    }
}

impl Default for BufferAttr {
    fn default() -> Self {
        Self::server_default()
    }
}
