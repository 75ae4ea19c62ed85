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

use crate::audio_server::Endpoint;
use crate::definitions::{A2DP_SOURCE_PROFILE, PROFILE_PROPERTY};

/// Decides whether a discovered endpoint gets routed, based solely on its advertised profile.
#[derive(Debug, Clone)]
pub struct DeviceClassifier {
    key: &'static str,
    expected: &'static str,
}

impl DeviceClassifier {
    pub fn new(key: &'static str, expected: &'static str) -> Self {
        Self { key, expected }
    }

    /// A missing key or any other value is a plain non-match.
    pub fn classify(&self, endpoint: &Endpoint) -> bool {
        endpoint.property(self.key) == Some(self.expected)
    }
}

impl Default for DeviceClassifier {
    fn default() -> Self {
        Self::new(PROFILE_PROPERTY, A2DP_SOURCE_PROFILE)
    }
}
