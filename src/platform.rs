// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `platform` module describes the host platform the bridge runs on and
//! checks that the exported types carry the expected traits.

use crate::api::{self, AdapterState, ConnectStatus, DiscoveredDevice, PrinterEvent, Session};
use crate::{BridgeConfig, PrinterBridge};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use static_assertions::assert_impl_all;
use std::fmt::{self, Debug, Display, Formatter};

// Ensure that the exported types implement all the expected traits.
assert_impl_all!(PrinterBridge: api::PrinterHost, Clone, Debug, Send, Sized, Sync);
assert_impl_all!(BridgeConfig: Clone, Debug, Default, Send, Sync);
assert_impl_all!(AdapterState: Copy, Debug, Eq, Send, Sync);
assert_impl_all!(ConnectStatus: Copy, Debug, Display, Eq, Send, Sync);
assert_impl_all!(DiscoveredDevice: Clone, Debug, Eq, Send, Sync);
assert_impl_all!(PrinterEvent: Clone, Debug, Eq, Send, Sync);
assert_impl_all!(Session: Clone, Debug, Eq, Send, Sync);

/// Name and version of the host platform, reported by
/// [`PrinterHost::get_host_info`](api::PrinterHost::get_host_info).
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlatformInfo {
    pub name: String,
    pub version: Option<String>,
}

impl PlatformInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }

    /// Describes the compile target. The OS version is not known at this
    /// level; embedders that know it should use [`PlatformInfo::new`].
    pub fn current() -> Self {
        let name = match std::env::consts::OS {
            "android" => "Android",
            "ios" => "iOS",
            "macos" => "macOS",
            "linux" => "Linux",
            "windows" => "Windows",
            other => other,
        };
        Self {
            name: name.to_string(),
            version: None,
        }
    }
}

impl Default for PlatformInfo {
    fn default() -> Self {
        Self::current()
    }
}

impl Display for PlatformInfo {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} {}", self.name, version),
            None => write!(f, "{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_platform() {
        assert_eq!(PlatformInfo::new("Android", "14").to_string(), "Android 14");
        let bare = PlatformInfo {
            name: "Linux".into(),
            version: None,
        };
        assert_eq!(bare.to_string(), "Linux");
    }
}
