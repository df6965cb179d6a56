// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::api::Transport;
use crate::platform::PlatformInfo;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use std::time::Duration;

/// Bound on both explicit scans and the lookup that precedes a connect.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_TEXT_ENCODING: &str = "gb2312";
pub const DEFAULT_LINE_DELIMITER: &str = "\t\n";
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Which transports a found device may use to be reported.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TransportFilter {
    /// Drop LE-only devices; the printers speak classic Bluetooth.
    ClassicOnly,
    Any,
}

impl TransportFilter {
    pub fn admits(self, transport: Transport) -> bool {
        match self {
            TransportFilter::ClassicOnly => transport != Transport::Le,
            TransportFilter::Any => true,
        }
    }
}

impl Default for TransportFilter {
    fn default() -> Self {
        TransportFilter::ClassicOnly
    }
}

/// Settings for a [`PrinterBridge`](crate::PrinterBridge).
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr", default)
)]
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    #[cfg_attr(feature = "serde", serde(with = "crate::serde::duration_secs"))]
    pub scan_timeout: Duration,
    /// Look for an undiscovered printer before connecting to it.
    pub implicit_discovery: bool,
    pub transport_filter: TransportFilter,
    /// Encoding label handed to [`RadioDriver::encode`](crate::api::RadioDriver::encode).
    pub text_encoding: String,
    pub line_delimiter: String,
    /// Runtime permissions that must be granted before the radio is usable.
    pub required_permissions: Vec<String>,
    pub platform: PlatformInfo,
    pub event_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            implicit_discovery: true,
            transport_filter: TransportFilter::default(),
            text_encoding: DEFAULT_TEXT_ENCODING.to_string(),
            line_delimiter: DEFAULT_LINE_DELIMITER.to_string(),
            required_permissions: vec![],
            platform: PlatformInfo::current(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl BridgeConfig {
    /// Defaults for an Android host at the given SDK level, including the
    /// Bluetooth permissions that level requires at runtime.
    pub fn android(sdk_level: u32) -> Self {
        let required_permissions = if sdk_level >= 31 {
            vec![
                "android.permission.BLUETOOTH_SCAN",
                "android.permission.BLUETOOTH_CONNECT",
            ]
        } else {
            vec![
                "android.permission.BLUETOOTH",
                "android.permission.ACCESS_FINE_LOCATION",
            ]
        };
        Self {
            required_permissions: required_permissions
                .into_iter()
                .map(String::from)
                .collect(),
            platform: PlatformInfo::new("Android", sdk_level.to_string()),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.scan_timeout, Duration::from_secs(15));
        assert!(config.implicit_discovery);
        assert_eq!(config.text_encoding, "gb2312");
        assert_eq!(config.line_delimiter, "\t\n");
        assert!(config.required_permissions.is_empty());
    }

    #[test]
    fn android_permissions_follow_sdk_level() {
        assert_eq!(
            BridgeConfig::android(30).required_permissions,
            vec![
                "android.permission.BLUETOOTH",
                "android.permission.ACCESS_FINE_LOCATION"
            ]
        );
        assert_eq!(
            BridgeConfig::android(33).required_permissions,
            vec![
                "android.permission.BLUETOOTH_SCAN",
                "android.permission.BLUETOOTH_CONNECT"
            ]
        );
    }

    #[test]
    fn classic_only_drops_le() {
        assert!(!TransportFilter::ClassicOnly.admits(Transport::Le));
        assert!(TransportFilter::ClassicOnly.admits(Transport::Dual));
        assert!(TransportFilter::ClassicOnly.admits(Transport::Unknown));
        assert!(TransportFilter::Any.admits(Transport::Le));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn load_from_toml() {
        let config: BridgeConfig = toml::from_str(
            r#"
            scan_timeout = 20
            implicit_discovery = false
            transport_filter = "Any"
            text_encoding = "utf-8"
            "#,
        )
        .unwrap();
        assert_eq!(config.scan_timeout, Duration::from_secs(20));
        assert!(!config.implicit_discovery);
        assert_eq!(config.transport_filter, TransportFilter::Any);
        assert_eq!(config.line_delimiter, "\t\n");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_round_trip_keeps_seconds() {
        let json = serde_json::to_value(BridgeConfig::default()).unwrap();
        assert_eq!(json["scan_timeout"], 15);
    }
}
