// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `api` module contains the traits and types which make up printplug's
//! public surface: what the application layer can ask of the bridge, what the
//! bridge tells the application, and what the bridge expects from the platform.

mod driver;

pub use self::driver::{
    DriverError, DriverEvent, FoundRecord, GrantAll, NativeAdapterState, PermissionGrant,
    PermissionUi, RadioDriver, Transport,
};

use async_trait::async_trait;
use futures::stream::Stream;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
#[cfg(feature = "serde")]
use serde_cr as serde;
use std::convert::TryFrom;
use std::fmt::{self, Display, Formatter};
use std::pin::Pin;

use crate::Result;

/// Normalized state of the local Bluetooth radio.
///
/// The discriminants are the values delivered to the application layer and
/// are part of the wire contract; `2` is intentionally unused.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum AdapterState {
    Unsupported = 0,
    Resetting = 1,
    Unauthorized = 3,
    PoweredOff = 4,
    PoweredOn = 5,
}

impl AdapterState {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Default for AdapterState {
    fn default() -> Self {
        AdapterState::Unsupported
    }
}

impl TryFrom<u8> for AdapterState {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            0 => Ok(AdapterState::Unsupported),
            1 => Ok(AdapterState::Resetting),
            3 => Ok(AdapterState::Unauthorized),
            4 => Ok(AdapterState::PoweredOff),
            5 => Ok(AdapterState::PoweredOn),
            other => Err(other),
        }
    }
}

/// A printer seen during the current scan session.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DiscoveredDevice {
    pub address: String,
    pub name: String,
    pub rssi: Option<i32>,
}

#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// The state of the single physical printer link.
#[cfg_attr(
    feature = "serde",
    derive(Serialize, Deserialize),
    serde(crate = "serde_cr")
)]
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct Session {
    pub address: String,
    pub state: SessionState,
}

impl Session {
    pub fn is_connected_to(&self, address: &str) -> bool {
        self.state == SessionState::Connected && self.address == address
    }
}

/// Result of a connect request.
///
/// Failures to reach or open the printer are not errors; callers branch on the
/// status. [`ConnectStatus::code`] yields the integer the application layer
/// has always received: `200` for a live link, `0` when no adapter or no
/// matching printer was available, or the raw driver failure code.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ConnectStatus {
    Connected,
    Unavailable,
    Failed(i64),
}

impl ConnectStatus {
    pub const CONNECTED_CODE: i64 = 200;
    pub const UNAVAILABLE_CODE: i64 = 0;

    pub fn code(self) -> i64 {
        match self {
            ConnectStatus::Connected => Self::CONNECTED_CODE,
            ConnectStatus::Unavailable => Self::UNAVAILABLE_CODE,
            ConnectStatus::Failed(code) => code,
        }
    }

    pub fn is_connected(self) -> bool {
        self == ConnectStatus::Connected
    }
}

impl From<ConnectStatus> for i64 {
    fn from(status: ConnectStatus) -> Self {
        status.code()
    }
}

impl Display for ConnectStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ConnectStatus::Connected => write!(f, "connected ({})", self.code()),
            ConnectStatus::Unavailable => write!(f, "unavailable ({})", self.code()),
            ConnectStatus::Failed(code) => write!(f, "driver failure ({})", code),
        }
    }
}

/// Notifications pushed from the bridge to the application layer.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum PrinterEvent {
    StateChanged(AdapterState),
    DeviceFound(DiscoveredDevice),
    DiscoveryFinished,
}

/// The request surface the application layer drives.
///
/// Every method resolves exactly once. Discovery results arrive separately,
/// through [`PrinterHost::events`] and any attached [`HostListener`].
#[async_trait]
pub trait PrinterHost: Send + Sync + Clone {
    /// Round-trips the application's own info string, suffixed with the
    /// platform name and version. Used for environment checks only.
    async fn get_host_info(&self) -> Result<String>;

    /// Re-evaluates the adapter state, requesting runtime permissions if they
    /// are missing. The resulting state is delivered as a
    /// [`PrinterEvent::StateChanged`] notification.
    async fn check_ble_state(&self) -> Result<()>;

    /// Starts a time-bounded scan. Returns whether the driver initiated
    /// discovery; it does not wait for discovery to finish.
    async fn start_scan(&self) -> Result<bool>;

    /// Cancels the running scan, returning whether the driver accepted the
    /// cancellation.
    async fn stop_scan(&self) -> Result<bool>;

    /// Opens the printer link to `address`. Only an empty address is an error;
    /// every other outcome is a [`ConnectStatus`].
    async fn connect(&self, address: &str) -> Result<ConnectStatus>;

    /// Closes the link if `address` is the connected printer. Returns `false`
    /// if it is not, or if the driver could not close it.
    async fn disconnect(&self, address: &str) -> Result<bool>;

    /// Writes a line-delimited command payload to the connected printer.
    /// Returns `false` if any chunk could not be written.
    async fn send_command(&self, address: &str, command: &str) -> Result<bool>;

    /// Retrieve a stream of [`PrinterEvent`]s. The stream sees every event
    /// emitted after subscription.
    async fn events(&self) -> Result<Pin<Box<dyn Stream<Item = PrinterEvent> + Send>>>;
}

/// The notification surface implemented by the application layer.
///
/// Notifications are fire-and-forget and are delivered in emission order.
#[async_trait]
pub trait HostListener: Send + Sync {
    /// The application's own description, used by
    /// [`PrinterHost::get_host_info`].
    async fn app_info(&self) -> Result<String>;

    fn on_ble_state_changed(&self, state: AdapterState);

    fn on_found(&self, device: &DiscoveredDevice);

    fn on_discovery_finished(&self);
}
