// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Contracts for the platform collaborators: the radio driver that performs
//! OS-level Bluetooth I/O and the permission prompt.

use async_trait::async_trait;
use encoding_rs::Encoding;
use futures::stream::Stream;
use std::fmt::Debug;
use std::pin::Pin;

/// Radio state as reported by the platform, before normalization.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum NativeAdapterState {
    /// `BluetoothAdapter.EXTRA_STATE` value.
    Android(i32),
    /// `CBManagerState` raw value.
    CoreBluetooth(i64),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Transport {
    Classic,
    Le,
    Dual,
    Unknown,
}

/// A device record as delivered by the driver. Drivers occasionally report
/// incomplete records, so both identity fields are optional.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FoundRecord {
    pub address: Option<String>,
    pub name: Option<String>,
    pub rssi: Option<i32>,
    pub transport: Transport,
}

/// Everything the driver reports unprompted.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum DriverEvent {
    StateChanged(NativeAdapterState),
    DeviceFound(FoundRecord),
    /// The printer dropped the link without being asked to.
    LinkLost,
    Received(Vec<u8>),
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("Printer link lost")]
    LinkLost,

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Cannot encode text as {0}")]
    Encoding(String),
}

/// The OS-level Bluetooth capability the bridge drives.
///
/// Each async method resolves exactly once with the outcome of the platform
/// call; unsolicited signals are delivered through [`RadioDriver::events`].
#[async_trait]
pub trait RadioDriver: Send + Sync + Debug {
    /// Whether a usable radio adapter exists at all.
    fn has_adapter(&self) -> bool;

    /// Whether the adapter is powered on.
    fn is_enabled(&self) -> bool;

    /// Takes the driver's event stream. The bridge calls this once, on attach.
    fn events(&self) -> Pin<Box<dyn Stream<Item = DriverEvent> + Send>>;

    async fn start_discovery(&self) -> bool;

    async fn cancel_discovery(&self) -> bool;

    /// Opens the physical link. A failure carries the driver's raw status code.
    async fn connect(&self, address: &str) -> std::result::Result<(), i64>;

    async fn disconnect(&self) -> bool;

    /// Encodes one command line in the printer's text encoding. `encoding` is
    /// a WHATWG label such as `gb2312` or `utf-8`. Unknown labels and text the
    /// encoding cannot represent are errors.
    fn encode(&self, text: &str, encoding: &str) -> std::result::Result<Vec<u8>, DriverError> {
        let charset = Encoding::for_label(encoding.as_bytes())
            .ok_or_else(|| DriverError::Encoding(encoding.to_string()))?;
        let (bytes, _, unmappable) = charset.encode(text);
        if unmappable {
            return Err(DriverError::Encoding(encoding.to_string()));
        }
        Ok(bytes.into_owned())
    }

    async fn write(&self, data: &[u8]) -> std::result::Result<(), DriverError>;
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PermissionGrant {
    pub permission: String,
    pub granted: bool,
}

/// The platform's runtime permission prompt.
#[async_trait]
pub trait PermissionUi: Send + Sync + Debug {
    /// Returns the subset of `required` that has not been granted yet.
    fn missing(&self, required: &[String]) -> Vec<String>;

    /// Prompts for `permissions` and resolves with one grant per identifier
    /// once the user has answered.
    async fn request(&self, permissions: Vec<String>) -> Vec<PermissionGrant>;
}

/// For platforms without runtime Bluetooth permissions.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrantAll;

#[async_trait]
impl PermissionUi for GrantAll {
    fn missing(&self, _required: &[String]) -> Vec<String> {
        vec![]
    }

    async fn request(&self, permissions: Vec<String>) -> Vec<PermissionGrant> {
        permissions
            .into_iter()
            .map(|permission| PermissionGrant {
                permission,
                granted: true,
            })
            .collect()
    }
}
