// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! printplug bridges an application layer to a Bluetooth thermal printer.
//!
//! The library owns the printer session state machine: adapter state and
//! permission gating, time-bounded discovery, the single active printer link,
//! and command transmission. The OS-level radio work is delegated to a
//! [`RadioDriver`](api::RadioDriver) supplied by the embedding platform, and
//! results flow back to the application through the
//! [`PrinterHost`](api::PrinterHost) request surface and the
//! [`HostListener`](api::HostListener) notification surface.
//!
//! # Usage
//!
//! ```no_run
//! # use std::sync::Arc;
//! # async fn run(driver: Arc<dyn printplug::api::RadioDriver>) -> printplug::Result<()> {
//! use printplug::api::PrinterHost;
//! use printplug::{BridgeConfig, Collaborators, PrinterBridge};
//!
//! let bridge = PrinterBridge::attach(Collaborators::new(driver), BridgeConfig::default())?;
//! bridge.start_scan().await?;
//! let status = bridge.connect("00:11:22:33:44:55").await?;
//! if status.is_connected() {
//!     bridge
//!         .send_command("00:11:22:33:44:55", "! 0 200 200 210 1\t\nPRINT\t\n")
//!         .await?;
//! }
//! bridge.detach().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
mod bridge;
mod common;
mod config;
mod discovery;
mod internal;
#[cfg(test)]
mod mock;
mod monitor;
pub mod platform;
#[cfg(feature = "serde")]
pub mod serde;
mod session;

pub use bridge::{Collaborators, PrinterBridge};
pub use config::{BridgeConfig, TransportFilter};

use std::result;

/// Hard errors surfaced by the printer bridge.
///
/// Driver-level connect and send failures are not errors; they are reported
/// through [`ConnectStatus`](api::ConnectStatus) codes and `false` results.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bluetooth adapter is unavailable")]
    AdapterUnavailable,

    #[error("Printer {0} is not connected")]
    NotConnected(String),

    #[error("Host listener error: {0}")]
    Host(String),

    #[error("Printer bridge has been detached")]
    Detached,

    #[error("No tokio runtime available to attach the printer bridge")]
    RuntimeUnavailable,

    #[error("{}", _0)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl From<tokio::sync::oneshot::error::RecvError> for Error {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Error::Detached
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::Detached
    }
}

/// Convenience type for a result using the printplug [`Error`] type.
pub type Result<T> = result::Result<T, Error>;
