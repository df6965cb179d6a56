// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Time-bounded discovery with per-scan deduplication.
//!
//! A scan session runs from a successful `start_scan` until the first of
//! `stop_scan`, an adapter state change, or the scan timer. Ending a session
//! disarms its timer, clears the device set and emits exactly one
//! [`PrinterEvent::DiscoveryFinished`].

use crate::api::{DiscoveredDevice, FoundRecord, PrinterEvent, RadioDriver};
use crate::common::adapter_manager::AdapterManager;
use crate::config::TransportFilter;
use crate::internal::{Loopback, LoopbackMessage};
use crate::{Error, Result};
use log::{debug, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum ScanEnd {
    Stopped,
    TimedOut,
    AdapterChanged,
    Superseded,
    Detached,
    /// Discovery was cancelled to open a link.
    Connecting,
}

#[derive(Debug)]
struct ScanSession {
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Debug)]
pub(crate) struct DiscoveryCoordinator {
    manager: Arc<AdapterManager>,
    scan: Option<ScanSession>,
    next_generation: u64,
    timeout: Duration,
    filter: TransportFilter,
}

impl DiscoveryCoordinator {
    pub fn new(manager: Arc<AdapterManager>, timeout: Duration, filter: TransportFilter) -> Self {
        Self {
            manager,
            scan: None,
            next_generation: 0,
            timeout,
            filter,
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scan.is_some()
    }

    /// Whether `address` was seen during the current scan session.
    pub fn contains(&self, address: &str) -> bool {
        self.manager.has_device(address)
    }

    pub async fn start_scan(
        &mut self,
        driver: &dyn RadioDriver,
        loopback: &Loopback,
    ) -> Result<bool> {
        if !driver.has_adapter() {
            return Err(Error::AdapterUnavailable);
        }
        if self.scan.is_some() {
            self.finish(ScanEnd::Superseded);
        }
        self.manager.clear_devices();
        let started = driver.start_discovery().await;
        if !started {
            warn!("Driver did not initiate discovery");
            return Ok(false);
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        let timeout = self.timeout;
        let loopback = loopback.clone();
        let timer = tokio::spawn(async move {
            time::sleep(timeout).await;
            let _ = loopback.send(LoopbackMessage::ScanExpired(generation));
        });
        debug!("Scan {} started, ends within {:?}", generation, timeout);
        self.scan = Some(ScanSession { generation, timer });
        Ok(true)
    }

    pub async fn stop_scan(&mut self, driver: &dyn RadioDriver) -> Result<bool> {
        if !driver.has_adapter() {
            return Err(Error::AdapterUnavailable);
        }
        let cancelled = driver.cancel_discovery().await;
        if self.scan.is_some() {
            self.finish(ScanEnd::Stopped);
        }
        Ok(cancelled)
    }

    pub async fn on_scan_expired(&mut self, generation: u64, driver: &dyn RadioDriver) {
        match &self.scan {
            Some(scan) if scan.generation == generation => {
                driver.cancel_discovery().await;
                self.finish(ScanEnd::TimedOut);
            }
            _ => trace!("Ignoring timer of finished scan {}", generation),
        }
    }

    pub async fn on_adapter_state_changed(&mut self, driver: &dyn RadioDriver) {
        if self.scan.is_some() {
            driver.cancel_discovery().await;
            self.finish(ScanEnd::AdapterChanged);
        }
    }

    /// Validates a driver record. Incomplete records and devices on a
    /// filtered transport are dropped.
    pub fn admit(&self, record: FoundRecord) -> Option<DiscoveredDevice> {
        let FoundRecord {
            address,
            name,
            rssi,
            transport,
        } = record;
        let (address, name) = match (address, name) {
            (Some(address), Some(name)) if !address.is_empty() && !name.is_empty() => {
                (address, name)
            }
            (address, name) => {
                trace!("Dropping incomplete record {:?} / {:?}", address, name);
                return None;
            }
        };
        if !self.filter.admits(transport) {
            trace!("Dropping {} on filtered transport {:?}", address, transport);
            return None;
        }
        Some(DiscoveredDevice {
            address,
            name,
            rssi,
        })
    }

    /// Records and announces a device, once per scan session. Outside a scan
    /// session this does nothing.
    pub fn on_device_found(&mut self, device: &DiscoveredDevice) {
        if self.scan.is_none() {
            return;
        }
        if self.manager.add_device(device.clone()) {
            debug!("Found {} ({})", device.name, device.address);
            self.manager.emit(PrinterEvent::DeviceFound(device.clone()));
        }
    }

    /// Ends the running scan session, if any.
    pub fn finish(&mut self, reason: ScanEnd) {
        if let Some(scan) = self.scan.take() {
            scan.timer.abort();
            self.manager.clear_devices();
            debug!("Scan {} finished: {:?}", scan.generation, reason);
            self.manager.emit(PrinterEvent::DiscoveryFinished);
        }
    }
}
