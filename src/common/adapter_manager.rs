// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Event fan-out and the per-scan device registry.

use crate::api::{DiscoveredDevice, PrinterEvent};
use dashmap::DashMap;
use futures::stream::{Stream, StreamExt};
use log::{trace, warn};
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};

#[derive(Debug)]
pub struct AdapterManager {
    devices: DashMap<String, DiscoveredDevice>,
    events_channel: broadcast::Sender<PrinterEvent>,
}

impl AdapterManager {
    pub fn new(capacity: usize) -> Self {
        let (broadcast_sender, _) = broadcast::channel(capacity.max(1));
        AdapterManager {
            devices: DashMap::new(),
            events_channel: broadcast_sender,
        }
    }

    pub fn emit(&self, event: PrinterEvent) {
        trace!("Emitting {:?}", event);
        if let Err(lost) = self.events_channel.send(event) {
            trace!("Lost printer event, while nothing subscribed: {:?}", lost);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrinterEvent> {
        self.events_channel.subscribe()
    }

    #[cfg(test)]
    pub fn event_stream(&self) -> Pin<Box<dyn Stream<Item = PrinterEvent> + Send>> {
        into_event_stream(self.subscribe())
    }

    /// Records `device` unless its address was already seen. Returns whether
    /// it was new.
    pub fn add_device(&self, device: DiscoveredDevice) -> bool {
        if self.devices.contains_key(&device.address) {
            return false;
        }
        self.devices.insert(device.address.clone(), device);
        true
    }

    pub fn has_device(&self, address: &str) -> bool {
        self.devices.contains_key(address)
    }

    #[cfg(test)]
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.devices
            .iter()
            .map(|val| val.value().clone())
            .collect()
    }

    pub fn clear_devices(&self) {
        self.devices.clear();
    }
}

pub fn into_event_stream(
    receiver: broadcast::Receiver<PrinterEvent>,
) -> Pin<Box<dyn Stream<Item = PrinterEvent> + Send>> {
    Box::pin(BroadcastStream::new(receiver).filter_map(|x| async move {
        match x {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Event subscriber lagged, {} printer events dropped", skipped);
                None
            }
        }
    }))
}
