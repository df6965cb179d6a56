// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Scripted collaborators for unit tests.

use crate::api::{
    AdapterState, DiscoveredDevice, DriverError, DriverEvent, FoundRecord, HostListener,
    NativeAdapterState, PermissionGrant, PermissionUi, PrinterEvent, RadioDriver, Transport,
};
use crate::Result;
use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time;

#[derive(Debug)]
struct DriverState {
    has_adapter: bool,
    enabled: bool,
    discovery_result: bool,
    discovery_starts: usize,
    discovery_cancels: usize,
    nearby: Vec<FoundRecord>,
    connect_results: HashMap<String, std::result::Result<(), i64>>,
    connect_delay: Duration,
    connects: Vec<String>,
    disconnect_result: bool,
    disconnects: usize,
    written: Vec<Vec<u8>>,
    write_calls: usize,
    write_failure: Option<(usize, DriverError)>,
}

#[derive(Debug)]
pub(crate) struct MockDriver {
    state: Mutex<DriverState>,
    event_sender: mpsc::UnboundedSender<DriverEvent>,
    event_receiver: Mutex<Option<mpsc::UnboundedReceiver<DriverEvent>>>,
}

pub(crate) fn found(address: &str, name: &str) -> FoundRecord {
    FoundRecord {
        address: Some(address.to_string()),
        name: Some(name.to_string()),
        rssi: Some(-50),
        transport: Transport::Classic,
    }
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        let (event_sender, event_receiver) = mpsc::unbounded();
        Arc::new(MockDriver {
            state: Mutex::new(DriverState {
                has_adapter: true,
                enabled: true,
                discovery_result: true,
                discovery_starts: 0,
                discovery_cancels: 0,
                nearby: vec![],
                connect_results: HashMap::new(),
                connect_delay: Duration::from_millis(100),
                connects: vec![],
                disconnect_result: true,
                disconnects: 0,
                written: vec![],
                write_calls: 0,
                write_failure: None,
            }),
            event_sender,
            event_receiver: Mutex::new(Some(event_receiver)),
        })
    }

    /// Reports an unsolicited driver event.
    pub fn emit(&self, event: DriverEvent) {
        let _ = self.event_sender.unbounded_send(event);
    }

    pub fn emit_found(&self, address: &str, name: &str) {
        self.emit(DriverEvent::DeviceFound(found(address, name)));
    }

    pub fn set_adapter(&self, present: bool) {
        self.state.lock().unwrap().has_adapter = present;
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.lock().unwrap().enabled = enabled;
    }

    /// Makes the adapter look powered off and reports it, as the OS would.
    pub fn power_off(&self) {
        self.set_enabled(false);
        self.emit(DriverEvent::StateChanged(NativeAdapterState::Android(10)));
    }

    pub fn set_discovery_result(&self, started: bool) {
        self.state.lock().unwrap().discovery_result = started;
    }

    /// Records reported every time discovery starts.
    pub fn set_nearby(&self, records: Vec<FoundRecord>) {
        self.state.lock().unwrap().nearby = records;
    }

    pub fn set_connect_result(&self, address: &str, result: std::result::Result<(), i64>) {
        self.state
            .lock()
            .unwrap()
            .connect_results
            .insert(address.to_string(), result);
    }

    pub fn set_disconnect_result(&self, closed: bool) {
        self.state.lock().unwrap().disconnect_result = closed;
    }

    /// Fails the `index`th write from now on, once.
    pub fn fail_write_at(&self, index: usize, error: DriverError) {
        let mut state = self.state.lock().unwrap();
        state.write_calls = 0;
        state.write_failure = Some((index, error));
    }

    pub fn discovery_starts(&self) -> usize {
        self.state.lock().unwrap().discovery_starts
    }

    pub fn discovery_cancels(&self) -> usize {
        self.state.lock().unwrap().discovery_cancels
    }

    pub fn connects(&self) -> Vec<String> {
        self.state.lock().unwrap().connects.clone()
    }

    pub fn disconnects(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().written.clone()
    }
}

#[async_trait]
impl RadioDriver for MockDriver {
    fn has_adapter(&self) -> bool {
        self.state.lock().unwrap().has_adapter
    }

    fn is_enabled(&self) -> bool {
        self.state.lock().unwrap().enabled
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = DriverEvent> + Send>> {
        match self.event_receiver.lock().unwrap().take() {
            Some(receiver) => Box::pin(receiver),
            None => Box::pin(stream::empty()),
        }
    }

    async fn start_discovery(&self) -> bool {
        let (started, nearby) = {
            let mut state = self.state.lock().unwrap();
            state.discovery_starts += 1;
            (state.discovery_result, state.nearby.clone())
        };
        if started {
            for record in nearby {
                self.emit(DriverEvent::DeviceFound(record));
            }
        }
        started
    }

    async fn cancel_discovery(&self) -> bool {
        self.state.lock().unwrap().discovery_cancels += 1;
        true
    }

    async fn connect(&self, address: &str) -> std::result::Result<(), i64> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.connects.push(address.to_string());
            state.connect_delay
        };
        time::sleep(delay).await;
        self.state
            .lock()
            .unwrap()
            .connect_results
            .get(address)
            .copied()
            .unwrap_or(Ok(()))
    }

    async fn disconnect(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.disconnect_result
    }

    async fn write(&self, data: &[u8]) -> std::result::Result<(), DriverError> {
        let mut state = self.state.lock().unwrap();
        let call = state.write_calls;
        state.write_calls += 1;
        if matches!(&state.write_failure, Some((index, _)) if *index == call) {
            if let Some((_, error)) = state.write_failure.take() {
                return Err(error);
            }
        }
        state.written.push(data.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Answer {
    Grant,
    Deny,
    Dismiss,
}

#[derive(Debug)]
pub(crate) struct MockPermissions {
    missing: Mutex<Vec<String>>,
    answer: Mutex<Answer>,
    requests: Mutex<usize>,
}

impl MockPermissions {
    pub fn granting() -> Self {
        Self::lacking(&[])
    }

    /// Starts with `permissions` missing. Requests grant them unless told
    /// otherwise.
    pub fn lacking(permissions: &[&str]) -> Self {
        MockPermissions {
            missing: Mutex::new(permissions.iter().map(|p| p.to_string()).collect()),
            answer: Mutex::new(Answer::Grant),
            requests: Mutex::new(0),
        }
    }

    pub fn deny(&self) {
        *self.answer.lock().unwrap() = Answer::Deny;
    }

    pub fn dismiss(&self) {
        *self.answer.lock().unwrap() = Answer::Dismiss;
    }

    pub fn request_count(&self) -> usize {
        *self.requests.lock().unwrap()
    }
}

#[async_trait]
impl PermissionUi for MockPermissions {
    fn missing(&self, required: &[String]) -> Vec<String> {
        let missing = self.missing.lock().unwrap();
        required
            .iter()
            .filter(|permission| missing.contains(permission))
            .cloned()
            .collect()
    }

    async fn request(&self, permissions: Vec<String>) -> Vec<PermissionGrant> {
        *self.requests.lock().unwrap() += 1;
        let answer = *self.answer.lock().unwrap();
        if answer == Answer::Dismiss {
            return vec![];
        }
        if answer == Answer::Grant {
            self.missing
                .lock()
                .unwrap()
                .retain(|permission| !permissions.contains(permission));
        }
        permissions
            .into_iter()
            .map(|permission| PermissionGrant {
                permission,
                granted: answer == Answer::Grant,
            })
            .collect()
    }
}

/// Records every notification it receives, in order.
#[derive(Debug, Default)]
pub(crate) struct RecordingListener {
    app_info: Option<String>,
    events: Mutex<Vec<PrinterEvent>>,
}

impl RecordingListener {
    pub fn new(app_info: &str) -> Arc<Self> {
        Arc::new(RecordingListener {
            app_info: Some(app_info.to_string()),
            events: Mutex::new(vec![]),
        })
    }

    /// A listener whose `app_info` fails.
    pub fn broken() -> Arc<Self> {
        Arc::new(RecordingListener::default())
    }

    pub fn events(&self) -> Vec<PrinterEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn finished_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| **event == PrinterEvent::DiscoveryFinished)
            .count()
    }

    pub fn found(&self) -> Vec<DiscoveredDevice> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PrinterEvent::DeviceFound(device) => Some(device),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<AdapterState> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PrinterEvent::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl HostListener for RecordingListener {
    async fn app_info(&self) -> Result<String> {
        self.app_info
            .clone()
            .ok_or_else(|| crate::Error::Host("no app info".to_string()))
    }

    fn on_ble_state_changed(&self, state: AdapterState) {
        self.events
            .lock()
            .unwrap()
            .push(PrinterEvent::StateChanged(state));
    }

    fn on_found(&self, device: &DiscoveredDevice) {
        self.events
            .lock()
            .unwrap()
            .push(PrinterEvent::DeviceFound(device.clone()));
    }

    fn on_discovery_finished(&self) {
        self.events
            .lock()
            .unwrap()
            .push(PrinterEvent::DiscoveryFinished);
    }
}
