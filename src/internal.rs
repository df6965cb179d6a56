// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The bridge's event loop.
//!
//! Every state change happens on this one task. Host requests, driver events
//! and the loop's own timers and task completions are funnelled into
//! [`BridgeInternal::wait_for_message`] and handled one at a time, so the
//! monitor, discovery and session state never need locks.

use crate::api::{
    DriverEvent, PermissionGrant, PermissionUi, PrinterEvent, RadioDriver, Session,
};
use crate::common::adapter_manager::AdapterManager;
use crate::config::BridgeConfig;
use crate::discovery::{DiscoveryCoordinator, ScanEnd};
use crate::monitor::{StateMonitor, StateSnapshot};
use crate::session::{BoolReply, LinkCompletion, LinkRequest, SessionManager};
use crate::Result;
use futures::stream::{Stream, StreamExt};
use log::{debug, trace, warn};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

pub(crate) type Loopback = mpsc::UnboundedSender<LoopbackMessage>;

/// Requests from [`crate::PrinterBridge`] handles.
#[derive(Debug)]
pub(crate) enum BridgeMessage {
    CheckState(oneshot::Sender<Result<()>>),
    StartScan(BoolReply),
    StopScan(BoolReply),
    Link(LinkRequest),
    Subscribe(oneshot::Sender<broadcast::Receiver<PrinterEvent>>),
    Session(oneshot::Sender<Option<Session>>),
    Detach(oneshot::Sender<()>),
}

/// Messages the loop sends itself from timers and spawned driver calls.
#[derive(Debug)]
pub(crate) enum LoopbackMessage {
    ScanExpired(u64),
    LookupExpired(u64),
    PermissionsSettled(Vec<PermissionGrant>),
    Link(LinkCompletion),
}

// Aggregate everything that can come in from different sources into a single
// enum type.
enum InternalLoopMessage {
    Driver(DriverEvent),
    Loopback(LoopbackMessage),
    Bridge(BridgeMessage),
    DriverClosed,
    // Every bridge handle is gone.
    LoopFinished,
}

pub(crate) struct BridgeInternal {
    driver: Arc<dyn RadioDriver>,
    manager: Arc<AdapterManager>,
    monitor: StateMonitor,
    discovery: DiscoveryCoordinator,
    sessions: SessionManager,
    loopback: Loopback,
    loopback_receiver: mpsc::UnboundedReceiver<LoopbackMessage>,
    message_receiver: mpsc::Receiver<BridgeMessage>,
    driver_events: Pin<Box<dyn Stream<Item = DriverEvent> + Send>>,
    driver_open: bool,
}

impl BridgeInternal {
    fn new(
        driver: Arc<dyn RadioDriver>,
        permission_ui: Arc<dyn PermissionUi>,
        config: &BridgeConfig,
        message_receiver: mpsc::Receiver<BridgeMessage>,
    ) -> Self {
        let manager = Arc::new(AdapterManager::new(config.event_capacity));
        let monitor = StateMonitor::new(config.required_permissions.clone(), permission_ui);
        monitor.initialize(driver.as_ref());
        let discovery = DiscoveryCoordinator::new(
            manager.clone(),
            config.scan_timeout,
            config.transport_filter,
        );
        let (loopback, loopback_receiver) = mpsc::unbounded_channel();
        let driver_events = driver.events();
        Self {
            driver,
            manager,
            monitor,
            discovery,
            sessions: SessionManager::new(config),
            loopback,
            loopback_receiver,
            message_receiver,
            driver_events,
            driver_open: true,
        }
    }

    /// Handles one message. Returns `false` once the loop should stop.
    pub async fn wait_for_message(&mut self) -> bool {
        // Driver events first, so a device reported before a request is
        // known by the time the request runs.
        let msg = tokio::select! {
            biased;
            event = self.driver_events.next(), if self.driver_open => match event {
                Some(event) => InternalLoopMessage::Driver(event),
                None => InternalLoopMessage::DriverClosed,
            },
            Some(message) = self.loopback_receiver.recv() => InternalLoopMessage::Loopback(message),
            message = self.message_receiver.recv() => match message {
                Some(message) => InternalLoopMessage::Bridge(message),
                None => InternalLoopMessage::LoopFinished,
            },
        };

        match msg {
            InternalLoopMessage::Driver(event) => self.on_driver_event(event).await,
            InternalLoopMessage::Loopback(message) => self.on_loopback(message).await,
            InternalLoopMessage::Bridge(BridgeMessage::Detach(reply)) => {
                self.shutdown().await;
                let _ = reply.send(());
                return false;
            }
            InternalLoopMessage::Bridge(message) => self.on_bridge_message(message).await,
            InternalLoopMessage::DriverClosed => {
                warn!("Driver event stream ended");
                self.driver_open = false;
            }
            InternalLoopMessage::LoopFinished => {
                debug!("All bridge handles dropped");
                self.shutdown().await;
                return false;
            }
        }
        true
    }

    async fn on_driver_event(&mut self, event: DriverEvent) {
        trace!("Driver event {:?}", event);
        match event {
            DriverEvent::StateChanged(native) => {
                self.monitor.on_native_state(native, &self.manager);
                self.discovery
                    .on_adapter_state_changed(self.driver.as_ref())
                    .await;
                self.sessions
                    .on_adapter_state_changed(&mut self.discovery, &self.driver, &self.loopback)
                    .await;
            }
            DriverEvent::DeviceFound(record) => {
                if let Some(device) = self.discovery.admit(record) {
                    self.discovery.on_device_found(&device);
                    self.sessions
                        .on_device_seen(&device, &mut self.discovery, &self.driver, &self.loopback)
                        .await;
                }
            }
            DriverEvent::LinkLost => self.sessions.on_link_lost(),
            DriverEvent::Received(data) => {
                debug!("Printer sent {} bytes", data.len());
            }
        }
    }

    async fn on_loopback(&mut self, message: LoopbackMessage) {
        trace!("Loopback {:?}", message);
        match message {
            LoopbackMessage::ScanExpired(generation) => {
                self.discovery
                    .on_scan_expired(generation, self.driver.as_ref())
                    .await
            }
            LoopbackMessage::LookupExpired(generation) => {
                self.sessions
                    .on_lookup_expired(generation, &mut self.discovery, &self.driver, &self.loopback)
                    .await
            }
            LoopbackMessage::PermissionsSettled(grants) => {
                self.monitor
                    .on_permissions_settled(grants, self.driver.as_ref(), &self.manager);
            }
            LoopbackMessage::Link(completion) => {
                self.sessions
                    .on_completion(completion, &mut self.discovery, &self.driver, &self.loopback)
                    .await
            }
        }
    }

    async fn on_bridge_message(&mut self, message: BridgeMessage) {
        trace!("Bridge message {:?}", message);
        match message {
            BridgeMessage::CheckState(reply) => {
                let state = self
                    .monitor
                    .check(self.driver.as_ref(), &self.manager, &self.loopback);
                trace!("Adapter state checked: {:?}", state);
                let _ = reply.send(Ok(()));
            }
            BridgeMessage::StartScan(reply) => {
                let started = self
                    .discovery
                    .start_scan(self.driver.as_ref(), &self.loopback)
                    .await;
                let _ = reply.send(started);
            }
            BridgeMessage::StopScan(reply) => {
                let stopped = self.discovery.stop_scan(self.driver.as_ref()).await;
                let _ = reply.send(stopped);
            }
            BridgeMessage::Link(request) => {
                self.sessions
                    .submit(request, &mut self.discovery, &self.driver, &self.loopback)
                    .await
            }
            BridgeMessage::Subscribe(reply) => {
                let _ = reply.send(self.manager.subscribe());
            }
            BridgeMessage::Session(reply) => {
                let _ = reply.send(self.sessions.session());
            }
            // Handled by wait_for_message.
            BridgeMessage::Detach(_) => {}
        }
    }

    async fn shutdown(&mut self) {
        debug!("Bridge loop shutting down");
        if self.discovery.is_scanning() {
            self.driver.cancel_discovery().await;
            self.discovery.finish(ScanEnd::Detached);
        }
        self.sessions.detach();
        // Requests that raced the detach see the same outcome.
        self.message_receiver.close();
        while let Ok(message) = self.message_receiver.try_recv() {
            drop(message);
        }
    }
}

/// Handles to a running loop.
pub(crate) struct BridgeLoop {
    pub sender: mpsc::Sender<BridgeMessage>,
    pub snapshot: StateSnapshot,
    /// Subscribed before the loop starts, so it sees every event.
    pub events: broadcast::Receiver<PrinterEvent>,
}

/// Spawns the loop on the current runtime.
pub(crate) fn run_bridge_loop(
    driver: Arc<dyn RadioDriver>,
    permission_ui: Arc<dyn PermissionUi>,
    config: &BridgeConfig,
) -> BridgeLoop {
    let (sender, receiver) = mpsc::channel::<BridgeMessage>(256);
    let mut internal = BridgeInternal::new(driver, permission_ui, config, receiver);
    let handles = BridgeLoop {
        sender,
        snapshot: internal.monitor.snapshot(),
        events: internal.manager.subscribe(),
    };
    tokio::spawn(async move {
        loop {
            if !internal.wait_for_message().await {
                break;
            }
        }
        trace!("Bridge loop finished");
    });
    handles
}
