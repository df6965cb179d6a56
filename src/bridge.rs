// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::api::{
    AdapterState, ConnectStatus, GrantAll, HostListener, PermissionUi, PrinterEvent, PrinterHost,
    RadioDriver, Session,
};
use crate::common::adapter_manager::into_event_stream;
use crate::config::BridgeConfig;
use crate::internal::{run_bridge_loop, BridgeMessage};
use crate::monitor::StateSnapshot;
use crate::platform::PlatformInfo;
use crate::session::LinkRequest;
use crate::{Error, Result};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use log::trace;
use std::fmt::{self, Debug, Formatter};
use std::pin::Pin;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, oneshot};

/// The platform pieces a bridge is attached to.
#[derive(Clone)]
pub struct Collaborators {
    driver: Arc<dyn RadioDriver>,
    permission_ui: Arc<dyn PermissionUi>,
    listener: Option<Arc<dyn HostListener>>,
}

impl Collaborators {
    /// Collaborators for a platform without runtime permissions and without a
    /// listener.
    pub fn new(driver: Arc<dyn RadioDriver>) -> Self {
        Self {
            driver,
            permission_ui: Arc::new(GrantAll),
            listener: None,
        }
    }

    pub fn with_permission_ui(mut self, permission_ui: Arc<dyn PermissionUi>) -> Self {
        self.permission_ui = permission_ui;
        self
    }

    /// Notifications are forwarded to `listener` in emission order.
    pub fn with_listener(mut self, listener: Arc<dyn HostListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl Debug for Collaborators {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("driver", &self.driver)
            .field("permission_ui", &self.permission_ui)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Handle to an attached printer bridge.
///
/// Handles are cheap to clone and all talk to the same event loop. The loop
/// stops on [`PrinterBridge::detach`] or once every handle is dropped.
#[derive(Clone)]
pub struct PrinterBridge {
    sender: mpsc::Sender<BridgeMessage>,
    state: StateSnapshot,
    listener: Option<Arc<dyn HostListener>>,
    platform: PlatformInfo,
}

impl Debug for PrinterBridge {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("PrinterBridge")
            .field("state", &self.state.load())
            .field("platform", &self.platform)
            .field("detached", &self.sender.is_closed())
            .finish()
    }
}

impl PrinterBridge {
    /// Starts the bridge on the current tokio runtime.
    pub fn attach(collaborators: Collaborators, config: BridgeConfig) -> Result<Self> {
        Handle::try_current().map_err(|_| Error::RuntimeUnavailable)?;
        let Collaborators {
            driver,
            permission_ui,
            listener,
        } = collaborators;
        let handles = run_bridge_loop(driver, permission_ui, &config);
        if let Some(listener) = &listener {
            forward_events(listener.clone(), handles.events);
        }
        Ok(Self {
            sender: handles.sender,
            state: handles.snapshot,
            listener,
            platform: config.platform,
        })
    }

    /// Stops the bridge. A running scan is finished, timers are disarmed and
    /// requests still waiting fail with [`Error::Detached`]. An open printer
    /// link is left as it is.
    pub async fn detach(&self) -> Result<()> {
        self.request(BridgeMessage::Detach).await
    }

    /// Last adapter state published by the bridge.
    pub fn adapter_state(&self) -> AdapterState {
        self.state.load()
    }

    pub async fn session(&self) -> Result<Option<Session>> {
        self.request(BridgeMessage::Session).await
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> BridgeMessage,
    ) -> Result<T> {
        let (reply, receiver) = oneshot::channel();
        self.sender.send(message(reply)).await?;
        Ok(receiver.await?)
    }
}

fn forward_events(listener: Arc<dyn HostListener>, receiver: broadcast::Receiver<PrinterEvent>) {
    let mut events = into_event_stream(receiver);
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                PrinterEvent::StateChanged(state) => listener.on_ble_state_changed(state),
                PrinterEvent::DeviceFound(device) => listener.on_found(&device),
                PrinterEvent::DiscoveryFinished => listener.on_discovery_finished(),
            }
        }
        trace!("Listener forwarding finished");
    });
}

#[async_trait]
impl PrinterHost for PrinterBridge {
    async fn get_host_info(&self) -> Result<String> {
        if self.sender.is_closed() {
            return Err(Error::Detached);
        }
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| Error::Host("no host listener attached".to_string()))?;
        let app_info = listener.app_info().await?;
        Ok(format!("{}-{}", app_info, self.platform))
    }

    async fn check_ble_state(&self) -> Result<()> {
        self.request(BridgeMessage::CheckState).await?
    }

    async fn start_scan(&self) -> Result<bool> {
        self.request(BridgeMessage::StartScan).await?
    }

    async fn stop_scan(&self) -> Result<bool> {
        self.request(BridgeMessage::StopScan).await?
    }

    async fn connect(&self, address: &str) -> Result<ConnectStatus> {
        self.request(|reply| {
            BridgeMessage::Link(LinkRequest::Connect {
                address: address.to_string(),
                reply,
            })
        })
        .await?
    }

    async fn disconnect(&self, address: &str) -> Result<bool> {
        self.request(|reply| {
            BridgeMessage::Link(LinkRequest::Disconnect {
                address: address.to_string(),
                reply,
            })
        })
        .await?
    }

    async fn send_command(&self, address: &str, command: &str) -> Result<bool> {
        self.request(|reply| {
            BridgeMessage::Link(LinkRequest::Send {
                address: address.to_string(),
                payload: command.to_string(),
                reply,
            })
        })
        .await?
    }

    async fn events(&self) -> Result<Pin<Box<dyn Stream<Item = PrinterEvent> + Send>>> {
        let receiver = self.request(BridgeMessage::Subscribe).await?;
        Ok(into_event_stream(receiver))
    }
}
