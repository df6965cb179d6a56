// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Adapter state monitoring, with runtime permissions folded in.

use crate::api::{
    AdapterState, NativeAdapterState, PermissionGrant, PermissionUi, PrinterEvent, RadioDriver,
};
use crate::common::adapter_manager::AdapterManager;
use crate::internal::{Loopback, LoopbackMessage};
use log::{debug, trace};
use std::convert::TryFrom;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

// android.bluetooth.BluetoothAdapter
const ANDROID_STATE_OFF: i32 = 10;
const ANDROID_STATE_TURNING_ON: i32 = 11;
const ANDROID_STATE_ON: i32 = 12;
const ANDROID_STATE_TURNING_OFF: i32 = 13;

impl From<NativeAdapterState> for AdapterState {
    fn from(native: NativeAdapterState) -> Self {
        match native {
            NativeAdapterState::Android(state) => match state {
                ANDROID_STATE_ON => AdapterState::PoweredOn,
                ANDROID_STATE_OFF => AdapterState::PoweredOff,
                ANDROID_STATE_TURNING_ON | ANDROID_STATE_TURNING_OFF => AdapterState::Resetting,
                _ => AdapterState::Unsupported,
            },
            // CBManagerState values line up with ours, except that unknown
            // (0) and unsupported (2) both collapse to Unsupported.
            NativeAdapterState::CoreBluetooth(state) => u8::try_from(state)
                .ok()
                .and_then(|code| AdapterState::try_from(code).ok())
                .unwrap_or(AdapterState::Unsupported),
        }
    }
}

/// Lock-free view of the monitor's current value, shared with the bridge.
#[derive(Debug, Clone)]
pub(crate) struct StateSnapshot(Arc<AtomicU8>);

impl StateSnapshot {
    pub fn new(state: AdapterState) -> Self {
        StateSnapshot(Arc::new(AtomicU8::new(state.code())))
    }

    pub fn load(&self) -> AdapterState {
        AdapterState::try_from(self.0.load(Ordering::Acquire)).unwrap_or_default()
    }

    fn store(&self, state: AdapterState) {
        self.0.store(state.code(), Ordering::Release);
    }
}

#[derive(Debug)]
pub(crate) struct StateMonitor {
    snapshot: StateSnapshot,
    required_permissions: Vec<String>,
    permission_ui: Arc<dyn PermissionUi>,
    permission_request_pending: bool,
}

impl StateMonitor {
    pub fn new(required_permissions: Vec<String>, permission_ui: Arc<dyn PermissionUi>) -> Self {
        Self {
            snapshot: StateSnapshot::new(AdapterState::Unsupported),
            required_permissions,
            permission_ui,
            permission_request_pending: false,
        }
    }

    /// Seeds the snapshot from the driver without notifying anyone.
    pub fn initialize(&self, driver: &dyn RadioDriver) {
        self.snapshot.store(self.evaluate(driver));
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.snapshot.clone()
    }

    #[cfg(test)]
    pub fn current(&self) -> AdapterState {
        self.snapshot.load()
    }

    fn permissions_missing(&self) -> Vec<String> {
        if self.required_permissions.is_empty() {
            return vec![];
        }
        self.permission_ui.missing(&self.required_permissions)
    }

    fn evaluate(&self, driver: &dyn RadioDriver) -> AdapterState {
        if !driver.has_adapter() {
            AdapterState::Unsupported
        } else if !self.permissions_missing().is_empty() {
            AdapterState::Unauthorized
        } else {
            power_state(driver)
        }
    }

    fn publish(&self, state: AdapterState, manager: &AdapterManager) {
        let previous = self.snapshot.load();
        if previous != state {
            debug!("Adapter state {:?} -> {:?}", previous, state);
        }
        self.snapshot.store(state);
        manager.emit(PrinterEvent::StateChanged(state));
    }

    /// Reports the current state, prompting for missing permissions. The
    /// answer to the prompt comes back later as
    /// [`LoopbackMessage::PermissionsSettled`].
    pub fn check(
        &mut self,
        driver: &dyn RadioDriver,
        manager: &AdapterManager,
        loopback: &Loopback,
    ) -> AdapterState {
        if !driver.has_adapter() {
            self.publish(AdapterState::Unsupported, manager);
            return AdapterState::Unsupported;
        }
        let missing = self.permissions_missing();
        if missing.is_empty() {
            let state = power_state(driver);
            self.publish(state, manager);
            return state;
        }
        self.publish(AdapterState::Unauthorized, manager);
        if self.permission_request_pending {
            trace!("Permission request already in flight");
        } else {
            debug!("Requesting permissions {:?}", missing);
            self.permission_request_pending = true;
            let permission_ui = self.permission_ui.clone();
            let loopback = loopback.clone();
            tokio::spawn(async move {
                let grants = permission_ui.request(missing).await;
                // The loop may already be gone.
                let _ = loopback.send(LoopbackMessage::PermissionsSettled(grants));
            });
        }
        AdapterState::Unauthorized
    }

    pub fn on_native_state(
        &mut self,
        native: NativeAdapterState,
        manager: &AdapterManager,
    ) -> AdapterState {
        let state = if self.permissions_missing().is_empty() {
            AdapterState::from(native)
        } else {
            AdapterState::Unauthorized
        };
        trace!("Native adapter state {:?} reported as {:?}", native, state);
        self.publish(state, manager);
        state
    }

    /// Returns the re-evaluated state, or `None` if the prompt was dismissed
    /// without an answer.
    pub fn on_permissions_settled(
        &mut self,
        grants: Vec<PermissionGrant>,
        driver: &dyn RadioDriver,
        manager: &AdapterManager,
    ) -> Option<AdapterState> {
        self.permission_request_pending = false;
        if grants.is_empty() {
            debug!("Permission prompt returned no answers");
            return None;
        }
        let state = if let Some(denied) = grants.iter().find(|grant| !grant.granted) {
            debug!("Permission {} denied", denied.permission);
            AdapterState::Unauthorized
        } else if driver.has_adapter() {
            power_state(driver)
        } else {
            AdapterState::Unsupported
        };
        self.publish(state, manager);
        Some(state)
    }
}

fn power_state(driver: &dyn RadioDriver) -> AdapterState {
    if driver.is_enabled() {
        AdapterState::PoweredOn
    } else {
        AdapterState::PoweredOff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDriver, MockPermissions};
    use tokio::sync::mpsc;

    #[test]
    fn android_states() {
        let map = |s| AdapterState::from(NativeAdapterState::Android(s));
        assert_eq!(map(12), AdapterState::PoweredOn);
        assert_eq!(map(10), AdapterState::PoweredOff);
        assert_eq!(map(11), AdapterState::Resetting);
        assert_eq!(map(13), AdapterState::Resetting);
        assert_eq!(map(0), AdapterState::Unsupported);
    }

    #[test]
    fn core_bluetooth_states() {
        let map = |s| AdapterState::from(NativeAdapterState::CoreBluetooth(s));
        assert_eq!(map(0), AdapterState::Unsupported);
        assert_eq!(map(1), AdapterState::Resetting);
        assert_eq!(map(2), AdapterState::Unsupported);
        assert_eq!(map(3), AdapterState::Unauthorized);
        assert_eq!(map(4), AdapterState::PoweredOff);
        assert_eq!(map(5), AdapterState::PoweredOn);
        assert_eq!(map(-1), AdapterState::Unsupported);
        assert_eq!(map(300), AdapterState::Unsupported);
    }

    #[test]
    fn missing_permissions_mask_native_state() {
        let permissions = Arc::new(MockPermissions::lacking(&["scan"]));
        let mut monitor = StateMonitor::new(vec!["scan".into()], permissions);
        let manager = AdapterManager::new(8);
        let state = monitor.on_native_state(NativeAdapterState::Android(12), &manager);
        assert_eq!(state, AdapterState::Unauthorized);
        assert_eq!(monitor.current(), AdapterState::Unauthorized);
    }

    #[tokio::test]
    async fn check_prompts_once_and_settles() {
        let driver = MockDriver::new();
        let permissions = Arc::new(MockPermissions::lacking(&["scan"]));
        let mut monitor = StateMonitor::new(vec!["scan".into()], permissions.clone());
        let manager = AdapterManager::new(8);
        let (loopback, mut loopback_rx) = mpsc::unbounded_channel();

        assert_eq!(
            monitor.check(driver.as_ref(), &manager, &loopback),
            AdapterState::Unauthorized
        );
        assert_eq!(
            monitor.check(driver.as_ref(), &manager, &loopback),
            AdapterState::Unauthorized
        );
        let grants = match loopback_rx.recv().await {
            Some(LoopbackMessage::PermissionsSettled(grants)) => grants,
            other => panic!("unexpected loopback message {:?}", other),
        };
        assert_eq!(permissions.request_count(), 1);

        assert_eq!(
            monitor.on_permissions_settled(grants, driver.as_ref(), &manager),
            Some(AdapterState::PoweredOn)
        );
        assert_eq!(monitor.current(), AdapterState::PoweredOn);
    }

    #[test]
    fn denial_and_dismissal() {
        let driver = MockDriver::new();
        let mut monitor = StateMonitor::new(vec![], Arc::new(MockPermissions::granting()));
        let manager = AdapterManager::new(8);
        monitor.initialize(driver.as_ref());
        assert_eq!(monitor.current(), AdapterState::PoweredOn);

        assert_eq!(
            monitor.on_permissions_settled(vec![], driver.as_ref(), &manager),
            None
        );
        let denied = vec![
            PermissionGrant {
                permission: "scan".into(),
                granted: true,
            },
            PermissionGrant {
                permission: "connect".into(),
                granted: false,
            },
        ];
        assert_eq!(
            monitor.on_permissions_settled(denied, driver.as_ref(), &manager),
            Some(AdapterState::Unauthorized)
        );
    }

    #[test]
    fn no_adapter_is_unsupported() {
        let driver = MockDriver::new();
        driver.set_adapter(false);
        let mut monitor = StateMonitor::new(vec![], Arc::new(MockPermissions::granting()));
        let manager = AdapterManager::new(8);
        let (loopback, _loopback_rx) = mpsc::unbounded_channel();
        assert_eq!(
            monitor.check(driver.as_ref(), &manager, &loopback),
            AdapterState::Unsupported
        );
    }
}
