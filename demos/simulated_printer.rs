// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Walks through a scan, connect and print against a simulated printer.
//!
//! Run with `RUST_LOG=printplug=debug cargo run --example simulated_printer`.

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::{self, Stream, StreamExt};
use printplug::api::{
    AdapterState, DiscoveredDevice, DriverError, DriverEvent, FoundRecord, HostListener,
    PrinterHost, RadioDriver, Transport,
};
use printplug::platform::PlatformInfo;
use printplug::{BridgeConfig, Collaborators, PrinterBridge};
use rand::Rng;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time;

const PRINTER_ADDRESS: &str = "00:11:22:33:44:55";

#[derive(Debug)]
struct SimulatedDriver {
    events: mpsc::UnboundedSender<DriverEvent>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<DriverEvent>>>,
}

impl SimulatedDriver {
    fn new() -> Arc<Self> {
        let (events, receiver) = mpsc::unbounded();
        Arc::new(SimulatedDriver {
            events,
            receiver: Mutex::new(Some(receiver)),
        })
    }

    fn report(&self, address: &str, name: &str, transport: Transport) {
        let _ = self
            .events
            .unbounded_send(DriverEvent::DeviceFound(FoundRecord {
                address: Some(address.to_string()),
                name: Some(name.to_string()),
                rssi: Some(rand::rng().random_range(-80..-40)),
                transport,
            }));
    }
}

#[async_trait]
impl RadioDriver for SimulatedDriver {
    fn has_adapter(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        true
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = DriverEvent> + Send>> {
        match self.receiver.lock().unwrap().take() {
            Some(receiver) => Box::pin(receiver),
            None => Box::pin(stream::empty()),
        }
    }

    async fn start_discovery(&self) -> bool {
        self.report(PRINTER_ADDRESS, "QR-386A", Transport::Classic);
        self.report("66:77:88:99:AA:BB", "Fitness Band", Transport::Le);
        true
    }

    async fn cancel_discovery(&self) -> bool {
        true
    }

    async fn connect(&self, address: &str) -> Result<(), i64> {
        time::sleep(Duration::from_millis(300)).await;
        if address == PRINTER_ADDRESS {
            Ok(())
        } else {
            Err(-1)
        }
    }

    async fn disconnect(&self) -> bool {
        true
    }

    async fn write(&self, data: &[u8]) -> Result<(), DriverError> {
        println!("printer <- {} bytes: {:02X?}", data.len(), data);
        Ok(())
    }
}

struct ConsoleListener;

#[async_trait]
impl HostListener for ConsoleListener {
    async fn app_info(&self) -> printplug::Result<String> {
        Ok("simulated_printer 0.1".to_string())
    }

    fn on_ble_state_changed(&self, state: AdapterState) {
        println!("adapter state: {:?} ({})", state, state.code());
    }

    fn on_found(&self, device: &DiscoveredDevice) {
        println!(
            "found {} at {} (rssi {:?})",
            device.name, device.address, device.rssi
        );
    }

    fn on_discovery_finished(&self) {
        println!("discovery finished");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let driver = SimulatedDriver::new();
    let config = BridgeConfig {
        scan_timeout: Duration::from_secs(3),
        platform: PlatformInfo::new("Linux", "simulated"),
        ..BridgeConfig::default()
    };
    let bridge = PrinterBridge::attach(
        Collaborators::new(driver).with_listener(Arc::new(ConsoleListener)),
        config,
    )?;
    let mut events = bridge.events().await?;

    println!("host: {}", bridge.get_host_info().await?);
    bridge.check_ble_state().await?;

    bridge.start_scan().await?;
    while let Some(event) = events.next().await {
        if event == printplug::api::PrinterEvent::DiscoveryFinished {
            break;
        }
    }

    let status = bridge.connect(PRINTER_ADDRESS).await?;
    println!("connect: {}", status);
    if status.is_connected() {
        let sent = bridge
            .send_command(
                PRINTER_ADDRESS,
                "! 0 200 200 210 1\t\nTEXT 4 0 30 40 Hello printplug\t\nPRINT",
            )
            .await?;
        println!("sent: {}", sent);
        bridge.disconnect(PRINTER_ADDRESS).await?;
    }

    bridge.detach().await?;
    Ok(())
}
