// printplug Source Code File
//
// Copyright 2024 Nonpolynomial Labs LLC. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The single printer link.
//!
//! Connect, disconnect and send requests are queued and run one at a time
//! against the link. Slow driver calls run on their own task and report back
//! through the loop as a [`LinkCompletion`], which carries the request's
//! reply channel so that each request is answered exactly once, after the
//! session state has been updated.

use crate::api::{ConnectStatus, DiscoveredDevice, DriverError, RadioDriver, Session, SessionState};
use crate::common::util::split_command;
use crate::config::BridgeConfig;
use crate::discovery::{DiscoveryCoordinator, ScanEnd};
use crate::internal::{Loopback, LoopbackMessage};
use crate::{Error, Result};
use log::{debug, info, trace, warn};
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;

pub(crate) type ConnectReply = oneshot::Sender<Result<ConnectStatus>>;
pub(crate) type BoolReply = oneshot::Sender<Result<bool>>;

#[derive(Debug)]
pub(crate) enum LinkRequest {
    Connect {
        address: String,
        reply: ConnectReply,
    },
    Disconnect {
        address: String,
        reply: BoolReply,
    },
    Send {
        address: String,
        payload: String,
        reply: BoolReply,
    },
}

impl LinkRequest {
    fn address(&self) -> &str {
        match self {
            LinkRequest::Connect { address, .. }
            | LinkRequest::Disconnect { address, .. }
            | LinkRequest::Send { address, .. } => address,
        }
    }

    fn fail(self, error: Error) {
        match self {
            LinkRequest::Connect { reply, .. } => respond(reply, Err(error)),
            LinkRequest::Disconnect { reply, .. } | LinkRequest::Send { reply, .. } => {
                respond(reply, Err(error))
            }
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum SendOutcome {
    Written,
    Failed,
    LinkLost,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum ConnectOutcome {
    Opened,
    /// The driver's raw failure code.
    Failed(i64),
    /// The previous link could not be closed, so the new one was not opened.
    PreviousKept,
}

#[derive(Debug)]
pub(crate) enum LinkCompletion {
    Connect {
        address: String,
        outcome: ConnectOutcome,
        reply: ConnectReply,
    },
    Disconnect {
        closed: bool,
        reply: BoolReply,
    },
    Send {
        outcome: SendOutcome,
        reply: BoolReply,
    },
}

/// A connect waiting for its printer to show up in discovery.
#[derive(Debug)]
struct PendingLookup {
    address: String,
    reply: ConnectReply,
    generation: u64,
    timer: JoinHandle<()>,
    started_discovery: bool,
}

#[derive(Debug)]
pub(crate) struct SessionManager {
    active: Option<Session>,
    /// The link that was up when the running connect started. It is restored
    /// if that connect never gets to close it.
    previous: Option<Session>,
    queue: VecDeque<LinkRequest>,
    /// A link operation or lookup is in flight.
    busy: bool,
    lookup: Option<PendingLookup>,
    next_lookup: u64,
    lookup_timeout: Duration,
    implicit_discovery: bool,
    text_encoding: String,
    line_delimiter: String,
}

fn respond<T: Debug>(reply: oneshot::Sender<T>, value: T) {
    if let Err(value) = reply.send(value) {
        debug!("Caller went away before receiving {:?}", value);
    }
}

impl SessionManager {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            active: None,
            previous: None,
            queue: VecDeque::new(),
            busy: false,
            lookup: None,
            next_lookup: 0,
            lookup_timeout: config.scan_timeout,
            implicit_discovery: config.implicit_discovery,
            text_encoding: config.text_encoding.clone(),
            line_delimiter: config.line_delimiter.clone(),
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.active.clone()
    }

    fn is_connected_to(&self, address: &str) -> bool {
        self.active
            .as_ref()
            .map_or(false, |session| session.is_connected_to(address))
    }

    pub async fn submit(
        &mut self,
        request: LinkRequest,
        discovery: &mut DiscoveryCoordinator,
        driver: &Arc<dyn RadioDriver>,
        loopback: &Loopback,
    ) {
        if request.address().is_empty() {
            request.fail(Error::InvalidArgument("address is empty".to_string()));
            return;
        }
        self.queue.push_back(request);
        self.pump(discovery, driver, loopback).await;
    }

    async fn pump(
        &mut self,
        discovery: &mut DiscoveryCoordinator,
        driver: &Arc<dyn RadioDriver>,
        loopback: &Loopback,
    ) {
        while !self.busy {
            let request = match self.queue.pop_front() {
                Some(request) => request,
                None => return,
            };
            trace!("Running {:?}", request);
            match request {
                LinkRequest::Connect { address, reply } => {
                    self.begin_connect(address, reply, discovery, driver, loopback)
                        .await
                }
                LinkRequest::Disconnect { address, reply } => {
                    if !self.is_connected_to(&address) {
                        debug!("Not disconnecting {}: not the active printer", address);
                        respond(reply, Ok(false));
                        continue;
                    }
                    self.busy = true;
                    let driver = driver.clone();
                    let loopback = loopback.clone();
                    tokio::spawn(async move {
                        let closed = driver.disconnect().await;
                        let _ = loopback.send(LoopbackMessage::Link(LinkCompletion::Disconnect {
                            closed,
                            reply,
                        }));
                    });
                }
                LinkRequest::Send {
                    address,
                    payload,
                    reply,
                } => {
                    if !self.is_connected_to(&address) {
                        respond(reply, Err(Error::NotConnected(address)));
                        continue;
                    }
                    self.busy = true;
                    let chunks = split_command(&payload, &self.line_delimiter);
                    let encoding = self.text_encoding.clone();
                    let driver = driver.clone();
                    let loopback = loopback.clone();
                    tokio::spawn(async move {
                        let outcome = write_chunks(driver.as_ref(), &chunks, &encoding).await;
                        let _ = loopback.send(LoopbackMessage::Link(LinkCompletion::Send {
                            outcome,
                            reply,
                        }));
                    });
                }
            }
        }
    }

    async fn begin_connect(
        &mut self,
        address: String,
        reply: ConnectReply,
        discovery: &mut DiscoveryCoordinator,
        driver: &Arc<dyn RadioDriver>,
        loopback: &Loopback,
    ) {
        if self.is_connected_to(&address) {
            debug!("Already connected to {}", address);
            respond(reply, Ok(ConnectStatus::Connected));
            return;
        }
        if !driver.has_adapter() {
            warn!("No adapter, cannot connect to {}", address);
            respond(reply, Ok(ConnectStatus::Unavailable));
            return;
        }
        self.busy = true;
        self.previous = self
            .active
            .replace(Session {
                address: address.clone(),
                state: SessionState::Connecting,
            })
            .filter(|session| session.state == SessionState::Connected);
        if !self.implicit_discovery || discovery.contains(&address) {
            self.spawn_connect(address, reply, driver, loopback);
            return;
        }

        debug!("{} not discovered yet, looking for it first", address);
        let started_discovery = if discovery.is_scanning() {
            false
        } else {
            driver.start_discovery().await
        };
        self.next_lookup += 1;
        let generation = self.next_lookup;
        let timeout = self.lookup_timeout;
        let timer_loopback = loopback.clone();
        let timer = tokio::spawn(async move {
            time::sleep(timeout).await;
            let _ = timer_loopback.send(LoopbackMessage::LookupExpired(generation));
        });
        self.lookup = Some(PendingLookup {
            address,
            reply,
            generation,
            timer,
            started_discovery,
        });
    }

    /// Called for every admitted device, whether or not a scan is running.
    pub async fn on_device_seen(
        &mut self,
        device: &DiscoveredDevice,
        discovery: &mut DiscoveryCoordinator,
        driver: &Arc<dyn RadioDriver>,
        loopback: &Loopback,
    ) {
        let matches = self
            .lookup
            .as_ref()
            .map_or(false, |lookup| lookup.address == device.address);
        if !matches {
            return;
        }
        if let Some(lookup) = self.lookup.take() {
            lookup.timer.abort();
            debug!("Found {} during lookup, connecting", lookup.address);
            driver.cancel_discovery().await;
            discovery.finish(ScanEnd::Connecting);
            self.spawn_connect(lookup.address, lookup.reply, driver, loopback);
        }
    }

    pub async fn on_lookup_expired(
        &mut self,
        generation: u64,
        discovery: &mut DiscoveryCoordinator,
        driver: &Arc<dyn RadioDriver>,
        loopback: &Loopback,
    ) {
        match &self.lookup {
            Some(lookup) if lookup.generation == generation => {
                debug!("{} was not found nearby", lookup.address);
                self.fail_lookup(discovery, driver.as_ref()).await;
                self.pump(discovery, driver, loopback).await;
            }
            _ => trace!("Ignoring expiry of settled lookup {}", generation),
        }
    }

    /// The adapter toggled; a pending lookup cannot succeed any more.
    pub async fn on_adapter_state_changed(
        &mut self,
        discovery: &mut DiscoveryCoordinator,
        driver: &Arc<dyn RadioDriver>,
        loopback: &Loopback,
    ) {
        if self.lookup.is_some() {
            debug!("Adapter changed during lookup");
            self.fail_lookup(discovery, driver.as_ref()).await;
            self.pump(discovery, driver, loopback).await;
        }
    }

    async fn fail_lookup(&mut self, discovery: &DiscoveryCoordinator, driver: &dyn RadioDriver) {
        if let Some(lookup) = self.lookup.take() {
            lookup.timer.abort();
            if lookup.started_discovery && !discovery.is_scanning() {
                driver.cancel_discovery().await;
            }
            self.active = self.previous.take();
            self.busy = false;
            respond(lookup.reply, Ok(ConnectStatus::Unavailable));
        }
    }

    /// The single physical link dropped. While a connect is pending, that is
    /// the link the connect was going to replace.
    pub fn on_link_lost(&mut self) {
        match &self.active {
            Some(session) if session.state == SessionState::Connected => {
                info!("Link to {} lost", session.address);
                self.active = None;
            }
            _ => match self.previous.take() {
                Some(previous) => info!("Link to {} lost during connect", previous.address),
                None => trace!("Link loss reported without a connected printer"),
            },
        }
    }

    pub async fn on_completion(
        &mut self,
        completion: LinkCompletion,
        discovery: &mut DiscoveryCoordinator,
        driver: &Arc<dyn RadioDriver>,
        loopback: &Loopback,
    ) {
        self.busy = false;
        match completion {
            LinkCompletion::Connect {
                address,
                outcome,
                reply,
            } => match outcome {
                ConnectOutcome::Opened => {
                    info!("Connected to {}", address);
                    self.previous = None;
                    self.active = Some(Session {
                        address,
                        state: SessionState::Connected,
                    });
                    respond(reply, Ok(ConnectStatus::Connected));
                }
                ConnectOutcome::Failed(code) => {
                    info!("Connecting to {} failed with {}", address, code);
                    self.previous = None;
                    self.active = None;
                    respond(reply, Ok(ConnectStatus::Failed(code)));
                }
                ConnectOutcome::PreviousKept => {
                    info!("Not connecting to {}: previous link still open", address);
                    self.active = self.previous.take();
                    respond(reply, Ok(ConnectStatus::Unavailable));
                }
            },
            LinkCompletion::Disconnect { closed, reply } => {
                if closed {
                    if let Some(session) = self.active.take() {
                        info!("Disconnected from {}", session.address);
                    }
                } else {
                    warn!("Driver failed to close the link");
                }
                respond(reply, Ok(closed));
            }
            LinkCompletion::Send { outcome, reply } => {
                if outcome == SendOutcome::LinkLost {
                    self.on_link_lost();
                }
                respond(reply, Ok(outcome == SendOutcome::Written));
            }
        }
        self.pump(discovery, driver, loopback).await;
    }

    /// Opens the link to `address`, closing the previous link first. If the
    /// previous link refuses to close, the new one is not opened.
    fn spawn_connect(
        &self,
        address: String,
        reply: ConnectReply,
        driver: &Arc<dyn RadioDriver>,
        loopback: &Loopback,
    ) {
        let previous = self.previous.as_ref().map(|session| session.address.clone());
        let driver = driver.clone();
        let loopback = loopback.clone();
        tokio::spawn(async move {
            let released = match &previous {
                Some(previous) => {
                    let closed = driver.disconnect().await;
                    if closed {
                        debug!("Closed link to {} before connecting {}", previous, address);
                    } else {
                        warn!("Driver failed to close the link to {}", previous);
                    }
                    closed
                }
                None => true,
            };
            let outcome = if !released {
                ConnectOutcome::PreviousKept
            } else {
                match driver.connect(&address).await {
                    Ok(()) => ConnectOutcome::Opened,
                    Err(code) => ConnectOutcome::Failed(code),
                }
            };
            let _ = loopback.send(LoopbackMessage::Link(LinkCompletion::Connect {
                address,
                outcome,
                reply,
            }));
        });
    }

    /// Fails everything still waiting. In-flight driver calls finish on their
    /// own; their replies are dropped with the loop.
    pub fn detach(&mut self) {
        if let Some(lookup) = self.lookup.take() {
            lookup.timer.abort();
            respond(lookup.reply, Err(Error::Detached));
        }
        for request in self.queue.drain(..) {
            request.fail(Error::Detached);
        }
    }
}

async fn write_chunks(driver: &dyn RadioDriver, chunks: &[String], encoding: &str) -> SendOutcome {
    for (index, chunk) in chunks.iter().enumerate() {
        let data = match driver.encode(chunk, encoding) {
            Ok(data) => data,
            Err(e) => {
                warn!("Chunk {} cannot be encoded: {}", index, e);
                return SendOutcome::Failed;
            }
        };
        match driver.write(&data).await {
            Ok(()) => trace!("Wrote chunk {} ({} bytes)", index, data.len()),
            Err(DriverError::LinkLost) => {
                warn!("Link lost while writing chunk {}", index);
                return SendOutcome::LinkLost;
            }
            Err(e) => {
                warn!("Writing chunk {} failed: {}", index, e);
                return SendOutcome::Failed;
            }
        }
    }
    SendOutcome::Written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;

    #[tokio::test]
    async fn write_chunks_encodes_each_line() {
        let driver = MockDriver::new();
        let chunks = split_command("A\t\nB", "\t\n");
        assert_eq!(
            write_chunks(driver.as_ref(), &chunks, "gb2312").await,
            SendOutcome::Written
        );
        assert_eq!(driver.written(), vec![b"A\t\n".to_vec(), b"B\t\n".to_vec()]);
    }

    #[tokio::test]
    async fn write_chunks_stops_at_first_failure() {
        let driver = MockDriver::new();
        driver.fail_write_at(1, DriverError::Rejected("buffer full".into()));
        let chunks = split_command("A\t\nB\t\nC", "\t\n");
        assert_eq!(
            write_chunks(driver.as_ref(), &chunks, "gb2312").await,
            SendOutcome::Failed
        );
        assert_eq!(driver.written(), vec![b"A\t\n".to_vec()]);

        driver.fail_write_at(0, DriverError::LinkLost);
        assert_eq!(
            write_chunks(driver.as_ref(), &chunks, "gb2312").await,
            SendOutcome::LinkLost
        );
    }

    #[tokio::test]
    async fn unencodable_text_fails_the_send() {
        let driver = MockDriver::new();
        let chunks = split_command("A", "\t\n");
        assert_eq!(
            write_chunks(driver.as_ref(), &chunks, "x-no-such-charset").await,
            SendOutcome::Failed
        );
        assert!(driver.written().is_empty());
    }
}
