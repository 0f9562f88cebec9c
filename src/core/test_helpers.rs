//! Shared test utilities for core module tests
//!
//! Provides rule builders, proptest strategies and a scripted kernel peer.
//! This module is only compiled in test mode.

use crate::core::channel::Exchange;
use crate::core::error::TransportError;
use crate::core::framing::{CommandTag, HEADER_LEN, Header, Status};
use crate::core::rule::{Action, AddressRange, Direction, MAX_PORT, PortRange, Protocol, RuleRecord};
use crate::core::sync::{ApplyPhase, SyncEvent, SyncObserver};
use proptest::prelude::*;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};

pub fn v4(s: &str) -> IpAddr {
    s.parse().unwrap()
}

/// Canonical single-host SSH rule used across tests.
pub fn ssh_rule(id: u32) -> RuleRecord {
    RuleRecord::single(
        id,
        v4("10.0.0.5"),
        None,
        v4("192.168.1.10"),
        Some(22),
        Protocol::Tcp,
        Action::Accept,
        Direction::Inbound,
    )
}

/// A small mixed ruleset: SSH accept, a UDP port range, an IPv6 drop rule.
pub fn sample_rules() -> Vec<RuleRecord> {
    let dns = RuleRecord {
        id: 2,
        source_range: AddressRange::from_network("10.0.0.0/8".parse().unwrap()),
        destination_range: AddressRange::single(v4("10.0.0.53")),
        source_port_range: Some(PortRange::new(1024, 65535)),
        destination_port_range: Some(PortRange::single(53)),
        protocol: Protocol::Udp,
        action: Action::Accept,
        direction: Direction::Outbound,
        enabled: true,
        description: "dns".to_string(),
    };
    let block_v6 = RuleRecord {
        id: 3,
        source_range: AddressRange::new(
            "2001:db8::".parse().unwrap(),
            "2001:db8::ffff".parse().unwrap(),
        ),
        destination_range: AddressRange::single("2001:db8:1::1".parse().unwrap()),
        source_port_range: None,
        destination_port_range: None,
        protocol: Protocol::Any,
        action: Action::Drop,
        direction: Direction::Inbound,
        enabled: false,
        description: String::new(),
    };
    vec![ssh_rule(1).with_description("ssh"), dns, block_v6]
}

/// GET response: header + command echo + NUL-padded JSON
pub fn get_response(json: &[u8]) -> Vec<u8> {
    let mut body = vec![CommandTag::GetConfig as u8, 0, 0];
    body.extend_from_slice(json);
    body.extend_from_slice(&[0, 0, 0, 0]);
    let header = Header::new((HEADER_LEN + body.len()) as u32, 0);
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&body);
    out
}

/// SEND response: header + 4-byte little-endian status
pub fn status_response(status: u32) -> Vec<u8> {
    let header = Header::new((HEADER_LEN + 4) as u32, 0);
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(&status.to_le_bytes());
    out
}

pub fn success_response() -> Vec<u8> {
    status_response(Status::Success as u32)
}

pub fn fail_response() -> Vec<u8> {
    status_response(Status::Fail as u32)
}

/// Kernel peer that replays queued replies and records every request.
///
/// Clones share state, so a test can keep a handle after moving the
/// channel into a service.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannel {
    replies: Arc<Mutex<VecDeque<Result<Vec<u8>, TransportError>>>>,
    requests: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl ScriptedChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, response: Vec<u8>) -> Self {
        self.replies.lock().unwrap().push_back(Ok(response));
        self
    }

    pub fn fail(self, error: TransportError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    /// Whether a service still holds a clone of this channel
    pub fn is_shared(&self) -> bool {
        Arc::strong_count(&self.requests) > 1
    }

    pub fn requests(&self) -> Vec<Vec<u8>> {
        self.requests.lock().unwrap().clone()
    }

    /// Command tags of every request sent so far
    pub fn commands(&self) -> Vec<u8> {
        self.requests().iter().map(|r| r[HEADER_LEN]).collect()
    }
}

impl Exchange for ScriptedChannel {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self.requests.lock().unwrap().push(request.to_vec());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(TransportError::Timeout { timeout_ms: 3500 }))
    }
}

/// Observer that keeps every event; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<SyncEvent>>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn phases(&self) -> Vec<ApplyPhase> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SyncEvent::PhaseChanged(phase) => Some(phase),
                _ => None,
            })
            .collect()
    }
}

impl SyncObserver for RecordingObserver {
    fn on_event(&mut self, event: &SyncEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

fn arb_ipv4_range() -> impl Strategy<Value = AddressRange> {
    (any::<u32>(), any::<u32>()).prop_map(|(a, b)| {
        AddressRange::new(
            IpAddr::V4(Ipv4Addr::from(a.min(b))),
            IpAddr::V4(Ipv4Addr::from(a.max(b))),
        )
    })
}

fn arb_ipv6_range() -> impl Strategy<Value = AddressRange> {
    (any::<u128>(), any::<u128>()).prop_map(|(a, b)| {
        AddressRange::new(
            IpAddr::V6(Ipv6Addr::from(a.min(b))),
            IpAddr::V6(Ipv6Addr::from(a.max(b))),
        )
    })
}

fn arb_port_range() -> impl Strategy<Value = PortRange> {
    (0u32..=MAX_PORT, 0u32..=MAX_PORT).prop_map(|(a, b)| PortRange::new(a.min(b), a.max(b)))
}

prop_compose! {
    pub fn arb_rule()(
        id in any::<u32>(),
        source_range in prop_oneof![arb_ipv4_range(), arb_ipv6_range()],
        destination_range in prop_oneof![arb_ipv4_range(), arb_ipv6_range()],
        source_port_range in proptest::option::of(arb_port_range()),
        destination_port_range in proptest::option::of(arb_port_range()),
        protocol in prop_oneof![Just(Protocol::Tcp), Just(Protocol::Udp), Just(Protocol::Any)],
        action in prop_oneof![Just(Action::Accept), Just(Action::Drop)],
        direction in prop_oneof![Just(Direction::Inbound), Just(Direction::Outbound)],
        enabled in any::<bool>(),
        description in "[a-zA-Z0-9 _\\-\"\\\\]{0,32}",
    ) -> RuleRecord {
        RuleRecord {
            id,
            source_range,
            destination_range,
            source_port_range,
            destination_port_range,
            protocol,
            action,
            direction,
            enabled,
            description,
        }
    }
}
