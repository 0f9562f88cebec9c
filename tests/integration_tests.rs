//! Integration tests for nlfw
//!
//! These tests drive the public API against an in-process kernel emulator.
//! The emulator speaks the wire protocol: it stores the payload of every
//! SEND_CONFIG and serves it back on GET_CONFIG. Some tests run it behind a
//! real datagram socket so the full `KernelChannel` path is exercised.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use nlfw::core::channel::{ChannelConfig, Exchange, KernelChannel};
use nlfw::core::error::{SyncError, TransportError, ValidationError};
use nlfw::core::framing::{CommandTag, HEADER_LEN, Header, Status};
use nlfw::core::sync::{
    ApplyFailure, ApplyOutcome, ConfigSyncService, NullObserver, VerificationWarning,
};
use nlfw::core::worker::SyncWorker;
use nlfw::{Action, AddressRange, Direction, PortRange, Protocol, RuleRecord};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixDatagram;
use std::thread;
use std::time::Duration;

/// How the emulated kernel treats stored configuration
#[derive(Clone, Copy)]
enum Quirk {
    None,
    /// Refuses every SEND_CONFIG
    RejectAll,
    /// Keeps only the first N rules of each write
    Truncate(usize),
    /// Stores every rule with action DROP
    ForceDrop,
}

/// Minimal stand-in for the kernel side of the protocol
struct KernelEmulator {
    stored: Vec<u8>,
    quirk: Quirk,
}

impl KernelEmulator {
    fn new(quirk: Quirk) -> Self {
        Self {
            stored: b"[]".to_vec(),
            quirk,
        }
    }

    fn handle(&mut self, request: &[u8]) -> Vec<u8> {
        assert!(request.len() > HEADER_LEN, "request without command byte");
        let header = Header::parse(request).unwrap();
        assert_eq!(header.total_length as usize, request.len());

        let command = request[HEADER_LEN];
        let payload = &request[HEADER_LEN + 1..];
        if command == CommandTag::SendConfig as u8 {
            let status = self.store(payload);
            frame(&(status as u32).to_le_bytes())
        } else if command == CommandTag::GetConfig as u8 {
            let mut body = vec![CommandTag::GetConfig as u8];
            body.extend_from_slice(&self.stored);
            body.extend_from_slice(&[0; 8]);
            frame(&body)
        } else {
            panic!("unknown command {command}");
        }
    }

    fn store(&mut self, payload: &[u8]) -> Status {
        let mut rules: Vec<serde_json::Value> = serde_json::from_slice(payload).unwrap();
        match self.quirk {
            Quirk::RejectAll => return Status::Fail,
            Quirk::Truncate(n) => rules.truncate(n),
            Quirk::ForceDrop => {
                for rule in &mut rules {
                    rule["action"] = "DROP".into();
                }
            }
            Quirk::None => {}
        }
        self.stored = serde_json::to_vec(&rules).unwrap();
        Status::Success
    }
}

impl Exchange for KernelEmulator {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        Ok(self.handle(request))
    }
}

fn frame(body: &[u8]) -> Vec<u8> {
    let mut out = Header::new((HEADER_LEN + body.len()) as u32, 0)
        .to_bytes()
        .to_vec();
    out.extend_from_slice(body);
    out
}

/// Runs the emulator on a thread behind one end of a datagram socket pair
fn socket_kernel(quirk: Quirk, timeout_ms: u64) -> (KernelChannel, thread::JoinHandle<()>) {
    let (ours, theirs) = UnixDatagram::pair().unwrap();
    // Datagram pairs do not signal EOF when the peer closes
    theirs
        .set_read_timeout(Some(Duration::from_millis(500)))
        .unwrap();
    let handle = thread::spawn(move || {
        let mut kernel = KernelEmulator::new(quirk);
        let mut buf = vec![0u8; 64 * 1024];
        while let Ok(n) = theirs.recv(&mut buf) {
            if n == 0 {
                break;
            }
            let response = kernel.handle(&buf[..n]);
            if theirs.send(&response).is_err() {
                break;
            }
        }
    });
    let config = ChannelConfig {
        receive_timeout: Duration::from_millis(timeout_ms),
        ..ChannelConfig::default()
    };
    let channel = KernelChannel::from_fd(OwnedFd::from(ours), config, 4000).unwrap();
    (channel, handle)
}

fn ruleset() -> Vec<RuleRecord> {
    vec![
        RuleRecord::single(
            10,
            "10.0.0.5".parse().unwrap(),
            None,
            "192.168.1.10".parse().unwrap(),
            Some(22),
            Protocol::Tcp,
            Action::Accept,
            Direction::Inbound,
        )
        .with_description("ssh from bastion"),
        RuleRecord {
            id: 20,
            source_range: AddressRange::from_network("192.168.0.0/16".parse().unwrap()),
            destination_range: AddressRange::single("192.168.1.1".parse().unwrap()),
            source_port_range: None,
            destination_port_range: Some(PortRange::new(8000, 8080)),
            protocol: Protocol::Any,
            action: Action::Drop,
            direction: Direction::Inbound,
            enabled: true,
            description: String::new(),
        },
        RuleRecord::single(
            30,
            "fe80::1".parse().unwrap(),
            Some(546),
            "ff02::1:2".parse().unwrap(),
            Some(547),
            Protocol::Udp,
            Action::Accept,
            Direction::Outbound,
        )
        .with_enabled(false),
    ]
}

fn service<C: Exchange>(channel: C) -> ConfigSyncService<C> {
    ConfigSyncService::with_observer(channel, 4000, Box::new(NullObserver))
}

#[test]
fn test_apply_then_fetch_roundtrip() {
    let mut svc = service(KernelEmulator::new(Quirk::None));
    let rules = ruleset();

    assert_eq!(svc.get_current_config().unwrap(), vec![]);
    assert_eq!(
        svc.apply_config(&rules).unwrap(),
        ApplyOutcome::AppliedAndVerified
    );
    assert_eq!(svc.get_current_config().unwrap(), rules);
}

#[test]
fn test_apply_replaces_whole_table() {
    let mut svc = service(KernelEmulator::new(Quirk::None));
    svc.apply_config(&ruleset()).unwrap();

    let smaller = vec![ruleset().remove(1)];
    assert_eq!(
        svc.apply_config(&smaller).unwrap(),
        ApplyOutcome::AppliedAndVerified
    );
    assert_eq!(svc.get_current_config().unwrap(), smaller);
}

#[test]
fn test_rejected_write_leaves_state() {
    let mut svc = service(KernelEmulator::new(Quirk::RejectAll));
    assert_eq!(
        svc.apply_config(&ruleset()).unwrap(),
        ApplyOutcome::Rejected(ApplyFailure::KernelRefused)
    );
    assert_eq!(svc.get_current_config().unwrap(), vec![]);
}

#[test]
fn test_kernel_dropping_rules_is_size_warning() {
    let mut svc = service(KernelEmulator::new(Quirk::Truncate(1)));
    assert_eq!(
        svc.apply_config(&ruleset()).unwrap(),
        ApplyOutcome::AppliedWithWarning(VerificationWarning::SizeMismatch {
            sent: 3,
            received: 1,
        })
    );
}

#[test]
fn test_kernel_rewriting_action_is_field_warning() {
    let mut svc = service(KernelEmulator::new(Quirk::ForceDrop));
    match svc.apply_config(&ruleset()).unwrap() {
        ApplyOutcome::AppliedWithWarning(VerificationWarning::FieldMismatch {
            index,
            field,
            received,
            ..
        }) => {
            assert_eq!(index, 0);
            assert_eq!(field, "action");
            assert_eq!(received, "DROP");
        }
        other => panic!("expected FieldMismatch, got {other:?}"),
    }
}

#[test]
fn test_invalid_rules_rejected_locally() {
    let mut rules = ruleset();
    rules[1].destination_range = AddressRange::new(
        "192.168.1.9".parse().unwrap(),
        "192.168.1.1".parse().unwrap(),
    );
    let mut svc = service(KernelEmulator::new(Quirk::None));

    let err = svc.apply_config(&rules).unwrap_err();
    match err {
        SyncError::Validation(ValidationError::InvalidRule { index, id, source }) => {
            assert_eq!((index, id), (1, 20));
            assert_eq!(source.field(), "destination_address_start");
        }
        other => panic!("expected InvalidRule, got {other:?}"),
    }
}

#[test]
fn test_duplicate_ids_rejected_locally() {
    let mut rules = ruleset();
    rules[2].id = 10;
    let mut svc = service(KernelEmulator::new(Quirk::None));
    assert_eq!(
        svc.apply_config(&rules),
        Err(SyncError::Validation(ValidationError::DuplicateId { id: 10 }))
    );
}

#[test]
fn test_full_path_over_socket() {
    let (channel, kernel) = socket_kernel(Quirk::None, 2000);
    let mut svc = service(channel);
    let rules = ruleset();

    assert_eq!(
        svc.apply_config(&rules).unwrap(),
        ApplyOutcome::AppliedAndVerified
    );
    assert_eq!(svc.get_current_config().unwrap(), rules);

    drop(svc);
    kernel.join().unwrap();
}

#[test]
fn test_silent_kernel_times_out() {
    let (ours, _theirs) = UnixDatagram::pair().unwrap();
    let config = ChannelConfig {
        receive_timeout: Duration::from_millis(50),
        ..ChannelConfig::default()
    };
    let channel = KernelChannel::from_fd(OwnedFd::from(ours), config, 1).unwrap();
    let mut svc = service(channel);

    assert_eq!(
        svc.get_current_config(),
        Err(SyncError::Transport(TransportError::Timeout { timeout_ms: 50 }))
    );
    assert_eq!(
        svc.apply_config(&ruleset()).unwrap(),
        ApplyOutcome::Rejected(ApplyFailure::Transport(TransportError::Timeout {
            timeout_ms: 50
        }))
    );
}

#[test]
fn test_degraded_channel_never_sends() {
    let channel = KernelChannel::open(ChannelConfig {
        family: -1,
        ..ChannelConfig::default()
    });
    let mut svc = service(channel);

    assert!(matches!(
        svc.get_current_config(),
        Err(SyncError::Transport(TransportError::NotInitialized(_)))
    ));
    assert!(matches!(
        svc.apply_config(&ruleset()).unwrap(),
        ApplyOutcome::Rejected(ApplyFailure::Transport(TransportError::NotInitialized(_)))
    ));
}

#[tokio::test]
async fn test_worker_over_socket() {
    let (channel, kernel) = socket_kernel(Quirk::None, 2000);
    let worker = SyncWorker::spawn(service(channel));

    let outcome = worker.apply(ruleset()).await.unwrap();
    assert_eq!(outcome, ApplyOutcome::AppliedAndVerified);
    assert_eq!(worker.fetch().await.unwrap(), ruleset());

    worker.shutdown();
    kernel.join().unwrap();
}

#[tokio::test]
async fn test_worker_serves_concurrent_callers() {
    let worker = SyncWorker::spawn(service(KernelEmulator::new(Quirk::None)));
    worker.apply(ruleset()).await.unwrap();

    let (a, b) = tokio::join!(worker.fetch(), worker.fetch());
    assert_eq!(a.unwrap(), ruleset());
    assert_eq!(b.unwrap(), ruleset());
    worker.shutdown();
}
