//! Configuration synchronization with the kernel module
//!
//! [`ConfigSyncService`] runs the two exchanges of the protocol:
//!
//! - **GET_CONFIG**: fetch the rule table the kernel currently enforces
//! - **SEND_CONFIG**: replace it, then fetch it again and compare
//!
//! The compare step is the validation round-trip. A mismatch does not undo
//! or resend anything: the kernel accepted the write, so the result is
//! [`ApplyOutcome::AppliedWithWarning`], distinct from
//! [`ApplyOutcome::Rejected`]. Callers must surface the warning to the operator
//! instead of retrying on their own.
//!
//! # Apply state machine
//!
//! ```text
//! Idle → Sending ─┬─→ TransportFailed
//!                 └─→ AwaitingStatus ─┬─→ Rejected
//!                                     ├─→ TransportFailed
//!                                     └─→ Verifying ─┬─→ Verified
//!                                                    └─→ Warned
//! ```
//!
//! Every transition is reported to the [`SyncObserver`].

use serde_json::Value;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::core::channel::{ChannelConfig, Exchange, KernelChannel};
use crate::core::codec;
use crate::core::error::{FramingError, SyncError, TransportError};
use crate::core::framing::{CommandTag, ExchangeKind, Header, MessageFramer, Status};
use crate::core::rule::{RuleRecord, WIRE_FIELDS, validate_rules};

/// Phases of one apply operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ApplyPhase {
    Idle,
    /// SEND_CONFIG exchange in flight
    Sending,
    /// Response received, status being interpreted
    AwaitingStatus,
    /// Write accepted, validation round-trip in flight
    Verifying,
    Rejected,
    TransportFailed,
    Verified,
    Warned,
}

impl ApplyPhase {
    pub fn can_transition_to(self, next: ApplyPhase) -> bool {
        use ApplyPhase::{
            AwaitingStatus, Idle, Rejected, Sending, TransportFailed, Verified, Verifying, Warned,
        };
        matches!(
            (self, next),
            (Idle, Sending)
                | (Sending, AwaitingStatus | TransportFailed)
                | (AwaitingStatus, Rejected | TransportFailed | Verifying)
                | (Verifying, Verified | Warned)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::TransportFailed | Self::Verified | Self::Warned
        )
    }
}

/// Why a SEND_CONFIG did not take effect. Kernel state is assumed unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyFailure {
    /// Kernel answered FAIL
    KernelRefused,
    Transport(TransportError),
    Framing(FramingError),
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KernelRefused => f.write_str("kernel rejected configuration"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Framing(e) => write!(f, "{e}"),
        }
    }
}

/// Divergence found by the validation round-trip
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationWarning {
    SizeMismatch {
        sent: usize,
        received: usize,
    },
    /// First differing field; later differences are not reported
    FieldMismatch {
        index: usize,
        field: &'static str,
        sent: Value,
        received: Value,
    },
    /// The configuration could not be re-read after the write
    FetchFailed(SyncError),
}

impl fmt::Display for VerificationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeMismatch { sent, received } => {
                write!(f, "Config size mismatch: sent {sent}, received {received}")
            }
            Self::FieldMismatch {
                index,
                field,
                sent,
                received,
            } => write!(
                f,
                "Rule #{index} mismatch for field {field}: sent {sent}, received {received}"
            ),
            Self::FetchFailed(e) => write!(f, "Failed to get config for validation: {e}"),
        }
    }
}

/// Result of an apply that reached the wire
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    AppliedAndVerified,
    /// Applied; the warning is informational and must not trigger a resend
    AppliedWithWarning(VerificationWarning),
    Rejected(ApplyFailure),
}

impl ApplyOutcome {
    /// Whether the kernel accepted the write
    pub fn was_applied(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }

    /// Terminal phase this outcome corresponds to
    pub fn phase(&self) -> ApplyPhase {
        match self {
            Self::AppliedAndVerified => ApplyPhase::Verified,
            Self::AppliedWithWarning(_) => ApplyPhase::Warned,
            Self::Rejected(
                ApplyFailure::KernelRefused
                | ApplyFailure::Framing(FramingError::UnexpectedStatus(_)),
            ) => ApplyPhase::Rejected,
            Self::Rejected(_) => ApplyPhase::TransportFailed,
        }
    }
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AppliedAndVerified => f.write_str("Rules successfully applied and validated"),
            Self::AppliedWithWarning(w) => {
                write!(f, "Rules were applied but validation failed: {w}")
            }
            Self::Rejected(reason) => write!(f, "Failed to apply rules: {reason}"),
        }
    }
}

/// Notifications emitted by the service
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    FetchStarted,
    FetchCompleted { rule_count: usize },
    FetchFailed(SyncError),
    PhaseChanged(ApplyPhase),
    ApplyFinished(ApplyOutcome),
}

/// Receives [`SyncEvent`]s. Replaces any global logger or UI signal: the
/// service only knows this trait.
pub trait SyncObserver: Send {
    fn on_event(&mut self, event: &SyncEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SyncObserver for TracingObserver {
    fn on_event(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::FetchStarted => debug!("Requesting configuration from kernel module"),
            SyncEvent::FetchCompleted { rule_count } => {
                info!(
                    "Successfully received config from kernel module ({} rules)",
                    rule_count
                );
            }
            SyncEvent::FetchFailed(e) => error!("Failed to get config: {}", e),
            SyncEvent::PhaseChanged(phase) => debug!(%phase, "Apply phase changed"),
            SyncEvent::ApplyFinished(outcome) => match outcome {
                ApplyOutcome::AppliedAndVerified => info!("{}", outcome),
                ApplyOutcome::AppliedWithWarning(_) => warn!("{}", outcome),
                ApplyOutcome::Rejected(_) => error!("{}", outcome),
            },
        }
    }
}

/// Discards events
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SyncObserver for NullObserver {
    fn on_event(&mut self, _event: &SyncEvent) {}
}

/// Compares sent rules with what the kernel reports, position by position.
///
/// Returns `None` when they match. Length is checked first; otherwise the
/// first differing wire field is reported.
pub fn compare_configs(
    sent: &[RuleRecord],
    received: &[RuleRecord],
) -> Option<VerificationWarning> {
    if sent.len() != received.len() {
        return Some(VerificationWarning::SizeMismatch {
            sent: sent.len(),
            received: received.len(),
        });
    }

    for (index, (ours, theirs)) in sent.iter().zip(received).enumerate() {
        let ours = ours.to_wire_dict();
        let theirs = theirs.to_wire_dict();
        for field in WIRE_FIELDS {
            let sent_value = ours.get(field).unwrap_or(&Value::Null);
            let received_value = theirs.get(field).unwrap_or(&Value::Null);
            if sent_value != received_value {
                return Some(VerificationWarning::FieldMismatch {
                    index,
                    field,
                    sent: sent_value.clone(),
                    received: received_value.clone(),
                });
            }
        }
    }
    None
}

/// Owns the kernel channel and runs GET/SEND exchanges over it
pub struct ConfigSyncService<C: Exchange> {
    channel: C,
    framer: MessageFramer,
    observer: Box<dyn SyncObserver>,
}

impl ConfigSyncService<KernelChannel> {
    /// Opens a netlink channel and builds a service over it, using the
    /// channel's bound identity as the sender id.
    pub fn connect(config: ChannelConfig, observer: Box<dyn SyncObserver>) -> Self {
        let channel = KernelChannel::open(config);
        let sender_id = channel.local_id();
        Self::with_observer(channel, sender_id, observer)
    }
}

impl<C: Exchange> ConfigSyncService<C> {
    pub fn new(channel: C, sender_id: u32) -> Self {
        Self::with_observer(channel, sender_id, Box::new(TracingObserver))
    }

    pub fn with_observer(channel: C, sender_id: u32, observer: Box<dyn SyncObserver>) -> Self {
        Self {
            channel,
            framer: MessageFramer::new(sender_id),
            observer,
        }
    }

    /// Fetches the kernel's current rule table.
    ///
    /// # Errors
    ///
    /// - `Transport` / `Framing` if the exchange fails
    /// - `InvalidRemoteConfig` if the payload is not a valid rule list
    pub fn get_current_config(&mut self) -> Result<Vec<RuleRecord>, SyncError> {
        self.emit(&SyncEvent::FetchStarted);
        let result = self.fetch();
        match &result {
            Ok(rules) => self.emit(&SyncEvent::FetchCompleted {
                rule_count: rules.len(),
            }),
            Err(e) => self.emit(&SyncEvent::FetchFailed(e.clone())),
        }
        result
    }

    fn fetch(&mut self) -> Result<Vec<RuleRecord>, SyncError> {
        let request = self.framer.wrap(ExchangeKind::Get.command(), &[]);
        let response = self.channel.exchange(&request)?;
        log_header(&response);

        let (command, payload) = MessageFramer::unwrap_config(&response)?;
        if command != CommandTag::GetConfig as u8 {
            debug!(
                command,
                "GET_CONFIG response carries an unexpected echo byte"
            );
        }
        codec::decode_rules(payload).map_err(SyncError::InvalidRemoteConfig)
    }

    /// Sends `rules` to the kernel and verifies they were stored.
    ///
    /// Rules are validated locally first; on a local failure nothing is sent.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for local pre-flight failures (`Validation`,
    /// `Encoding`). Everything that happens on the wire is an [`ApplyOutcome`].
    pub fn apply_config(&mut self, rules: &[RuleRecord]) -> Result<ApplyOutcome, SyncError> {
        validate_rules(rules)?;
        let payload = codec::encode(rules).map_err(SyncError::Encoding)?;

        let mut phase = ApplyPhase::Idle;
        self.advance(&mut phase, ApplyPhase::Sending);

        let request = self.framer.wrap(ExchangeKind::Send.command(), &payload);
        info!(
            rules = rules.len(),
            bytes = request.len(),
            "Sending configuration to kernel module"
        );

        let outcome = match self.channel.exchange(&request) {
            Err(e) => {
                self.advance(&mut phase, ApplyPhase::TransportFailed);
                ApplyOutcome::Rejected(ApplyFailure::Transport(e))
            }
            Ok(response) => {
                self.advance(&mut phase, ApplyPhase::AwaitingStatus);
                log_header(&response);
                match MessageFramer::unwrap_status(&response) {
                    Ok(Status::Success) => {
                        self.advance(&mut phase, ApplyPhase::Verifying);
                        let outcome = self.verify(rules);
                        self.advance(&mut phase, outcome.phase());
                        outcome
                    }
                    Ok(Status::Fail) => {
                        self.advance(&mut phase, ApplyPhase::Rejected);
                        ApplyOutcome::Rejected(ApplyFailure::KernelRefused)
                    }
                    Err(e) => {
                        let outcome = ApplyOutcome::Rejected(ApplyFailure::Framing(e));
                        self.advance(&mut phase, outcome.phase());
                        outcome
                    }
                }
            }
        };

        self.emit(&SyncEvent::ApplyFinished(outcome.clone()));
        Ok(outcome)
    }

    fn verify(&mut self, sent: &[RuleRecord]) -> ApplyOutcome {
        match self.get_current_config() {
            Ok(received) => match compare_configs(sent, &received) {
                None => ApplyOutcome::AppliedAndVerified,
                Some(warning) => ApplyOutcome::AppliedWithWarning(warning),
            },
            Err(e) => ApplyOutcome::AppliedWithWarning(VerificationWarning::FetchFailed(e)),
        }
    }

    fn advance(&mut self, phase: &mut ApplyPhase, next: ApplyPhase) {
        debug_assert!(
            phase.can_transition_to(next),
            "illegal apply transition {phase} -> {next}"
        );
        *phase = next;
        self.emit(&SyncEvent::PhaseChanged(next));
    }

    fn emit(&mut self, event: &SyncEvent) {
        self.observer.on_event(event);
    }
}

fn log_header(response: &[u8]) {
    if let Some(header) = Header::parse(response) {
        debug!(
            total_length = header.total_length,
            sender_id = header.sender_id,
            received = response.len(),
            "Kernel response header"
        );
    }
}
