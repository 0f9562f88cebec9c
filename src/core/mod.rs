//! Kernel configuration sync
//!
//! This module contains the rule model and the protocol used to exchange it
//! with the filter kernel module. It provides:
//!
//! - [`rule`]: Rule records, address/port ranges and local validation
//! - [`codec`]: JSON payload encoding and decoding
//! - [`framing`]: Message header and command/status framing
//! - [`channel`]: Blocking netlink request/response channel
//! - [`sync`]: GET/SEND workflows with the validation round-trip
//! - [`worker`]: Dedicated thread with an async front end
//! - [`error`]: Error types for all of the above

pub mod channel;
pub mod codec;
pub mod error;
pub mod framing;
pub mod rule;
pub mod sync;
pub mod worker;

#[cfg(test)]
pub mod test_helpers;
