//! nlfw - netlink firewall configuration sync
//!
//! Reads and replaces the rule table of a packet-filter kernel module over a
//! custom netlink family, and verifies every write by reading it back.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, wire codec, framing, kernel channel and sync service
//! - [`audit`] - Opt-in audit log of fetch and apply operations
//! - [`config`] - Configuration loading
//! - [`utils`] - Utility functions (XDG directories)
//!
//! # Example
//!
//! ```no_run
//! use nlfw::core::channel::ChannelConfig;
//! use nlfw::core::sync::{ApplyOutcome, ConfigSyncService, TracingObserver};
//!
//! let mut service =
//!     ConfigSyncService::connect(ChannelConfig::default(), Box::new(TracingObserver));
//! let mut rules = service.get_current_config()?;
//! rules.retain(|r| r.enabled);
//!
//! match service.apply_config(&rules)? {
//!     ApplyOutcome::AppliedAndVerified => println!("done"),
//!     other => eprintln!("{other}"),
//! }
//! # Ok::<(), nlfw::core::error::SyncError>(())
//! ```

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod utils;

// Re-export commonly used types
pub use core::error::{Error, Result, SyncError};
pub use core::rule::{Action, AddressRange, Direction, PortRange, Protocol, RuleRecord};
pub use core::sync::{ApplyOutcome, ConfigSyncService};
