//! Filter rule data structures, validation and wire representation
//!
//! A [`RuleRecord`] is the canonical in-memory form of one kernel filter rule:
//! - Source and destination address ranges (IPv4 or IPv6)
//! - Optional source and destination port ranges
//! - Protocol, action and direction tags
//! - Enable/disable state and a free-text description
//!
//! Records are always range-based. A rule for a single address or port is built
//! with [`RuleRecord::single`], which sets start = end.
//!
//! # Limits
//!
//! Rule lists are limited to [`MAX_RULES`] entries (see [`validate_rules`]).
//!
//! # Example
//!
//! ```
//! use nlfw::core::rule::{Action, Direction, PortRange, Protocol, RuleRecord};
//!
//! let rule = RuleRecord::single(
//!     1,
//!     "10.0.0.5".parse().unwrap(),
//!     None,
//!     "192.168.1.10".parse().unwrap(),
//!     Some(22),
//!     Protocol::Tcp,
//!     Action::Accept,
//!     Direction::Inbound,
//! );
//! assert!(rule.validate().is_ok());
//! assert_eq!(rule.destination_port_range, Some(PortRange::single(22)));
//! ```

use ipnetwork::IpNetwork;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::core::error::{Bound, Endpoint, PayloadError, ValidationError};

/// Maximum number of rules accepted in a single configuration
///
/// The kernel module keeps rules in a fixed table; 1000 is well beyond
/// typical use.
pub const MAX_RULES: usize = 1000;

/// Highest valid port number
pub const MAX_PORT: u32 = 65_535;

/// Wire field names in the order they are emitted
pub const WIRE_FIELDS: [&str; 14] = [
    "id",
    "source_address_start",
    "source_address_end",
    "source_port_start",
    "source_port_end",
    "destination_address_start",
    "destination_address_end",
    "destination_port_start",
    "destination_port_end",
    "protocol",
    "action",
    "direction",
    "enabled",
    "description",
];

/// Transport protocol matched by a rule
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Protocol {
    #[strum(serialize = "TCP")]
    Tcp,
    #[strum(serialize = "UDP")]
    Udp,
    /// Match all protocols
    #[default]
    #[strum(serialize = "ANY")]
    Any,
}

/// Rule action
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Action {
    /// Let the packet through
    #[strum(serialize = "ACCEPT")]
    Accept,
    /// Discard the packet silently
    #[default]
    #[strum(serialize = "DROP")]
    Drop,
}

/// Traffic direction a rule applies to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Direction {
    #[default]
    #[strum(serialize = "INBOUND")]
    Inbound,
    #[strum(serialize = "OUTBOUND")]
    Outbound,
}

/// Inclusive range of IP addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl AddressRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Self {
        Self { start, end }
    }

    pub fn single(addr: IpAddr) -> Self {
        Self {
            start: addr,
            end: addr,
        }
    }

    /// Range covering every address of a CIDR block
    ///
    /// `192.168.1.0/24` becomes `192.168.1.0 - 192.168.1.255`.
    pub fn from_network(network: IpNetwork) -> Self {
        let end = match network {
            IpNetwork::V4(net) => IpAddr::V4(net.broadcast()),
            IpNetwork::V6(net) => {
                let host_bits = 128 - u32::from(net.prefix());
                let mask = u128::MAX.checked_shr(128 - host_bits).unwrap_or(0);
                IpAddr::V6((u128::from(net.network()) | mask).into())
            }
        };
        Self {
            start: network.network(),
            end,
        }
    }

    fn validate(&self, endpoint: Endpoint) -> Result<(), ValidationError> {
        if self.start.is_ipv4() != self.end.is_ipv4() {
            return Err(ValidationError::AddressFamilyMismatch {
                endpoint,
                start: self.start,
                end: self.end,
            });
        }
        if self.start > self.end {
            return Err(ValidationError::AddressOrder {
                endpoint,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Inclusive port range
///
/// Ports are held as `u32` so that out-of-range input from forms or remote
/// payloads is reported by [`RuleRecord::validate`] instead of being lost in a
/// numeric conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub start: u32,
    pub end: u32,
}

impl PortRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn single(port: u32) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    fn validate(&self, endpoint: Endpoint) -> Result<(), ValidationError> {
        for (bound, port) in [(Bound::Start, self.start), (Bound::End, self.end)] {
            if port > MAX_PORT {
                return Err(ValidationError::PortOutOfRange {
                    endpoint,
                    bound,
                    port,
                });
            }
        }
        if self.start > self.end {
            return Err(ValidationError::PortOrder {
                endpoint,
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRecord {
    /// Caller-assigned identifier; the sync core never renumbers it
    pub id: u32,
    pub source_range: AddressRange,
    pub destination_range: AddressRange,
    /// `None` leaves the port unconstrained
    pub source_port_range: Option<PortRange>,
    pub destination_port_range: Option<PortRange>,
    pub protocol: Protocol,
    pub action: Action,
    pub direction: Direction,
    pub enabled: bool,
    pub description: String,
}

impl RuleRecord {
    /// Builds a rule matching one source address/port and one destination
    /// address/port. Ranges are set with start = end.
    #[allow(clippy::too_many_arguments)]
    pub fn single(
        id: u32,
        source_address: IpAddr,
        source_port: Option<u32>,
        destination_address: IpAddr,
        destination_port: Option<u32>,
        protocol: Protocol,
        action: Action,
        direction: Direction,
    ) -> Self {
        Self {
            id,
            source_range: AddressRange::single(source_address),
            destination_range: AddressRange::single(destination_address),
            source_port_range: source_port.map(PortRange::single),
            destination_port_range: destination_port.map(PortRange::single),
            protocol,
            action,
            direction,
            enabled: true,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Checks address ordering and family, port bounds and port ordering.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint; source is checked before
    /// destination, addresses before ports.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source_range.validate(Endpoint::Source)?;
        self.destination_range.validate(Endpoint::Destination)?;
        if let Some(ports) = &self.source_port_range {
            ports.validate(Endpoint::Source)?;
        }
        if let Some(ports) = &self.destination_port_range {
            ports.validate(Endpoint::Destination)?;
        }
        Ok(())
    }

    /// Renders the record as the ordered field map sent to the kernel.
    ///
    /// Addresses are strings, ports are integers or `null`, enums are their
    /// upper-case tags.
    pub fn to_wire_dict(&self) -> Map<String, Value> {
        fn port(range: Option<&PortRange>, pick: fn(&PortRange) -> u32) -> Value {
            range.map_or(Value::Null, |r| Value::from(pick(r)))
        }

        let src_ports = self.source_port_range.as_ref();
        let dst_ports = self.destination_port_range.as_ref();

        let mut map = Map::with_capacity(WIRE_FIELDS.len());
        map.insert("id".into(), Value::from(self.id));
        map.insert(
            "source_address_start".into(),
            Value::from(self.source_range.start.to_string()),
        );
        map.insert(
            "source_address_end".into(),
            Value::from(self.source_range.end.to_string()),
        );
        map.insert("source_port_start".into(), port(src_ports, |r| r.start));
        map.insert("source_port_end".into(), port(src_ports, |r| r.end));
        map.insert(
            "destination_address_start".into(),
            Value::from(self.destination_range.start.to_string()),
        );
        map.insert(
            "destination_address_end".into(),
            Value::from(self.destination_range.end.to_string()),
        );
        map.insert(
            "destination_port_start".into(),
            port(dst_ports, |r| r.start),
        );
        map.insert("destination_port_end".into(), port(dst_ports, |r| r.end));
        map.insert("protocol".into(), Value::from(self.protocol.as_ref()));
        map.insert("action".into(), Value::from(self.action.as_ref()));
        map.insert("direction".into(), Value::from(self.direction.as_ref()));
        map.insert("enabled".into(), Value::from(self.enabled));
        map.insert("description".into(), Value::from(self.description.as_str()));
        map
    }

    /// Rebuilds a record from a wire field map.
    ///
    /// `index` is the position of the map in its payload and is only used in
    /// error messages. `enabled` defaults to `true` and `description` to empty
    /// when absent; every other field is required. Port ranges need both ends
    /// present or both `null`.
    ///
    /// # Errors
    ///
    /// Returns `PayloadError` for missing or mistyped fields and unknown tags.
    pub fn from_wire_dict(map: &Map<String, Value>, index: usize) -> Result<Self, PayloadError> {
        let fields = WireFields { map, index };

        let id = fields.integer("id")?;
        let id = u32::try_from(id).map_err(|_| fields.invalid("id", "does not fit in 32 bits"))?;

        let source_range = AddressRange::new(
            fields.address("source_address_start")?,
            fields.address("source_address_end")?,
        );
        let destination_range = AddressRange::new(
            fields.address("destination_address_start")?,
            fields.address("destination_address_end")?,
        );
        let source_port_range = fields.port_range("source_port_start", "source_port_end")?;
        let destination_port_range =
            fields.port_range("destination_port_start", "destination_port_end")?;

        let enabled = match map.get("enabled") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(fields.invalid("enabled", "is not a boolean")),
        };
        let description = match map.get("description") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(fields.invalid("description", "is not a string")),
        };

        Ok(Self {
            id,
            source_range,
            destination_range,
            source_port_range,
            destination_port_range,
            protocol: fields.tag("protocol")?,
            action: fields.tag("action")?,
            direction: fields.tag("direction")?,
            enabled,
            description,
        })
    }
}

impl fmt::Display for RuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = |p: Option<&PortRange>| p.map_or_else(|| "*".to_string(), ToString::to_string);
        write!(
            f,
            "#{} {} {} {} {}:{} -> {}:{}",
            self.id,
            if self.enabled { "on " } else { "off" },
            self.direction,
            self.action,
            self.source_range,
            ports(self.source_port_range.as_ref()),
            self.destination_range,
            ports(self.destination_port_range.as_ref()),
        )?;
        write!(f, " {}", self.protocol)?;
        if !self.description.is_empty() {
            write!(f, " \"{}\"", self.description)?;
        }
        Ok(())
    }
}

/// Typed accessors over one wire map
struct WireFields<'a> {
    map: &'a Map<String, Value>,
    index: usize,
}

impl WireFields<'_> {
    fn invalid(&self, field: &'static str, reason: impl Into<String>) -> PayloadError {
        PayloadError::InvalidField {
            index: self.index,
            field,
            reason: reason.into(),
        }
    }

    fn required(&self, field: &'static str) -> Result<&Value, PayloadError> {
        self.map.get(field).ok_or(PayloadError::MissingField {
            index: self.index,
            field,
        })
    }

    fn string(&self, field: &'static str) -> Result<&str, PayloadError> {
        self.required(field)?
            .as_str()
            .ok_or_else(|| self.invalid(field, "is not a string"))
    }

    fn integer(&self, field: &'static str) -> Result<u64, PayloadError> {
        self.required(field)?
            .as_u64()
            .ok_or_else(|| self.invalid(field, "is not a non-negative integer"))
    }

    fn address(&self, field: &'static str) -> Result<IpAddr, PayloadError> {
        let raw = self.string(field)?;
        raw.parse()
            .map_err(|_| self.invalid(field, format!("is not an IP address: '{raw}'")))
    }

    fn optional_port(&self, field: &'static str) -> Result<Option<u32>, PayloadError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => {
                let port = v
                    .as_u64()
                    .ok_or_else(|| self.invalid(field, "is not a non-negative integer"))?;
                u32::try_from(port)
                    .map(Some)
                    .map_err(|_| self.invalid(field, format!("is too large: {port}")))
            }
        }
    }

    fn port_range(
        &self,
        start_field: &'static str,
        end_field: &'static str,
    ) -> Result<Option<PortRange>, PayloadError> {
        match (self.optional_port(start_field)?, self.optional_port(end_field)?) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => Ok(Some(PortRange::new(start, end))),
            (Some(_), None) => Err(self.invalid(end_field, "is missing while its start is set")),
            (None, Some(_)) => Err(self.invalid(start_field, "is missing while its end is set")),
        }
    }

    fn tag<T: FromStr>(&self, field: &'static str) -> Result<T, PayloadError> {
        let raw = self.string(field)?;
        raw.parse().map_err(|_| PayloadError::UnknownTag {
            index: self.index,
            field,
            value: raw.to_string(),
        })
    }
}

/// Validates a whole rule list before it is sent.
///
/// Checks every record, rejects duplicate ids (ids are stable identifiers,
/// not positions) and enforces [`MAX_RULES`].
///
/// # Errors
///
/// Returns the first failure found; per-record failures are wrapped in
/// [`ValidationError::InvalidRule`] with the record's position.
pub fn validate_rules(rules: &[RuleRecord]) -> Result<(), ValidationError> {
    if rules.len() > MAX_RULES {
        return Err(ValidationError::TooManyRules {
            count: rules.len(),
            max: MAX_RULES,
        });
    }

    let mut seen = HashSet::with_capacity(rules.len());
    for (index, rule) in rules.iter().enumerate() {
        rule.validate()
            .map_err(|source| ValidationError::InvalidRule {
                index,
                id: rule.id,
                source: Box::new(source),
            })?;
        if !seen.insert(rule.id) {
            return Err(ValidationError::DuplicateId { id: rule.id });
        }
    }
    Ok(())
}
