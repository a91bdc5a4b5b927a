//! Packet-classification rule model.
//!
//! A rule is a 5-tuple predicate in ClassBench form:
//!
//! ```text
//! @<srcIP>[/<len>|-<IP>] <dstIP>[/<len>|-<IP>] <sportLo> : <sportHi> <dportLo> : <dportHi> <proto>/<mask> [<id>]
//! ```
//!
//! The trailing id is optional. Whether a set carries it is an explicit
//! schema toggle: use [`RuleSet::tagged`] and [`RuleSet::untagged`] to move
//! between the two forms.

pub mod prefix;
mod ruleset;

pub use prefix::{decompose, IdAssignment, PrefixBlock, PrefixRule};
pub use ruleset::RuleSet;

use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::FieldError;
use crate::trace::Packet;

/// Inclusive IPv4 address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddrRange {
    pub lo: u32,
    pub hi: u32,
}

impl AddrRange {
    /// Create a range, swapping the bounds if they are reversed.
    pub fn new(lo: u32, hi: u32) -> Self {
        if lo <= hi {
            Self { lo, hi }
        } else {
            Self { lo: hi, hi: lo }
        }
    }

    /// The whole address space.
    pub fn any() -> Self {
        Self::new(0, u32::MAX)
    }

    /// Number of addresses covered (at least 1).
    pub fn span(&self) -> u64 {
        u64::from(self.hi - self.lo) + 1
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.lo <= addr && addr <= self.hi
    }

    /// Return the range as a single CIDR network if it is one aligned block.
    pub fn as_net(&self) -> Option<Ipv4Net> {
        let span = self.span();
        if !span.is_power_of_two() || u64::from(self.lo) % span != 0 {
            return None;
        }
        let prefix_len = 32 - span.trailing_zeros() as u8;
        Ipv4Net::new(Ipv4Addr::from(self.lo), prefix_len).ok()
    }

    /// Minimal set of aligned blocks covering the range.
    pub fn blocks(&self) -> Vec<PrefixBlock> {
        decompose(self.lo, self.hi, prefix::ADDR_WIDTH)
    }
}

impl From<Ipv4Net> for AddrRange {
    fn from(net: Ipv4Net) -> Self {
        Self::new(u32::from(net.network()), u32::from(net.broadcast()))
    }
}

impl FromStr for AddrRange {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FieldError::Address(s.to_string());

        if let Some((lo, hi)) = s.split_once('-') {
            let lo: Ipv4Addr = lo.trim().parse().map_err(|_| invalid())?;
            let hi: Ipv4Addr = hi.trim().parse().map_err(|_| invalid())?;
            return Ok(Self::new(u32::from(lo), u32::from(hi)));
        }

        if s.contains('/') {
            // Host bits are allowed and masked off, as ClassBench files carry them.
            let net: Ipv4Net = s.parse().map_err(|_| invalid())?;
            return Ok(Self::from(net));
        }

        let addr: Ipv4Addr = s.parse().map_err(|_| invalid())?;
        Ok(Self::new(u32::from(addr), u32::from(addr)))
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_net() {
            Some(net) => write!(f, "{}/{}", net.network(), net.prefix_len()),
            None => write!(f, "{}-{}", Ipv4Addr::from(self.lo), Ipv4Addr::from(self.hi)),
        }
    }
}

/// Inclusive transport port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub lo: u16,
    pub hi: u16,
}

impl PortRange {
    /// Create a range, swapping the bounds if they are reversed.
    pub fn new(lo: u16, hi: u16) -> Self {
        if lo <= hi {
            Self { lo, hi }
        } else {
            Self { lo: hi, hi: lo }
        }
    }

    pub fn any() -> Self {
        Self::new(0, u16::MAX)
    }

    pub fn contains(&self, port: u16) -> bool {
        self.lo <= port && port <= self.hi
    }

    /// Minimal set of aligned blocks covering the range.
    pub fn blocks(&self) -> Vec<PrefixBlock> {
        decompose(u32::from(self.lo), u32::from(self.hi), prefix::PORT_WIDTH)
    }

    /// Parse the three tokens `<lo> : <hi>`.
    fn parse_tokens(lo: &str, sep: &str, hi: &str) -> Result<Self, FieldError> {
        if sep != ":" {
            return Err(FieldError::Separator(sep.to_string()));
        }
        let lo: u16 = lo.parse().map_err(|_| FieldError::Port(lo.to_string()))?;
        let hi: u16 = hi.parse().map_err(|_| FieldError::Port(hi.to_string()))?;
        Ok(Self::new(lo, hi))
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.lo, self.hi)
    }
}

/// Protocol match: an exact value (mask 0xFF) or a wildcard (mask 0x00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Protocol {
    pub value: u8,
    pub mask: u8,
}

impl Protocol {
    pub fn exact(value: u8) -> Self {
        Self { value, mask: 0xFF }
    }

    pub fn wildcard() -> Self {
        Self { value: 0, mask: 0 }
    }

    pub fn is_wildcard(&self) -> bool {
        self.mask == 0
    }

    pub fn contains(&self, proto: u8) -> bool {
        self.is_wildcard() || self.value == proto
    }
}

fn parse_hex_u8(s: &str) -> Option<u8> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).ok()
}

impl FromStr for Protocol {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FieldError::Protocol(s.to_string());
        let (value, mask) = s.split_once('/').ok_or_else(invalid)?;
        let value = parse_hex_u8(value).ok_or_else(invalid)?;
        match parse_hex_u8(mask).ok_or_else(invalid)? {
            0xFF => Ok(Self::exact(value)),
            0x00 => Ok(Self::wildcard()),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}/0x{:02X}", self.value, self.mask)
    }
}

/// A single range-form classification rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rule {
    /// Priority ordinal (1 = highest). `None` when the id field is stripped.
    pub id: Option<u32>,
    pub src: AddrRange,
    pub dst: AddrRange,
    pub src_port: PortRange,
    pub dst_port: PortRange,
    pub protocol: Protocol,
}

impl Rule {
    /// A rule matching every packet.
    pub fn any() -> Self {
        Self {
            id: None,
            src: AddrRange::any(),
            dst: AddrRange::any(),
            src_port: PortRange::any(),
            dst_port: PortRange::any(),
            protocol: Protocol::wildcard(),
        }
    }

    pub fn with_id(mut self, id: Option<u32>) -> Self {
        self.id = id;
        self
    }

    /// Check whether a packet header falls inside every field of this rule.
    pub fn matches(&self, packet: &Packet) -> bool {
        self.src.contains(packet.src_ip)
            && self.dst.contains(packet.dst_ip)
            && self.src_port.contains(packet.src_port)
            && self.dst_port.contains(packet.dst_port)
            && self.protocol.contains(packet.protocol)
    }
}

impl FromStr for Rule {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('@');
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 9 && fields.len() != 10 {
            return Err(FieldError::FieldCount {
                expected: "9 or 10",
                actual: fields.len(),
            });
        }

        let id = match fields.get(9) {
            Some(raw) => Some(raw.parse().map_err(|_| FieldError::Id(raw.to_string()))?),
            None => None,
        };

        Ok(Self {
            id,
            src: fields[0].parse()?,
            dst: fields[1].parse()?,
            src_port: PortRange::parse_tokens(fields[2], fields[3], fields[4])?,
            dst_port: PortRange::parse_tokens(fields[5], fields[6], fields[7])?,
            protocol: fields[8].parse()?,
        })
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{} {} {} {} {}",
            self.src, self.dst, self.src_port, self.dst_port, self.protocol
        )?;
        if let Some(id) = self.id {
            write!(f, " {}", id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_classbench_line() {
        let rule: Rule = "@192.168.1.0/24 10.0.0.0/8 0 : 65535 80 : 80 0x06/0xFF 7"
            .parse()
            .unwrap();

        assert_eq!(rule.id, Some(7));
        assert_eq!(rule.src, AddrRange::new(0xC0A8_0100, 0xC0A8_01FF));
        assert_eq!(rule.dst.span(), 1 << 24);
        assert_eq!(rule.src_port, PortRange::any());
        assert_eq!(rule.dst_port, PortRange::new(80, 80));
        assert_eq!(rule.protocol, Protocol::exact(6));
    }

    #[test]
    fn test_parse_without_id_and_decoration() {
        let rule: Rule = "1.2.3.4 5.6.7.8/32 1 : 2 3 : 4 0x00/0x00".parse().unwrap();
        assert_eq!(rule.id, None);
        assert_eq!(rule.src.span(), 1);
        assert!(rule.protocol.is_wildcard());
    }

    #[test]
    fn test_parse_address_range_form() {
        let range: AddrRange = "10.0.0.5-10.0.0.9".parse().unwrap();
        assert_eq!(range.span(), 5);
        assert!(range.as_net().is_none());
        assert_eq!(range.to_string(), "10.0.0.5-10.0.0.9");
    }

    #[test]
    fn test_host_bits_are_masked() {
        let range: AddrRange = "10.1.2.3/16".parse().unwrap();
        assert_eq!(range.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_reversed_ports_are_swapped() {
        let rule: Rule = "@0.0.0.0/0 0.0.0.0/0 90 : 10 0 : 65535 0x11/0xFF"
            .parse()
            .unwrap();
        assert_eq!(rule.src_port, PortRange::new(10, 90));
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(
            "@1.2.3.4/32 5.6.7.8/32 0 : 1".parse::<Rule>(),
            Err(FieldError::FieldCount { actual: 5, .. })
        ));
        assert!(matches!(
            "@1.2.3.400/32 5.6.7.8/32 0 : 1 0 : 1 0x06/0xFF".parse::<Rule>(),
            Err(FieldError::Address(_))
        ));
        assert!(matches!(
            "@1.2.3.4/32 5.6.7.8/32 0 - 1 0 : 1 0x06/0xFF".parse::<Rule>(),
            Err(FieldError::Separator(_))
        ));
        assert!(matches!(
            "@1.2.3.4/32 5.6.7.8/32 0 : 70000 0 : 1 0x06/0xFF".parse::<Rule>(),
            Err(FieldError::Port(_))
        ));
        assert!(matches!(
            "@1.2.3.4/32 5.6.7.8/32 0 : 1 0 : 1 0x06/0x0F".parse::<Rule>(),
            Err(FieldError::Protocol(_))
        ));
        assert!(matches!(
            "@1.2.3.4/32 5.6.7.8/32 0 : 1 0 : 1 0x06/0xFF x".parse::<Rule>(),
            Err(FieldError::Id(_))
        ));
    }

    #[test]
    fn test_display_is_parseable() {
        let line = "@192.168.0.0/16 10.0.0.1/32 0 : 1023 443 : 443 0x06/0xFF 12";
        let rule: Rule = line.parse().unwrap();
        assert_eq!(rule.to_string(), line);
        assert_eq!(rule.to_string().parse::<Rule>().unwrap(), rule);
    }

    #[test]
    fn test_rule_matches_packet() {
        let rule: Rule = "@10.0.0.0/8 0.0.0.0/0 0 : 65535 80 : 80 0x06/0xFF 1"
            .parse()
            .unwrap();
        let hit = Packet::new(0x0A01_0203, 1, 5555, 80, 6, 1);
        let wrong_port = Packet::new(0x0A01_0203, 1, 5555, 81, 6, 1);
        let wrong_proto = Packet::new(0x0A01_0203, 1, 5555, 80, 17, 1);

        assert!(rule.matches(&hit));
        assert!(!rule.matches(&wrong_port));
        assert!(!rule.matches(&wrong_proto));
        assert!(Rule::any().matches(&wrong_proto));
    }
}
