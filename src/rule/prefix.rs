//! Range-to-prefix decomposition and prefix-form rules.
//!
//! Prefix-mode engines only accept (value, length) pairs, so range rules are
//! expanded into the cross product of the aligned blocks covering each field.

use ahash::AHashSet;
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;

use super::{Protocol, RuleSet};
use crate::error::FieldError;
use crate::output::write_lines;
use crate::trace::Packet;
use crate::{Error, Result};

/// Bit width of an IPv4 address field.
pub const ADDR_WIDTH: u8 = 32;
/// Bit width of a transport port field.
pub const PORT_WIDTH: u8 = 16;

/// An aligned power-of-two block `[base, base + 2^(width - mask_len) - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefixBlock {
    pub base: u32,
    pub mask_len: u8,
    pub width: u8,
}

impl PrefixBlock {
    pub fn new(base: u32, mask_len: u8, width: u8) -> Self {
        Self {
            base,
            mask_len,
            width,
        }
    }

    /// Number of values covered.
    pub fn size(&self) -> u64 {
        1u64 << (self.width - self.mask_len)
    }

    /// Last value covered (inclusive).
    pub fn end(&self) -> u32 {
        (u64::from(self.base) + self.size() - 1) as u32
    }

    pub fn contains(&self, value: u32) -> bool {
        self.base <= value && value <= self.end()
    }

    pub fn is_aligned(&self) -> bool {
        u64::from(self.base) % self.size() == 0
    }
}

impl From<Ipv4Net> for PrefixBlock {
    fn from(net: Ipv4Net) -> Self {
        Self::new(u32::from(net.network()), net.prefix_len(), ADDR_WIDTH)
    }
}

/// Split `[begin, end]` into the minimal ordered list of aligned blocks.
///
/// Greedy: from `begin`, take the largest block that is aligned at `begin`
/// and does not pass `end`, then continue after it. An empty range
/// (`end < begin`) yields no blocks. `width` must be at most 32.
///
/// ```
/// use rulesplit::rule::{decompose, PrefixBlock};
///
/// assert_eq!(decompose(0, 3, 16), vec![PrefixBlock::new(0, 14, 16)]);
/// assert_eq!(decompose(5, 5, 16), vec![PrefixBlock::new(5, 16, 16)]);
/// ```
pub fn decompose(begin: u32, end: u32, width: u8) -> Vec<PrefixBlock> {
    debug_assert!(width <= ADDR_WIDTH);
    let mut blocks = Vec::new();
    let end = u64::from(end);
    let mut cur = u64::from(begin);

    while cur <= end {
        let mut k = cur.trailing_zeros().min(u32::from(width));
        while cur + (1u64 << k) - 1 > end {
            k -= 1;
        }
        blocks.push(PrefixBlock::new(cur as u32, width - k as u8, width));
        cur += 1u64 << k;
    }

    blocks
}

/// How ids are assigned when one range rule expands to several prefix rules.
///
/// Both policies keep ids non-decreasing in emission order, so the lowest-id
/// match in prefix form is the first match in range form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdAssignment {
    /// Every expansion keeps the parent's ordinal, so ids still line up with
    /// trace labels.
    #[default]
    Inherit,
    /// The whole output is renumbered `1..=M` in emission order, giving every
    /// prefix rule a distinct id.
    Fresh,
}

/// A prefix-form rule: `@sip/len dip/len sport/len dport/len proto/mask id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrefixRule {
    pub id: u32,
    pub src: PrefixBlock,
    pub dst: PrefixBlock,
    pub src_port: PrefixBlock,
    pub dst_port: PrefixBlock,
    pub protocol: Protocol,
}

impl PrefixRule {
    pub fn matches(&self, packet: &Packet) -> bool {
        self.src.contains(packet.src_ip)
            && self.dst.contains(packet.dst_ip)
            && self.src_port.contains(u32::from(packet.src_port))
            && self.dst_port.contains(u32::from(packet.dst_port))
            && self.protocol.contains(packet.protocol)
    }

    /// Prefix lengths of the four address/port fields.
    pub fn length_tuple(&self) -> (u8, u8, u8, u8) {
        (
            self.src.mask_len,
            self.dst.mask_len,
            self.src_port.mask_len,
            self.dst_port.mask_len,
        )
    }
}

fn parse_port_prefix(s: &str) -> std::result::Result<PrefixBlock, FieldError> {
    let invalid = || FieldError::Prefix(s.to_string());
    let (value, len) = s.split_once('/').ok_or_else(invalid)?;
    let value: u16 = value.parse().map_err(|_| invalid())?;
    let len: u8 = len.parse().map_err(|_| invalid())?;
    if len > PORT_WIDTH {
        return Err(invalid());
    }
    let block = PrefixBlock::new(u32::from(value), len, PORT_WIDTH);
    if !block.is_aligned() {
        return Err(invalid());
    }
    Ok(block)
}

fn parse_addr_prefix(s: &str) -> std::result::Result<PrefixBlock, FieldError> {
    let net: Ipv4Net = s.parse().map_err(|_| FieldError::Address(s.to_string()))?;
    Ok(PrefixBlock::from(net.trunc()))
}

impl FromStr for PrefixRule {
    type Err = FieldError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().trim_start_matches('@');
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(FieldError::FieldCount {
                expected: "6",
                actual: fields.len(),
            });
        }

        Ok(Self {
            src: parse_addr_prefix(fields[0])?,
            dst: parse_addr_prefix(fields[1])?,
            src_port: parse_port_prefix(fields[2])?,
            dst_port: parse_port_prefix(fields[3])?,
            protocol: fields[4].parse()?,
            id: fields[5]
                .parse()
                .map_err(|_| FieldError::Id(fields[5].to_string()))?,
        })
    }
}

impl fmt::Display for PrefixRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "@{}/{} {}/{} {}/{} {}/{} {} {}",
            Ipv4Addr::from(self.src.base),
            self.src.mask_len,
            Ipv4Addr::from(self.dst.base),
            self.dst.mask_len,
            self.src_port.base,
            self.src_port.mask_len,
            self.dst_port.base,
            self.dst_port.mask_len,
            self.protocol,
            self.id
        )
    }
}

/// Expand every rule of `rules` into prefix form.
///
/// Output order follows input order, then source address, destination
/// address, source port and destination port blocks, so the result is
/// deterministic for a fixed input.
pub fn to_prefix_rules(rules: &RuleSet, ids: IdAssignment) -> Vec<PrefixRule> {
    let mut out = Vec::with_capacity(rules.len());
    let mut next_fresh = 1u32;

    for (idx, rule) in rules.iter().enumerate() {
        let ordinal = rules.ordinal(idx);
        let srcs = rule.src.blocks();
        let dsts = rule.dst.blocks();
        let src_ports = rule.src_port.blocks();
        let dst_ports = rule.dst_port.blocks();

        for &src in &srcs {
            for &dst in &dsts {
                for &src_port in &src_ports {
                    for &dst_port in &dst_ports {
                        let id = match ids {
                            IdAssignment::Inherit => ordinal,
                            IdAssignment::Fresh => {
                                next_fresh += 1;
                                next_fresh - 1
                            }
                        };
                        out.push(PrefixRule {
                            id,
                            src,
                            dst,
                            src_port,
                            dst_port,
                            protocol: rule.protocol,
                        });
                    }
                }
            }
        }
    }

    out
}

/// Load a prefix-form rule file.
pub fn load_prefix_rules(path: &Path) -> Result<Vec<PrefixRule>> {
    let file = File::open(path).map_err(|e| Error::file(path, e))?;
    let mut rules = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| Error::file(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let rule = line
            .parse::<PrefixRule>()
            .map_err(|e| Error::rule_line(idx + 1, e.to_string()))?;
        rules.push(rule);
    }

    Ok(rules)
}

/// Write prefix-form rules, one per line.
pub fn save_prefix_rules(path: &Path, rules: &[PrefixRule]) -> Result<()> {
    write_lines(path, rules)
}

/// Distinct prefix-length tuples in a prefix rule set, sorted.
///
/// Tuple-space engines build one hash table per tuple, so this is a quick
/// proxy for their build cost.
pub fn tuple_stats(rules: &[PrefixRule]) -> Vec<(u8, u8, u8, u8)> {
    let set: AHashSet<_> = rules.iter().map(PrefixRule::length_tuple).collect();
    let mut tuples: Vec<_> = set.into_iter().collect();
    tuples.sort_unstable();
    tuples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::Rule;

    fn covered(blocks: &[PrefixBlock]) -> Vec<u32> {
        blocks.iter().flat_map(|b| b.base..=b.end()).collect()
    }

    #[test]
    fn test_decompose_known_values() {
        assert_eq!(decompose(5, 5, 16), vec![PrefixBlock::new(5, 16, 16)]);
        assert_eq!(decompose(0, 3, 16), vec![PrefixBlock::new(0, 14, 16)]);
        assert_eq!(decompose(0, 65535, 16), vec![PrefixBlock::new(0, 0, 16)]);
        assert_eq!(
            decompose(1, 6, 16),
            vec![
                PrefixBlock::new(1, 16, 16),
                PrefixBlock::new(2, 15, 16),
                PrefixBlock::new(4, 15, 16),
                PrefixBlock::new(6, 16, 16),
            ]
        );
    }

    #[test]
    fn test_decompose_empty_range() {
        assert!(decompose(10, 9, 16).is_empty());
    }

    #[test]
    fn test_decompose_full_address_space() {
        assert_eq!(decompose(0, u32::MAX, 32), vec![PrefixBlock::new(0, 0, 32)]);
        assert_eq!(
            decompose(u32::MAX, u32::MAX, 32),
            vec![PrefixBlock::new(u32::MAX, 32, 32)]
        );
    }

    #[test]
    fn test_decompose_covers_exactly() {
        for &(b, e) in &[(0u32, 0u32), (1, 1023), (1024, 65535), (3, 17), (80, 8080)] {
            let blocks = decompose(b, e, 16);
            assert!(blocks.iter().all(PrefixBlock::is_aligned));
            // Ordered, contiguous, non-overlapping union equal to [b, e].
            assert_eq!(covered(&blocks), (b..=e).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_decompose_is_minimal_for_worst_case() {
        // [1, 65534] is the classic worst case: 2 * (16 - 1) blocks.
        assert_eq!(decompose(1, 65534, 16).len(), 30);
    }

    #[test]
    fn test_prefix_rule_parse_and_display() {
        let line = "@10.0.0.0/8 192.168.1.0/24 0/0 1024/6 0x06/0xFF 3";
        let rule: PrefixRule = line.parse().unwrap();
        assert_eq!(rule.id, 3);
        assert_eq!(rule.length_tuple(), (8, 24, 0, 6));
        assert_eq!(rule.to_string(), line);
    }

    #[test]
    fn test_prefix_rule_rejects_unaligned_port() {
        assert!(matches!(
            "@10.0.0.0/8 10.0.0.0/8 3/15 0/0 0x06/0xFF 1".parse::<PrefixRule>(),
            Err(FieldError::Prefix(_))
        ));
        assert!(matches!(
            "@10.0.0.0/8 10.0.0.0/8 0/0 0x06/0xFF 1".parse::<PrefixRule>(),
            Err(FieldError::FieldCount { actual: 5, .. })
        ));
    }

    fn rules(lines: &[&str]) -> RuleSet {
        lines.iter().map(|l| l.parse::<Rule>().unwrap()).collect()
    }

    #[test]
    fn test_single_expansion_keeps_ordinal() {
        let set = rules(&["@1.0.0.0/8 2.0.0.0/8 0 : 65535 80 : 80 0x06/0xFF 4"]);
        let out = to_prefix_rules(&set, IdAssignment::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 4);
        assert_eq!(out[0].dst_port, PrefixBlock::new(80, 16, 16));
    }

    #[test]
    fn test_cross_product_with_fresh_ids() {
        let set = rules(&[
            "@1.0.0.0/8 2.0.0.0/8 0 : 65535 0 : 65535 0x06/0xFF",
            // src [1, 2] -> 2 blocks, dst [0, 5] -> 2 blocks
            "@1.0.0.0/8 2.0.0.0/8 1 : 2 0 : 5 0x06/0xFF",
            "@1.0.0.0/8 2.0.0.0/8 0 : 65535 0 : 65535 0x11/0xFF",
        ]);
        let out = to_prefix_rules(&set, IdAssignment::Fresh);
        let ids: Vec<u32> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

        let again = to_prefix_rules(&set, IdAssignment::Fresh);
        assert_eq!(out, again);
    }

    #[test]
    fn test_cross_product_with_inherited_ids() {
        let set = rules(&["@1.0.0.0/8 2.0.0.0/8 1 : 2 0 : 5 0x06/0xFF 9"]);
        let out = to_prefix_rules(&set, IdAssignment::Inherit);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|r| r.id == 9));
    }

    /// Lowest id among the prefix rules matching `packet`.
    fn prefix_winner(out: &[PrefixRule], packet: &Packet) -> Option<u32> {
        out.iter().filter(|r| r.matches(packet)).map(|r| r.id).min()
    }

    #[test]
    fn test_expansion_preserves_first_match() {
        let set = rules(&[
            "@10.0.0.0/8 0.0.0.0/0 1 : 2 0 : 65535 0x06/0xFF",
            "@10.0.0.0/8 0.0.0.0/0 0 : 65535 0 : 65535 0x06/0xFF",
            "@10.0.0.0/8 0.0.0.0/0 5 : 9 80 : 81 0x00/0x00",
        ]);
        let packets = [
            Packet::new(0x0A00_0001, 1, 1, 80, 6, 0),
            Packet::new(0x0A00_0001, 1, 2, 80, 6, 0),
            Packet::new(0x0A00_0001, 1, 7, 81, 17, 0),
            Packet::new(0x0A00_0001, 1, 7, 81, 6, 0),
            Packet::new(0x0B00_0001, 1, 1, 80, 6, 0),
        ];

        let inherit = to_prefix_rules(&set, IdAssignment::Inherit);
        let fresh = to_prefix_rules(&set, IdAssignment::Fresh);
        assert!(fresh.windows(2).all(|w| w[0].id < w[1].id));

        for packet in &packets {
            let first = set.iter().position(|r| r.matches(packet));
            let range_winner = first.map(|i| set.ordinal(i));
            assert_eq!(prefix_winner(&inherit, packet), range_winner);

            // Fresh ids differ from ordinals but pick the same parent rule.
            let fresh_parent = prefix_winner(&fresh, packet)
                .map(|id| inherit[fresh.iter().position(|r| r.id == id).unwrap()].id);
            assert_eq!(fresh_parent, range_winner);
        }
    }

    #[test]
    fn test_address_range_is_decomposed() {
        let set = rules(&["@10.0.0.1-10.0.0.2 2.0.0.0/8 0 : 65535 0 : 65535 0x06/0xFF 1"]);
        let out = to_prefix_rules(&set, IdAssignment::Inherit);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].src, PrefixBlock::new(0x0A00_0001, 32, 32));
        assert_eq!(out[1].src, PrefixBlock::new(0x0A00_0002, 32, 32));
    }

    #[test]
    fn test_tuple_stats() {
        let set = rules(&[
            "@1.0.0.0/8 2.0.0.0/8 0 : 65535 80 : 80 0x06/0xFF",
            "@3.0.0.0/8 4.0.0.0/8 0 : 65535 443 : 443 0x06/0xFF",
            "@5.0.0.0/16 4.0.0.0/8 0 : 65535 443 : 443 0x06/0xFF",
        ]);
        let out = to_prefix_rules(&set, IdAssignment::Fresh);
        assert_eq!(tuple_stats(&out), vec![(8, 8, 0, 16), (16, 8, 0, 16)]);
    }

    #[test]
    fn test_save_and_load_prefix_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules_p");
        let set = rules(&["@1.0.0.0/8 2.0.0.0/8 1 : 2 0 : 5 0x06/0xFF 1"]);
        let out = to_prefix_rules(&set, IdAssignment::Fresh);
        save_prefix_rules(&path, &out).unwrap();
        assert_eq!(load_prefix_rules(&path).unwrap(), out);
    }
}
