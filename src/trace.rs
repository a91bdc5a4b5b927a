//! Labeled packet traces.
//!
//! A trace line is `<srcIP> <dstIP> <srcPort> <dstPort> <proto> <expectedRuleId>`,
//! all decimal integers.

use std::ffi::OsStr;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use crate::config::TraceParams;
use crate::output::{suffixed, write_lines};
use crate::rule::RuleSet;
use crate::{Config, Error, Result};

/// One synthetic packet header and the id of the rule it should match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet {
    pub src_ip: u32,
    pub dst_ip: u32,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub rule_id: u32,
}

impl Packet {
    pub fn new(
        src_ip: u32,
        dst_ip: u32,
        src_port: u16,
        dst_port: u16,
        protocol: u8,
        rule_id: u32,
    ) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            protocol,
            rule_id,
        }
    }
}

impl FromStr for Packet {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(format!("expected 6 fields, got {}", fields.len()));
        }

        let mut values = [0u32; 6];
        for (value, raw) in values.iter_mut().zip(&fields) {
            *value = raw
                .parse()
                .map_err(|_| format!("invalid integer: {}", raw))?;
        }

        // Ports and protocol are truncated to their field width, as the engine does.
        Ok(Self {
            src_ip: values[0],
            dst_ip: values[1],
            src_port: (values[2] & 0xFFFF) as u16,
            dst_port: (values[3] & 0xFFFF) as u16,
            protocol: (values[4] & 0xFF) as u8,
            rule_id: values[5],
        })
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.src_ip, self.dst_ip, self.src_port, self.dst_port, self.protocol, self.rule_id
        )
    }
}

/// An ordered list of labeled packets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trace {
    packets: Vec<Packet>,
}

impl Trace {
    pub fn new(packets: Vec<Packet>) -> Self {
        Self { packets }
    }

    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut packets = Vec::new();
        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let packet = line
                .parse::<Packet>()
                .map_err(|reason| Error::trace_line(idx + 1, reason))?;
            packets.push(packet);
        }
        Ok(Self { packets })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::file(path, e))?;
        Self::parse(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_lines(path, &self.packets)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    /// Smallest and largest expected rule id, if any packets.
    pub fn label_bounds(&self) -> Option<(u32, u32)> {
        let min = self.packets.iter().map(|p| p.rule_id).min()?;
        let max = self.packets.iter().map(|p| p.rule_id).max()?;
        Some((min, max))
    }
}

/// Rewrite each packet's expected id to the first rule that matches it.
///
/// Packets matching no rule keep their label. Returns the number of labels
/// changed.
pub fn relabel(rules: &RuleSet, trace: &mut Trace) -> usize {
    let mut changed = 0;
    for packet in &mut trace.packets {
        let Some(index) = rules.iter().position(|r| r.matches(packet)) else {
            continue;
        };
        let id = rules.ordinal(index);
        if packet.rule_id != id {
            packet.rule_id = id;
            changed += 1;
        }
    }
    changed
}

/// Produces a labeled trace for a rule file.
pub trait TraceGenerator: Send + Sync {
    /// Generate a trace for the (untagged) rule file at `rules` and return
    /// the trace file path. Labels are 1-based line numbers of `rules`.
    fn generate(&self, rules: &Path) -> Result<PathBuf>;
}

impl<G: TraceGenerator + ?Sized> TraceGenerator for &G {
    fn generate(&self, rules: &Path) -> Result<PathBuf> {
        (**self).generate(rules)
    }
}

/// Runs the ClassBench-style generator binary:
/// `<program> <pareto_a> <pareto_b> <scale> <rules>`, which writes
/// `<rules>_trace`.
#[derive(Debug, Clone)]
pub struct ProcessTraceGenerator {
    program: PathBuf,
    params: TraceParams,
}

impl ProcessTraceGenerator {
    pub fn new(program: impl Into<PathBuf>, params: TraceParams) -> Self {
        Self {
            program: program.into(),
            params,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.trace_generator_binary.clone(), config.trace_params)
    }
}

impl TraceGenerator for ProcessTraceGenerator {
    fn generate(&self, rules: &Path) -> Result<PathBuf> {
        let a = self.params.pareto_a.to_string();
        let b = self.params.pareto_b.to_string();
        let scale = self.params.scale.to_string();
        log::debug!(
            "generating trace: {:?} {} {} {} {:?}",
            self.program,
            a,
            b,
            scale,
            rules
        );

        let output = Command::new(&self.program)
            .args([OsStr::new(&a), OsStr::new(&b), OsStr::new(&scale)])
            .arg(rules)
            .output()
            .map_err(|e| Error::TraceGenerator(format!("{:?}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(Error::TraceGenerator(format!(
                "{:?} exited with {:?}: {}",
                self.program,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let trace = suffixed(rules, "trace");
        if !trace.is_file() {
            return Err(Error::TraceGenerator(format!(
                "{:?} did not produce {:?}",
                self.program, trace
            )));
        }
        Ok(trace)
    }
}
