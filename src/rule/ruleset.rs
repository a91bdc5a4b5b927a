//! Ordered rule collections and their on-disk form.

use rand::Rng;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use super::Rule;
use crate::output::write_lines;
use crate::{Error, Result};

/// An ordered list of rules. Position is priority: the first rule wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Parse rules from a reader, one per line. Blank lines are skipped.
    ///
    /// Any malformed line aborts the whole load.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut rules = Vec::new();

        for (idx, line) in BufReader::new(reader).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let rule = line
                .parse::<Rule>()
                .map_err(|e| Error::rule_line(idx + 1, e.to_string()))?;
            rules.push(rule);
        }

        Ok(Self { rules })
    }

    /// Load a rule file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::file(path, e))?;
        Self::parse(file)
    }

    /// Write the rules to `path`, one per line.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_lines(path, &self.rules)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn into_rules(self) -> Vec<Rule> {
        self.rules
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// True when every rule carries the id field.
    pub fn is_tagged(&self) -> bool {
        !self.rules.is_empty() && self.rules.iter().all(|r| r.id.is_some())
    }

    /// Priority ordinal of the rule at `index`: its id, or its 1-based position.
    pub fn ordinal(&self, index: usize) -> u32 {
        self.rules[index].id.unwrap_or(index as u32 + 1)
    }

    /// Highest ordinal in the set (0 when empty).
    pub fn max_ordinal(&self) -> u32 {
        (0..self.rules.len())
            .map(|i| self.ordinal(i))
            .max()
            .unwrap_or(0)
    }

    /// Copy with sequential ids `start, start + 1, ...` in list order.
    pub fn tagged(&self, start: u32) -> Self {
        let rules = self
            .rules
            .iter()
            .zip(start..)
            .map(|(rule, id)| rule.with_id(Some(id)))
            .collect();
        Self { rules }
    }

    /// Copy with the id field stripped from every rule.
    pub fn untagged(&self) -> Self {
        let rules = self.rules.iter().map(|r| r.with_id(None)).collect();
        Self { rules }
    }

    /// `self` followed by `other`, both keeping their relative order.
    pub fn concat(&self, other: &RuleSet) -> Self {
        let mut rules = Vec::with_capacity(self.len() + other.len());
        rules.extend_from_slice(&self.rules);
        rules.extend_from_slice(&other.rules);
        Self { rules }
    }

    /// Sample a base/delta pair for update experiments.
    ///
    /// The set is tagged first if needed. Every rule except the last goes to
    /// the delta with probability `1 / one_in`; the last rule always stays in
    /// the base so the base is never empty.
    pub fn split_for_update<R: Rng + ?Sized>(&self, rng: &mut R, one_in: u32) -> (Self, Self) {
        let source = if self.is_tagged() {
            self.clone()
        } else {
            self.tagged(1)
        };

        let mut base = Vec::new();
        let mut delta = Vec::new();
        let Some((last, rest)) = source.rules.split_last() else {
            return (Self::new(), Self::new());
        };

        for rule in rest {
            if rng.gen_range(1..=one_in.max(1)) == 1 {
                delta.push(*rule);
            } else {
                base.push(*rule);
            }
        }
        base.push(*last);

        (Self { rules: base }, Self { rules: delta })
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}
