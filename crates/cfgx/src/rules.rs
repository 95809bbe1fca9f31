//! 🧩 Rules: turning a pile of loose form fields into one composite setting per subsystem.
//!
//! 🎬 COLD OPEN: INT. SETTINGS PAGE, "HARDWARE" TAB
//!
//! The user typed `22` into "SCL" and `21` into "SDA" and clicked save. The device does
//! not want two settings. It wants one: `i2c_config = "scl=22,sda=21"`. Somebody has to
//! glue them together. Somebody has to know that `-1` means "not wired". That somebody
//! is a [`CompositeRule`].
//!
//! ## How dispatch works 📐
//!
//! ```text
//!   __cmdname__ ──▶ hint ──┐
//!                          ▼
//!   RULES[0] ─ matches? ── no ──▶ RULES[1] ─ matches? ── yes ──▶ build, consume claims
//!                                                                     │
//!                                       Flow::Stop ◀──────────────────┤
//!                                       (pass ends)                   │
//!                                       Flow::Continue ──▶ RULES[2] ...
//! ```
//!
//! - Priority is the table order in [`RuleSet::standard`]. Nothing else.
//! - A predicate matches on a hint token (case-insensitive substring), unless an
//!   exclusion token also matches. Without a usable hint, structural *fallback*
//!   evidence (which fields are present) decides instead. *Standing* evidence is
//!   checked no matter what the hint says.
//! - A hint is usable when it contains at least one token of at least one rule.
//!   "cfg-hw-gpio" names nothing we know, so it's treated like no hint at all.
//! - Every claimed field is consumed after the rule runs, built or not. A half-filled
//!   subsystem writes nothing and leaks nothing into the generic pass.
//!
//! The builders are plain functions over a read-only document. They produce writes;
//! the pipeline driver issues them. Pure in, pure out. Easy to test. 🦆

use std::borrow::Cow;

use tracing::{debug, info};

use crate::document::{COMMAND_HINT_FIELD, ConfigurationDocument, is_truthy};

pub(crate) mod hardware;
pub(crate) mod system;

// ===== Predicates =====

/// 🕵️ Which fields count as evidence for a rule.
#[derive(Debug, Clone, Copy)]
pub enum FieldSet {
    AllOf(&'static [&'static str]),
    AnyOf(&'static [&'static str]),
}

impl FieldSet {
    fn is_present_in(&self, doc: &ConfigurationDocument) -> bool {
        match self {
            FieldSet::AllOf(names) => names.iter().all(|name| doc.has(name)),
            FieldSet::AnyOf(names) => names.iter().any(|name| doc.has(name)),
        }
    }
}

/// When structural evidence is allowed to speak.
#[derive(Debug, Clone, Copy)]
pub enum Evidence {
    /// Hint tokens only.
    None,
    /// Consulted only when the hint is unusable (legacy callers that never send one).
    Fallback(FieldSet),
    /// Consulted always, hint or no hint.
    Standing(FieldSet),
}

#[derive(Debug, Clone, Copy)]
pub struct Predicate {
    pub tokens: &'static [&'static str],
    pub excluded_by: &'static [&'static str],
    pub evidence: Evidence,
}

impl Predicate {
    pub(crate) fn holds(&self, hint: Option<&str>, doc: &ConfigurationDocument) -> bool {
        if let Some(hint) = hint {
            if contains_any(hint, self.excluded_by) {
                return false;
            }
            if contains_any(hint, self.tokens) {
                return true;
            }
        }
        match self.evidence {
            Evidence::None => false,
            Evidence::Fallback(fields) => hint.is_none() && fields.is_present_in(doc),
            Evidence::Standing(fields) => fields.is_present_in(doc),
        }
    }
}

fn contains_any(hint: &str, tokens: &[&str]) -> bool {
    let hint = hint.to_ascii_lowercase();
    tokens
        .iter()
        .any(|token| hint.contains(&token.to_ascii_lowercase()))
}

// ===== Rules =====

/// 🚦 Does the pass stop after this rule fires?
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Stop,
    Continue,
}

/// ✍️ One string write a rule wants issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleWrite {
    pub key: Cow<'static, str>,
    pub value: String,
}

impl RuleWrite {
    pub fn new(key: impl Into<Cow<'static, str>>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// 📦 What a builder hands back: zero or one composite plus any side writes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleYield {
    pub composite: Option<String>,
    pub side_writes: Vec<RuleWrite>,
}

impl RuleYield {
    pub fn composite(value: String) -> Self {
        Self {
            composite: Some(value),
            side_writes: Vec::new(),
        }
    }

    pub fn with_side_write(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.side_writes.push(RuleWrite::new(key, value));
        self
    }
}

pub type Builder = fn(&ConfigurationDocument) -> RuleYield;

/// 🧩 One subsystem's rule: when it applies, what it claims, how it builds.
#[derive(Debug, Clone, Copy)]
pub struct CompositeRule {
    pub subsystem: &'static str,
    /// Where the composite goes. `None` for rules that only emit side writes.
    pub output_key: Option<&'static str>,
    pub claims: &'static [&'static str],
    pub predicate: Predicate,
    pub flow: Flow,
    pub build: Builder,
}

/// 📋 What happened when a rule fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub subsystem: &'static str,
    /// Claimed fields that were actually present (and are now consumed).
    pub claimed: usize,
    pub writes: Vec<RuleWrite>,
}

impl CompositeRule {
    /// 🔨 Build, then consume every claim. Consumption is unconditional.
    pub fn fire(&self, doc: &mut ConfigurationDocument) -> RuleOutcome {
        let built = (self.build)(doc);

        let mut writes = Vec::with_capacity(built.side_writes.len() + 1);
        match (built.composite, self.output_key) {
            (Some(value), Some(key)) => {
                info!("🧩 Built {key}: {value}");
                writes.push(RuleWrite::new(key, value));
            }
            (Some(value), None) => {
                debug!(
                    "🤷 {} built `{value}` but has no output key, dropping it",
                    self.subsystem
                );
            }
            (None, Some(key)) => {
                debug!("🫥 {} incomplete, {key} not written", self.subsystem);
            }
            (None, None) => {}
        }
        writes.extend(built.side_writes);

        let claimed = self
            .claims
            .iter()
            .filter(|name| doc.consume(name))
            .count();
        RuleOutcome {
            subsystem: self.subsystem,
            claimed,
            writes,
        }
    }
}

// ===== RuleSet =====

/// 📚 An ordered list of rules. Index 0 has the highest priority.
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: Vec<CompositeRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<CompositeRule>) -> Self {
        Self { rules }
    }

    /// 🏭 The device's rule table, in priority order.
    pub fn standard() -> Self {
        let mut rules = hardware::rules();
        rules.extend(system::rules());
        Self { rules }
    }

    /// 🔎 The hint, if it names any rule at all.
    fn usable_hint(&self, raw: Option<Cow<'_, str>>) -> Option<String> {
        let hint = raw?.trim().to_string();
        if hint.is_empty() {
            return None;
        }
        let names_a_rule = self
            .rules
            .iter()
            .any(|rule| contains_any(&hint, rule.predicate.tokens));
        names_a_rule.then_some(hint)
    }

    /// 🚀 One pass over the table. Consumes `__cmdname__` first, then fires rules in
    /// priority order until a `Flow::Stop` rule fires or the table runs out.
    pub fn apply(&self, doc: &mut ConfigurationDocument) -> Vec<RuleOutcome> {
        let raw_hint = doc.get_string(COMMAND_HINT_FIELD);
        if let Some(raw) = &raw_hint {
            info!("📨 Processing config for command: {raw}");
        }
        let hint = self.usable_hint(raw_hint);
        doc.consume(COMMAND_HINT_FIELD);

        let mut outcomes = Vec::new();
        for rule in &self.rules {
            if !rule.predicate.holds(hint.as_deref(), doc) {
                continue;
            }
            debug!("🎯 {} rule matched", rule.subsystem);
            let outcome = rule.fire(doc);
            info!(
                "🧾 {}: {} fields claimed, {} writes",
                outcome.subsystem,
                outcome.claimed,
                outcome.writes.len()
            );
            outcomes.push(outcome);
            if rule.flow == Flow::Stop {
                break;
            }
        }
        outcomes
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::standard()
    }
}

// ===== Composite line builder =====

/// 🚫 What "not configured" looks like for an optional field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    /// Only empty means absent.
    Empty,
    /// `-1`: an unwired GPIO.
    MinusOne,
    /// `--`: the "none selected" entry of a dropdown.
    DashDash,
    /// `0`: a length or timer that was left at zero.
    Zero,
}

impl Sentinel {
    fn marker(self) -> Option<&'static str> {
        match self {
            Sentinel::Empty => None,
            Sentinel::MinusOne => Some("-1"),
            Sentinel::DashDash => Some("--"),
            Sentinel::Zero => Some("0"),
        }
    }

    pub fn admits(self, value: &str) -> bool {
        !value.is_empty() && self.marker() != Some(value)
    }
}

/// 🎼 Comma-joined `name=value` assembly with sentinel and flag handling.
#[derive(Debug, Default)]
pub(crate) struct CompositeLine {
    line: String,
}

impl CompositeLine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn separator(&mut self) {
        if !self.line.is_empty() {
            self.line.push(',');
        }
    }

    /// Bare token (a display TYPE, a flag name).
    pub(crate) fn token(&mut self, token: &str) -> &mut Self {
        self.separator();
        self.line.push_str(token);
        self
    }

    pub(crate) fn pair(&mut self, name: &str, value: &str) -> &mut Self {
        self.separator();
        self.line.push_str(name);
        self.line.push('=');
        self.line.push_str(value);
        self
    }

    /// `,name=value` only when the value is set and not the sentinel. Returns whether it was added.
    pub(crate) fn optional(&mut self, name: &str, value: Option<&str>, sentinel: Sentinel) -> bool {
        match value {
            Some(value) if sentinel.admits(value) => {
                self.pair(name, value);
                true
            }
            _ => false,
        }
    }

    /// `,flag` when the value is truthy. Returns whether it was added.
    pub(crate) fn flag(&mut self, flag: &str, value: Option<&str>) -> bool {
        if value.is_some_and(is_truthy) {
            self.token(flag);
            true
        } else {
            false
        }
    }

    /// Glue a suffix onto the last fragment, no separator (`driver=X` + `:depth`).
    pub(crate) fn suffix(&mut self, suffix: &str) -> &mut Self {
        self.line.push_str(suffix);
        self
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.line.is_empty()
    }

    pub(crate) fn finish(self) -> String {
        self.line
    }
}

/// All required fields as non-empty strings, or nothing.
pub(crate) fn required<'d, const N: usize>(
    doc: &'d ConfigurationDocument,
    names: [&str; N],
) -> Option<[Cow<'d, str>; N]> {
    let mut values: [Option<Cow<'d, str>>; N] = std::array::from_fn(|_| None);
    for (slot, name) in values.iter_mut().zip(names) {
        *slot = Some(doc.get_non_empty(name)?);
    }
    Some(values.map(|value| value.unwrap_or_default()))
}
