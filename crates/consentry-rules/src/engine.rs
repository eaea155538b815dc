//! Ordered rule evaluation

use consentry_core::{ElementKind, Error, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

use crate::matcher::RuleMatcher;
use crate::rule::{Rule, RuleKind, RuleRecord};
use crate::version::version_hash;

/// A rule together with its compiled matcher
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// The rule definition
    pub rule: Rule,

    /// Position in load order
    pub index: usize,

    matcher: RuleMatcher,
}

impl CompiledRule {
    fn new(rule: Rule, index: usize) -> Self {
        let matcher = RuleMatcher::compile(&rule);
        Self {
            rule,
            index,
            matcher,
        }
    }

    /// Whether `value` matches this rule
    pub fn matches(&self, value: &str) -> bool {
        self.matcher.matches(value)
    }
}

/// Outcome of evaluating one element against the rule set
#[derive(Debug, Clone, Copy)]
pub struct RuleMatch<'a> {
    /// The first rule that matched
    pub rule: &'a Rule,

    /// Position of that rule in load order
    pub index: usize,
}

impl<'a> RuleMatch<'a> {
    /// Category the matched rule assigns
    pub fn category(&self) -> &'a str {
        &self.rule.category
    }

    /// Kind-specific settings of the matched rule
    pub fn kind(&self) -> &'a RuleKind {
        &self.rule.kind
    }
}

/// Rule file layout: either a bare list or a named document with `rules`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleFile {
    Document {
        #[serde(default)]
        name: Option<String>,
        rules: Vec<RuleRecord>,
    },
    List(Vec<RuleRecord>),
}

impl RuleFile {
    fn into_records(self) -> Vec<RuleRecord> {
        match self {
            RuleFile::Document { name, rules } => {
                if let Some(name) = name {
                    debug!(rule_file = %name, count = rules.len(), "Parsed rule document");
                }
                rules
            }
            RuleFile::List(rules) => rules,
        }
    }
}

/// Active rules in load order, compiled for evaluation.
///
/// The set is immutable once built, so it can be shared between requests
/// behind an `Arc` without locking.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Build a set from rules, dropping inactive ones and keeping load order
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> Self {
        let rules = rules
            .into_iter()
            .filter(|rule| rule.active)
            .enumerate()
            .map(|(index, rule)| CompiledRule::new(rule, index))
            .collect();

        Self { rules }
    }

    /// Build a set from stored records, skipping records that cannot apply
    pub fn from_records(records: impl IntoIterator<Item = RuleRecord>) -> Self {
        Self::new(records.into_iter().filter_map(Rule::from_record))
    }

    /// Load rules from a YAML document
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: RuleFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::rule(format!("invalid rule YAML: {}", e)))?;
        Ok(Self::from_records(file.into_records()))
    }

    /// Load rules from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let file: RuleFile = serde_json::from_str(json)?;
        Ok(Self::from_records(file.into_records()))
    }

    /// Load rules from a `.yaml`, `.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let set = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(&content)?,
            Some("yaml") | Some("yml") => Self::from_yaml(&content)?,
            _ => {
                return Err(Error::rule(format!(
                    "unsupported rule file extension: {}",
                    path.display()
                )))
            }
        };

        info!(path = %path.display(), rules = set.len(), "Loaded blocking rules");
        Ok(set)
    }

    /// Find the first rule of `kind` that matches `value`.
    ///
    /// Evaluation stops at the first match, so later rules never affect an
    /// element that an earlier rule already claimed.
    pub fn first_match(&self, kind: ElementKind, value: &str) -> Option<RuleMatch<'_>> {
        self.for_kind(kind)
            .find(|compiled| compiled.matches(value))
            .map(|compiled| RuleMatch {
                rule: &compiled.rule,
                index: compiled.index,
            })
    }

    /// Rules targeting `kind`, in load order
    pub fn for_kind(&self, kind: ElementKind) -> impl Iterator<Item = &CompiledRule> {
        self.rules
            .iter()
            .filter(move |compiled| compiled.rule.element_kind() == kind)
    }

    /// Whether any rule targets `kind`
    pub fn has_kind(&self, kind: ElementKind) -> bool {
        self.for_kind(kind).next().is_some()
    }

    /// All active rules, in load order
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    /// Number of active rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no active rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fingerprint of these rules and the given category configuration
    pub fn version_hash(&self, categories: &[String]) -> String {
        let rules: Vec<Rule> = self.rules().cloned().collect();
        version_hash(&rules, categories)
    }
}
