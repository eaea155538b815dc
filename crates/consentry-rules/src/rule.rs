//! Blocking rule definitions

use consentry_core::ElementKind;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Element class named by a stored rule record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Script,
    Inline,
    Iframe,
    Link,
    /// Anything this version does not understand
    #[serde(other)]
    Unknown,
}

/// How a rule's `match_value` is compared against an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Value equals `match_value`
    Exact,
    /// `match_value` is a substring of the value
    Contains,
    /// Value starts with `match_value`
    #[serde(alias = "starts_with")]
    StartsWith,
    /// Value ends with `match_value`
    #[serde(alias = "ends_with")]
    EndsWith,
    /// `match_value` is a regular expression
    Regex,
    /// Unrecognized strategy; never matches
    #[serde(other)]
    Unknown,
}

/// What replaces a blocked iframe's source, as stored in a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplacementType {
    Placeholder,
    #[serde(other)]
    Clean,
}

/// Flat rule record as stored by the configuration backend.
///
/// This is the loosely typed shape found in rule files and database rows.
/// It is converted into a [`Rule`] before use, which drops the fields that do
/// not apply to the rule's element class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleRecord {
    /// Optional identifier, used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Element class the rule applies to
    pub rule_type: RuleType,

    /// Comparison strategy
    pub match_type: MatchType,

    /// Literal or pattern compared against the element
    pub match_value: String,

    /// Consent category guarding the element
    pub category: String,

    /// Iframe replacement strategy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_type: Option<ReplacementType>,

    /// Iframe placeholder URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement_value: Option<String>,

    /// Inactive rules are never evaluated
    #[serde(default = "default_true", deserialize_with = "deserialize_flag")]
    pub is_active: bool,
}

/// Replacement applied to a blocked iframe's live source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IframeReplacement {
    /// Point the iframe at a placeholder resource
    Placeholder {
        /// Placeholder URL
        url: String,
    },
    /// Point the iframe at an inert blank target
    Clean,
}

impl IframeReplacement {
    /// Inert target used by [`IframeReplacement::Clean`]
    pub const BLANK: &'static str = "about:blank";

    /// Source the blocked iframe is pointed at
    pub fn source(&self) -> &str {
        match self {
            IframeReplacement::Placeholder { url } => url,
            IframeReplacement::Clean => Self::BLANK,
        }
    }
}

/// Element class of a rule, with the settings only that class can carry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule_type", rename_all = "lowercase")]
pub enum RuleKind {
    /// Scripts with a source, matched on the source URL
    Script,
    /// Inline scripts, matched on their text
    Inline,
    /// Iframes, matched on the source URL
    Iframe {
        /// What replaces the source when blocked
        replacement: IframeReplacement,
    },
    /// Anchors, matched on the destination URL
    Link,
}

impl RuleKind {
    /// Element class this kind of rule targets
    pub fn element_kind(&self) -> ElementKind {
        match self {
            RuleKind::Script => ElementKind::Script,
            RuleKind::Inline => ElementKind::Inline,
            RuleKind::Iframe { .. } => ElementKind::Iframe,
            RuleKind::Link => ElementKind::Link,
        }
    }
}

/// A configured blocking directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    /// Optional identifier, used in logs
    pub id: Option<String>,

    /// Element class and class-specific settings
    pub kind: RuleKind,

    /// Comparison strategy
    pub match_type: MatchType,

    /// Literal or pattern compared against the element
    pub match_value: String,

    /// Consent category guarding the element
    pub category: String,

    /// Inactive rules are never evaluated
    pub active: bool,
}

impl Rule {
    /// Create an active rule
    pub fn new(
        kind: RuleKind,
        match_type: MatchType,
        match_value: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            kind,
            match_type,
            match_value: match_value.into(),
            category: category.into(),
            active: true,
        }
    }

    /// Script rule matched on the source URL
    pub fn script(match_type: MatchType, value: impl Into<String>, category: impl Into<String>) -> Self {
        Self::new(RuleKind::Script, match_type, value, category)
    }

    /// Inline script rule matched on the script text
    pub fn inline(match_type: MatchType, value: impl Into<String>, category: impl Into<String>) -> Self {
        Self::new(RuleKind::Inline, match_type, value, category)
    }

    /// Iframe rule with the given replacement
    pub fn iframe(
        match_type: MatchType,
        value: impl Into<String>,
        category: impl Into<String>,
        replacement: IframeReplacement,
    ) -> Self {
        Self::new(RuleKind::Iframe { replacement }, match_type, value, category)
    }

    /// Link rule matched on the destination URL
    pub fn link(match_type: MatchType, value: impl Into<String>, category: impl Into<String>) -> Self {
        Self::new(RuleKind::Link, match_type, value, category)
    }

    /// Set the identifier
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Mark the rule inactive
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Element class this rule targets
    pub fn element_kind(&self) -> ElementKind {
        self.kind.element_kind()
    }

    /// Label used in log lines
    pub fn label(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.match_value)
    }

    /// Convert a stored record.
    ///
    /// Returns `None` for records whose `rule_type` is not understood or whose
    /// category is blank; such records can never apply to an element.
    pub fn from_record(record: RuleRecord) -> Option<Self> {
        let category = record.category.trim().to_string();
        if category.is_empty() {
            warn!(rule = ?record.id, "Skipping rule without a category");
            return None;
        }

        let kind = match record.rule_type {
            RuleType::Script => RuleKind::Script,
            RuleType::Inline => RuleKind::Inline,
            RuleType::Link => RuleKind::Link,
            RuleType::Iframe => {
                let replacement = match (record.replacement_type, record.replacement_value) {
                    (Some(ReplacementType::Placeholder), Some(url)) if !url.trim().is_empty() => {
                        IframeReplacement::Placeholder { url }
                    }
                    _ => IframeReplacement::Clean,
                };
                RuleKind::Iframe { replacement }
            }
            RuleType::Unknown => {
                warn!(rule = ?record.id, "Skipping rule with unsupported rule_type");
                return None;
            }
        };

        Some(Self {
            id: record.id,
            kind,
            match_type: record.match_type,
            match_value: record.match_value,
            category,
            active: record.is_active,
        })
    }

    /// Flatten back into the stored record shape
    pub fn to_record(&self) -> RuleRecord {
        let (rule_type, replacement_type, replacement_value) = match &self.kind {
            RuleKind::Script => (RuleType::Script, None, None),
            RuleKind::Inline => (RuleType::Inline, None, None),
            RuleKind::Link => (RuleType::Link, None, None),
            RuleKind::Iframe { replacement } => match replacement {
                IframeReplacement::Placeholder { url } => (
                    RuleType::Iframe,
                    Some(ReplacementType::Placeholder),
                    Some(url.clone()),
                ),
                IframeReplacement::Clean => (RuleType::Iframe, Some(ReplacementType::Clean), None),
            },
        };

        RuleRecord {
            id: self.id.clone(),
            rule_type,
            match_type: self.match_type,
            match_value: self.match_value.clone(),
            category: self.category.clone(),
            replacement_type,
            replacement_value,
            is_active: self.active,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Accept `true`/`false`, `0`/`1` and their string forms, as written by
/// database exports.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
        Flag::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
    })
}
