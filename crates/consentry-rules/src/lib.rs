//! Consentry Rule Engine
//!
//! Declarative blocking rules that decide which embedded resources of a page
//! belong to which consent category.
//!
//! Rules are defined in YAML or JSON and specify:
//! - The element class they apply to (script, inline script, iframe, link)
//! - How the element's identifying string is compared (exact, contains,
//!   prefix, suffix, regex)
//! - The consent category that must be accepted before the element may run
//! - For iframes, what replaces the blocked source

pub mod engine;
pub mod matcher;
pub mod rule;
pub mod source;
pub mod version;

pub use engine::{CompiledRule, RuleMatch, RuleSet};
pub use matcher::{matches, RuleMatcher};
pub use rule::{IframeReplacement, MatchType, Rule, RuleKind, RuleRecord};
pub use source::{FileRuleSource, RuleSource, StaticRuleSource};
pub use version::version_hash;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::{CompiledRule, RuleMatch, RuleSet};
    pub use crate::matcher::RuleMatcher;
    pub use crate::rule::{IframeReplacement, MatchType, Rule, RuleKind};
    pub use crate::source::RuleSource;
}
