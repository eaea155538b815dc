//! Rule sources
//!
//! The configuration backend owns the rules; the engine only reads them.

use consentry_core::Result;
use std::path::PathBuf;

use crate::engine::RuleSet;
use crate::rule::Rule;

/// Supplier of the active, ordered rule list
pub trait RuleSource: Send + Sync {
    /// Load the active rules in evaluation order
    fn active_rules(&self) -> Result<RuleSet>;
}

/// Rules held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticRuleSource {
    rules: Vec<Rule>,
}

impl StaticRuleSource {
    /// Create a source from a fixed rule list
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }
}

impl RuleSource for StaticRuleSource {
    fn active_rules(&self) -> Result<RuleSet> {
        Ok(RuleSet::new(self.rules.iter().cloned()))
    }
}

/// Rules read from a YAML or JSON file on every load
#[derive(Debug, Clone)]
pub struct FileRuleSource {
    path: PathBuf,
}

impl FileRuleSource {
    /// Create a source backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path the rules are read from
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl RuleSource for FileRuleSource {
    fn active_rules(&self) -> Result<RuleSet> {
        RuleSet::from_file(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::MatchType;
    use consentry_core::ElementKind;

    #[test]
    fn test_static_source_filters_inactive() {
        let source = StaticRuleSource::new(vec![
            Rule::script(MatchType::Contains, "a.js", "analytics").inactive(),
            Rule::script(MatchType::Contains, "b.js", "analytics"),
        ]);

        let set = source.active_rules().unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.first_match(ElementKind::Script, "/a.js").is_none());
    }

    #[test]
    fn test_file_source_missing_file() {
        let source = FileRuleSource::new("/nonexistent/rules.yaml");
        assert!(source.active_rules().is_err());
    }
}
