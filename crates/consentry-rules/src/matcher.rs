//! Rule matching strategies
//!
//! A [`RuleMatcher`] is the compiled form of a rule's `match_type` and
//! `match_value`. Compilation never fails: a regex that does not compile or an
//! unknown strategy produces a matcher that never matches, so a broken rule
//! leaves content alone instead of over-blocking. An empty match value is
//! compared literally (`contains ""` matches every value).

use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::rule::{MatchType, Rule};

/// Upper bound on the compiled size of a rule regex
const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Compiled comparison for one rule
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    Exact(String),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(Regex),
    /// Matches nothing
    Never,
}

impl RuleMatcher {
    /// Compile the comparison described by `rule`
    pub fn compile(rule: &Rule) -> Self {
        Self::from_parts(rule.match_type, &rule.match_value, rule.label())
    }

    fn from_parts(match_type: MatchType, value: &str, label: &str) -> Self {
        if value.is_empty() && match_type != MatchType::Unknown {
            warn!(rule = %label, match_type = ?match_type, "Rule has an empty match_value");
        }

        match match_type {
            MatchType::Exact => RuleMatcher::Exact(value.to_string()),
            MatchType::Contains => RuleMatcher::Contains(value.to_string()),
            MatchType::StartsWith => RuleMatcher::StartsWith(value.to_string()),
            MatchType::EndsWith => RuleMatcher::EndsWith(value.to_string()),
            MatchType::Regex => match compile_pattern(value) {
                Ok(regex) => RuleMatcher::Regex(regex),
                Err(e) => {
                    warn!(rule = %label, error = %e, "Rule regex does not compile, rule disabled");
                    RuleMatcher::Never
                }
            },
            MatchType::Unknown => {
                warn!(rule = %label, "Rule has unsupported match_type, rule disabled");
                RuleMatcher::Never
            }
        }
    }

    /// Whether `value` satisfies this comparison
    pub fn matches(&self, value: &str) -> bool {
        match self {
            RuleMatcher::Exact(expected) => value == expected,
            RuleMatcher::Contains(needle) => value.contains(needle.as_str()),
            RuleMatcher::StartsWith(prefix) => value.starts_with(prefix.as_str()),
            RuleMatcher::EndsWith(suffix) => value.ends_with(suffix.as_str()),
            RuleMatcher::Regex(regex) => regex.is_match(value),
            RuleMatcher::Never => false,
        }
    }

    /// Whether this matcher can ever match
    pub fn is_never(&self) -> bool {
        matches!(self, RuleMatcher::Never)
    }
}

/// Evaluate one rule against one value.
///
/// Compiles the rule on every call; [`crate::RuleSet`] keeps compiled
/// matchers for repeated evaluation.
pub fn matches(value: &str, rule: &Rule) -> bool {
    RuleMatcher::compile(rule).matches(value)
}

/// Compile a rule pattern.
///
/// Patterns may be bare (`ga\.js`) or wrapped in delimiters with trailing
/// flags (`/ga\.js/i`, `#track#`). Supported flags: `i`, `m`, `s`, `x`,
/// `U` (swap greediness), `A` (anchor at start), `u` and `D` (accepted, no
/// effect). Any other flag makes the pattern invalid.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let source = match split_delimited(pattern) {
        Some((body, flags)) => apply_flags(body, flags)?,
        None => pattern.to_string(),
    };

    RegexBuilder::new(&source)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

/// Split `/body/flags` into body and flags, if the pattern is delimited
fn split_delimited(pattern: &str) -> Option<(&str, &str)> {
    let delimiter = pattern.chars().next()?;
    if delimiter.is_alphanumeric() || delimiter.is_whitespace() || delimiter == '\\' {
        return None;
    }
    if !matches!(delimiter, '/' | '#' | '~' | '!' | '@' | '%' | '|' | '+' | ';' | ',') {
        return None;
    }

    let rest = &pattern[delimiter.len_utf8()..];
    let end = rest.rfind(delimiter)?;
    let (body, tail) = rest.split_at(end);
    let flags = &tail[delimiter.len_utf8()..];

    if flags.chars().all(|c| c.is_ascii_alphabetic()) {
        Some((body, flags))
    } else {
        None
    }
}

fn apply_flags(body: &str, flags: &str) -> Result<String, regex::Error> {
    let mut inline = String::new();
    let mut anchored = false;

    for flag in flags.chars() {
        match flag {
            'i' | 'm' | 's' | 'x' | 'U' => {
                if !inline.contains(flag) {
                    inline.push(flag);
                }
            }
            'A' => anchored = true,
            'u' | 'D' => {}
            other => {
                return Err(regex::Error::Syntax(format!(
                    "unsupported pattern flag '{}'",
                    other
                )))
            }
        }
    }

    let mut source = String::with_capacity(body.len() + 12);
    if !inline.is_empty() {
        source.push_str("(?");
        source.push_str(&inline);
        source.push(')');
    }
    if anchored {
        source.push_str("\\A(?:");
        source.push_str(body);
        source.push(')');
    } else {
        source.push_str(body);
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rule(match_type: MatchType, value: &str) -> Rule {
        Rule::script(match_type, value, "analytics")
    }

    #[test]
    fn test_literal_strategies() {
        let url = "https://www.google-analytics.com/ga.js";

        assert!(matches(url, &rule(MatchType::Exact, url)));
        assert!(!matches(url, &rule(MatchType::Exact, "ga.js")));

        assert!(matches(url, &rule(MatchType::Contains, "google-analytics")));
        assert!(!matches(url, &rule(MatchType::Contains, "facebook")));

        assert!(matches(url, &rule(MatchType::StartsWith, "https://www.google")));
        assert!(!matches(url, &rule(MatchType::StartsWith, "ga.js")));

        assert!(matches(url, &rule(MatchType::EndsWith, "/ga.js")));
        assert!(!matches(url, &rule(MatchType::EndsWith, "https://")));
    }

    #[test]
    fn test_regex_is_unanchored() {
        let r = rule(MatchType::Regex, r"ga\.js");
        assert!(matches("https://x.com/ga.js?v=1", &r));

        let anchored = rule(MatchType::Regex, r"^ga\.js$");
        assert!(!matches("https://x.com/ga.js", &anchored));
        assert!(matches("ga.js", &anchored));
    }

    #[test]
    fn test_delimited_regex_with_flags() {
        let r = rule(MatchType::Regex, r"/GOOGLETAGMANAGER\.com/i");
        assert!(matches("https://www.googletagmanager.com/gtm.js", &r));

        let hash = rule(MatchType::Regex, "#fbq\\(#");
        assert!(matches("!function(){fbq('init')}", &hash));

        let anchored = rule(MatchType::Regex, "/track/A");
        assert!(matches("track.js", &anchored));
        assert!(!matches("/js/track.js", &anchored));
    }

    #[test]
    fn test_slash_inside_bare_pattern() {
        // trailing text after the last slash is not a flag list
        let r = rule(MatchType::Regex, "/js/gtag.js");
        assert!(matches("https://x.com/js/gtag.js", &r));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        let r = rule(MatchType::Regex, "(unclosed");
        assert!(RuleMatcher::compile(&r).is_never());
        assert!(!matches("(unclosed", &r));

        let bad_flag = rule(MatchType::Regex, "/ga/z");
        assert!(!matches("ga", &bad_flag));
    }

    #[test]
    fn test_unknown_never_matches() {
        assert!(!matches("anything", &rule(MatchType::Unknown, "anything")));
        assert!(!matches("", &rule(MatchType::Unknown, "")));
    }

    #[test]
    fn test_empty_match_value_compared_literally() {
        assert!(matches("", &rule(MatchType::Exact, "")));
        assert!(!matches("/ga.js", &rule(MatchType::Exact, "")));
        assert!(matches("anything", &rule(MatchType::Contains, "")));
        assert!(matches("anything", &rule(MatchType::StartsWith, "")));
        assert!(matches("anything", &rule(MatchType::EndsWith, "")));
    }

    proptest! {
        #[test]
        fn prop_matching_is_deterministic(value in ".{0,40}", needle in "[a-z./]{1,6}") {
            for match_type in [
                MatchType::Exact,
                MatchType::Contains,
                MatchType::StartsWith,
                MatchType::EndsWith,
                MatchType::Regex,
            ] {
                let r = rule(match_type, &needle);
                let first = matches(&value, &r);
                let second = matches(&value, &r);
                prop_assert_eq!(first, second);
            }
        }

        #[test]
        fn prop_contains_agrees_with_str(value in "[a-z]{0,20}", needle in "[a-z]{1,3}") {
            let r = rule(MatchType::Contains, &needle);
            prop_assert_eq!(matches(&value, &r), value.contains(&needle));
        }
    }
}
