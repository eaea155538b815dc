//! Core types for Consentry

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Well-known consent category identifiers
pub mod category {
    /// Category that is always accepted and never blocked
    pub const NECESSARY: &str = "necessary";

    /// Wildcard stored by "accept all" decisions
    pub const ALL: &str = "all";
}

/// Attribute names written onto neutralized elements.
///
/// Client-side code reads these to reactivate content once consent is given.
pub mod attr {
    /// Category tag on every neutralized element
    pub const CATEGORY: &str = "data-cookiecategory";

    /// Original iframe source
    pub const SRC: &str = "data-src";

    /// A `data-src` the iframe carried before it was blocked
    pub const ORIGINAL_DATA_SRC: &str = "data-orig-data-src";

    /// Original link destination
    pub const HREF: &str = "data-href";

    /// Original script type, when the script declared one
    pub const TYPE: &str = "data-type";

    /// Original inline style of a hidden iframe
    pub const STYLE: &str = "data-style";

    /// Category carried by the placeholder block and its load button
    pub const PLACEHOLDER_CATEGORY: &str = "data-category";

    /// Non-executable script type used to disable scripts
    pub const DISABLED_SCRIPT_TYPE: &str = "text/plain";

    /// Class of the placeholder block inserted after a blocked iframe
    pub const PLACEHOLDER_CLASS: &str = "dcc-iframe-placeholder";

    /// Class of the "load content" button inside the placeholder
    pub const LOAD_BUTTON_CLASS: &str = "dcc-load-content";

    /// Client-side function that gates tracked link navigation
    pub const LINK_HANDLER: &str = "dccHandleTrackedLink";
}

/// Class of embedded resource a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    /// `<script src=...>`
    Script,
    /// `<script>` without a source, matched on its text
    Inline,
    /// `<iframe src=...>`
    Iframe,
    /// `<a href=...>`
    Link,
}

impl ElementKind {
    /// All kinds in processing order
    pub const ALL: [ElementKind; 4] = [
        ElementKind::Script,
        ElementKind::Inline,
        ElementKind::Iframe,
        ElementKind::Link,
    ];

    /// Stable lowercase name, used for metric labels and rule files
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Script => "script",
            ElementKind::Inline => "inline",
            ElementKind::Iframe => "iframe",
            ElementKind::Link => "link",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of consent categories a visitor has accepted.
///
/// `necessary` is always accepted, whatever the set contains. A set holding
/// the `all` wildcard accepts every category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AcceptedCategories {
    categories: BTreeSet<String>,
}

impl AcceptedCategories {
    /// Empty set: only `necessary` is accepted
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether elements tagged with `category` may run
    pub fn is_accepted(&self, name: &str) -> bool {
        name == category::NECESSARY
            || self.categories.contains(category::ALL)
            || self.categories.contains(name)
    }

    /// Whether every category is accepted
    pub fn accepts_all(&self) -> bool {
        self.categories.contains(category::ALL)
    }

    /// Add a category
    pub fn insert(&mut self, name: impl Into<String>) {
        self.categories.insert(name.into());
    }

    /// Remove a category. `necessary` stays implicitly accepted.
    pub fn remove(&mut self, name: &str) {
        self.categories.remove(name);
    }

    /// Explicitly stored categories, in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    /// Number of explicitly stored categories
    pub fn len(&self) -> usize {
        self.categories.len()
    }

    /// Whether no category was explicitly stored
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for AcceptedCategories {
    fn from_iter<I: IntoIterator<Item = S>>(categories: I) -> Self {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }
}
