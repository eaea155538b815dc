//! Placeholder blocks shown in place of blocked iframes

use consentry_core::types::attr;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::escape::{escape_attr, escape_text};

fn default_template() -> String {
    "This content is provided by {domain}. By loading the content you accept {category} cookies."
        .to_string()
}

fn default_button_label() -> String {
    "Load content".to_string()
}

fn default_external_label() -> String {
    "External".to_string()
}

/// Text of the placeholder block.
///
/// `template` may reference `{domain}` and `{category}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderNotice {
    #[serde(default = "default_template", alias = "notice_template")]
    pub template: String,

    #[serde(default = "default_button_label")]
    pub button_label: String,

    /// Shown as the domain when the source has no host
    #[serde(default = "default_external_label")]
    pub external_label: String,
}

impl Default for PlaceholderNotice {
    fn default() -> Self {
        Self {
            template: default_template(),
            button_label: default_button_label(),
            external_label: default_external_label(),
        }
    }
}

impl PlaceholderNotice {
    /// Human-readable notice for content from `source` in `category`
    pub fn message(&self, source: &str, category: &str) -> String {
        let domain = origin_host(source);
        self.template
            .replace("{domain}", domain.as_deref().unwrap_or(&self.external_label))
            .replace("{category}", category)
    }

    /// Placeholder markup inserted after a blocked iframe
    pub fn render(&self, source: &str, category: &str) -> String {
        let mut category_attr = String::new();
        escape_attr(category, &mut category_attr);

        format!(
            r#"<div class="{class}" {data}="{cat}"><p>{message}</p><button type="button" class="{button}" {data}="{cat}">{label}</button></div>"#,
            class = attr::PLACEHOLDER_CLASS,
            data = attr::PLACEHOLDER_CATEGORY,
            cat = category_attr,
            message = escape_text(&self.message(source, category)),
            button = attr::LOAD_BUTTON_CLASS,
            label = escape_text(&self.button_label),
        )
    }
}

/// Host of an absolute or protocol-relative URL
fn origin_host(source: &str) -> Option<String> {
    let source = source.trim();
    let parsed = if source.starts_with("//") {
        Url::parse(&format!("https:{}", source))
    } else {
        Url::parse(source)
    };

    parsed
        .ok()?
        .host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_string)
}
