//! Undo neutralization for newly accepted categories

use std::cell::Cell;

use consentry_core::types::attr;
use consentry_core::AcceptedCategories;
use lol_html::errors::AttributeNameError;
use lol_html::html_content::Element;
use lol_html::{element, rewrite_str, RewriteStrSettings};
use tracing::{debug, warn};

use crate::escape::{attr_value, decode_entities, requote};
use crate::transform::{link_handler, HIDDEN_STYLE};

/// Restores elements neutralized by [`crate::BufferTransformer`] once their
/// category is accepted. The server-side counterpart of the client's
/// "load content" control.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reactivator;

impl Reactivator {
    pub fn new() -> Self {
        Self
    }

    /// Reactivate every neutralized element whose category is in `accepted`
    pub fn reactivate(&self, html: &str, accepted: &AcceptedCategories) -> String {
        if !html.contains(attr::CATEGORY) {
            return html.to_string();
        }

        let restored = Cell::new(0usize);
        let category_of = |el: &Element<'_, '_>, name: &str| {
            el.get_attribute(name)
                .map(|raw| decode_entities(&raw).into_owned())
                .filter(|category| accepted.is_accepted(category))
        };

        let tagged = format!("[{}]", attr::CATEGORY);
        let result = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!(format!("script{tagged}"), |el| {
                        if category_of(&*el, attr::CATEGORY).is_some() {
                            restore_script(el)?;
                            restored.set(restored.get() + 1);
                        }
                        Ok(())
                    }),
                    element!(format!("iframe{tagged}"), |el| {
                        if category_of(&*el, attr::CATEGORY).is_some() {
                            restore_iframe(el)?;
                            restored.set(restored.get() + 1);
                        }
                        Ok(())
                    }),
                    element!(format!("a{tagged}"), |el| {
                        if let Some(category) = category_of(&*el, attr::CATEGORY) {
                            restore_link(el, &category)?;
                            restored.set(restored.get() + 1);
                        }
                        Ok(())
                    }),
                    element!(format!("div.{}", attr::PLACEHOLDER_CLASS), |el| {
                        if category_of(&*el, attr::PLACEHOLDER_CATEGORY).is_some() {
                            el.remove();
                        }
                        Ok(())
                    }),
                ],
                strict: false,
                ..RewriteStrSettings::default()
            },
        );

        match result {
            Ok(output) if restored.get() > 0 => {
                debug!(restored = restored.get(), "Reactivated elements");
                output
            }
            Ok(_) => html.to_string(),
            Err(e) => {
                warn!(error = %e, "Reactivation failed, markup left as is");
                html.to_string()
            }
        }
    }
}

fn restore_script(el: &mut Element<'_, '_>) -> Result<(), AttributeNameError> {
    match el.get_attribute(attr::TYPE) {
        Some(original) => {
            el.set_attribute("type", &requote(&original))?;
            el.remove_attribute(attr::TYPE);
        }
        None => {
            if el
                .get_attribute("type")
                .is_some_and(|t| t.eq_ignore_ascii_case(attr::DISABLED_SCRIPT_TYPE))
            {
                el.remove_attribute("type");
            }
        }
    }
    el.remove_attribute(attr::CATEGORY);
    Ok(())
}

fn restore_iframe(el: &mut Element<'_, '_>) -> Result<(), AttributeNameError> {
    if let Some(src) = el.get_attribute(attr::SRC) {
        el.set_attribute("src", &requote(&src))?;
        match el.get_attribute(attr::ORIGINAL_DATA_SRC) {
            Some(lazy) => {
                el.set_attribute(attr::SRC, &requote(&lazy))?;
                el.remove_attribute(attr::ORIGINAL_DATA_SRC);
            }
            None => el.remove_attribute(attr::SRC),
        }
    }
    match el.get_attribute(attr::STYLE) {
        Some(style) => {
            el.set_attribute("style", &requote(&style))?;
            el.remove_attribute(attr::STYLE);
        }
        None => {
            if el.get_attribute("style").as_deref() == Some(HIDDEN_STYLE) {
                el.remove_attribute("style");
            }
        }
    }
    el.remove_attribute(attr::CATEGORY);
    Ok(())
}

fn restore_link(el: &mut Element<'_, '_>, category: &str) -> Result<(), AttributeNameError> {
    if let Some(href) = el.get_attribute(attr::HREF) {
        el.set_attribute("href", &requote(&href))?;
        el.remove_attribute(attr::HREF);
    }

    let handler = attr_value(&link_handler(category));
    if let Some(onclick) = el.get_attribute("onclick") {
        if let Some(rest) = onclick.strip_prefix(handler.as_str()) {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            if rest.is_empty() {
                el.remove_attribute("onclick");
            } else {
                el.set_attribute("onclick", &requote(rest))?;
            }
        }
    }
    el.remove_attribute(attr::CATEGORY);
    Ok(())
}
