//! Consent-aware rewriting of complete HTML buffers
//!
//! For every script, inline script, iframe and link the transformer asks the
//! rule set for the first matching rule of that element class. Elements
//! whose category the visitor has not accepted are neutralized in a way the
//! client-side consent script (or [`crate::Reactivator`]) can undo.
//!
//! Rewriting runs on `lol_html`, which emits every byte it was not asked to
//! change as-is. Inline scripts are decided from their text, which is only
//! known after the start tag has been written, so their bodies are collected
//! in a first scan and the rewrite pass looks them up by script index.

use std::cell::{Cell, RefCell};
use std::time::Instant;

use consentry_core::types::attr;
use consentry_core::{AcceptedCategories, ElementKind};
use consentry_rules::{IframeReplacement, RuleKind, RuleMatch, RuleSet};
use lol_html::errors::{AttributeNameError, RewritingError};
use lol_html::html_content::{ContentType, Element};
use lol_html::{element, rewrite_str, text, HtmlRewriter, RewriteStrSettings, Settings};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::escape::{attr_value, decode_entities, escape_js_single, requote};
use crate::notice::PlaceholderNotice;

/// Inline style that hides a blocked iframe
pub const HIDDEN_STYLE: &str = "display: none;";

/// Counts from one transform pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransformReport {
    /// Scripts with a source that were disabled
    pub scripts: usize,

    /// Inline scripts that were disabled
    pub inline_scripts: usize,

    /// Iframes that were swapped for a placeholder
    pub iframes: usize,

    /// Links that received the interception handler
    pub links: usize,

    /// Elements that matched a rule whose category was accepted
    pub allowed: usize,

    /// Time spent, in microseconds
    pub latency_us: u64,
}

impl TransformReport {
    /// Neutralized elements of `kind`
    pub fn count(&self, kind: ElementKind) -> usize {
        match kind {
            ElementKind::Script => self.scripts,
            ElementKind::Inline => self.inline_scripts,
            ElementKind::Iframe => self.iframes,
            ElementKind::Link => self.links,
        }
    }

    /// Neutralized elements of all kinds
    pub fn total(&self) -> usize {
        self.scripts + self.inline_scripts + self.iframes + self.links
    }

    fn record(&mut self, kind: ElementKind) {
        match kind {
            ElementKind::Script => self.scripts += 1,
            ElementKind::Inline => self.inline_scripts += 1,
            ElementKind::Iframe => self.iframes += 1,
            ElementKind::Link => self.links += 1,
        }
    }
}

/// Output of [`BufferTransformer::transform_with_report`]
#[derive(Debug, Clone)]
pub struct Transformed {
    pub html: String,
    pub report: TransformReport,
}

/// Rewrites HTML so that content in unaccepted categories cannot run.
///
/// The transformer holds no per-request state and can be shared freely.
#[derive(Debug, Clone, Default)]
pub struct BufferTransformer {
    notice: PlaceholderNotice,
}

impl BufferTransformer {
    /// Create a transformer with the default placeholder text
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transformer with custom placeholder text
    pub fn with_notice(notice: PlaceholderNotice) -> Self {
        Self { notice }
    }

    pub fn notice(&self) -> &PlaceholderNotice {
        &self.notice
    }

    /// Rewrite `html` for a visitor who accepted `accepted`
    pub fn transform(&self, html: &str, rules: &RuleSet, accepted: &AcceptedCategories) -> String {
        self.transform_with_report(html, rules, accepted).html
    }

    /// Rewrite `html` and report what was neutralized.
    ///
    /// When nothing is neutralized, or the markup cannot be rewritten, the
    /// input is returned unchanged.
    pub fn transform_with_report(
        &self,
        html: &str,
        rules: &RuleSet,
        accepted: &AcceptedCategories,
    ) -> Transformed {
        let start = Instant::now();
        let unchanged = || Transformed {
            html: html.to_string(),
            report: TransformReport::default(),
        };

        if rules.is_empty() || html.is_empty() {
            return unchanged();
        }

        let rewritten = inline_scripts(html, rules)
            .and_then(|inline| self.rewrite(html, rules, accepted, &inline));
        let (output, mut report) = match rewritten {
            Ok(done) => done,
            Err(e) => {
                warn!(error = %e, "HTML rewrite failed, serving original markup");
                return unchanged();
            }
        };

        let html = if report.total() == 0 {
            html.to_string()
        } else {
            output
        };

        report.latency_us = start.elapsed().as_micros() as u64;
        trace!(
            blocked = report.total(),
            allowed = report.allowed,
            latency_us = report.latency_us,
            "Transform complete"
        );

        Transformed { html, report }
    }

    fn rewrite(
        &self,
        html: &str,
        rules: &RuleSet,
        accepted: &AcceptedCategories,
        inline: &[Option<String>],
    ) -> Result<(String, TransformReport), RewritingError> {
        let report = RefCell::new(TransformReport::default());
        let script_index = Cell::new(0usize);

        // First applicable rule whose category is not accepted
        let blocking = |kind: ElementKind, identity: &str| {
            let found = rules.first_match(kind, identity)?;
            if accepted.is_accepted(found.category()) {
                report.borrow_mut().allowed += 1;
                return None;
            }
            debug!(
                kind = %kind,
                category = %found.category(),
                rule = %found.rule.label(),
                "Neutralized element"
            );
            report.borrow_mut().record(kind);
            Some(found)
        };

        let mut handlers = Vec::new();

        if rules.has_kind(ElementKind::Script) || rules.has_kind(ElementKind::Inline) {
            handlers.push(element!("script", |el| {
                let index = script_index.get();
                script_index.set(index + 1);
                if el.has_attribute(attr::CATEGORY) {
                    return Ok(());
                }

                let found = match el.get_attribute("src") {
                    Some(src) => blocking(ElementKind::Script, &*decode_entities(&src)),
                    None => match inline.get(index) {
                        Some(Some(body)) => blocking(ElementKind::Inline, body.as_str()),
                        _ => None,
                    },
                };
                if let Some(found) = found {
                    disable_script(el, found.category())?;
                }
                Ok(())
            }));
        }

        if rules.has_kind(ElementKind::Iframe) {
            handlers.push(element!("iframe[src]", |el| {
                if el.has_attribute(attr::CATEGORY) {
                    return Ok(());
                }
                let Some(src) = el.get_attribute("src") else {
                    return Ok(());
                };
                let source = decode_entities(&src);
                if let Some(found) = blocking(ElementKind::Iframe, &*source) {
                    self.hide_iframe(el, &src, &source, &found)?;
                }
                Ok(())
            }));
        }

        if rules.has_kind(ElementKind::Link) {
            handlers.push(element!("a[href]", |el| {
                if el.has_attribute(attr::CATEGORY) {
                    return Ok(());
                }
                let Some(href) = el.get_attribute("href") else {
                    return Ok(());
                };
                if let Some(found) = blocking(ElementKind::Link, &*decode_entities(&href)) {
                    intercept_link(el, &href, found.category())?;
                }
                Ok(())
            }));
        }

        let output = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: handlers,
                strict: false,
                ..RewriteStrSettings::default()
            },
        )?;
        Ok((output, report.take()))
    }

    fn hide_iframe(
        &self,
        el: &mut Element<'_, '_>,
        raw_src: &str,
        source: &str,
        found: &RuleMatch<'_>,
    ) -> Result<(), AttributeNameError> {
        let category = found.category();
        let replacement = match found.kind() {
            RuleKind::Iframe { replacement } => replacement.source(),
            _ => IframeReplacement::BLANK,
        };

        if let Some(lazy) = el.get_attribute(attr::SRC) {
            el.set_attribute(attr::ORIGINAL_DATA_SRC, &requote(&lazy))?;
        }
        el.set_attribute(attr::SRC, &requote(raw_src))?;
        el.set_attribute("src", &attr_value(replacement))?;
        if let Some(style) = el.get_attribute("style") {
            el.set_attribute(attr::STYLE, &requote(&style))?;
        }
        el.set_attribute("style", HIDDEN_STYLE)?;
        el.set_attribute(attr::CATEGORY, &attr_value(category))?;

        el.after(&self.notice.render(source, category), ContentType::Html);
        Ok(())
    }
}

/// Rewrite `html` with the default placeholder text
pub fn transform(html: &str, rules: &RuleSet, accepted: &AcceptedCategories) -> String {
    BufferTransformer::new().transform(html, rules, accepted)
}

/// Click handler attached to a blocked link
pub fn link_handler(category: &str) -> String {
    format!(
        "return {}(this, '{}');",
        attr::LINK_HANDLER,
        escape_js_single(category)
    )
}

fn disable_script(el: &mut Element<'_, '_>, category: &str) -> Result<(), AttributeNameError> {
    if let Some(original) = el.get_attribute("type") {
        el.set_attribute(attr::TYPE, &requote(&original))?;
    }
    el.set_attribute("type", attr::DISABLED_SCRIPT_TYPE)?;
    el.set_attribute(attr::CATEGORY, &attr_value(category))
}

fn intercept_link(el: &mut Element<'_, '_>, raw_href: &str, category: &str) -> Result<(), AttributeNameError> {
    let handler = attr_value(&link_handler(category));
    let onclick = match el.get_attribute("onclick") {
        Some(existing) if !existing.trim().is_empty() => {
            format!("{} {}", handler, requote(existing.trim()))
        }
        _ => handler,
    };

    el.set_attribute(attr::HREF, &requote(raw_href))?;
    el.set_attribute(attr::CATEGORY, &attr_value(category))?;
    el.set_attribute("onclick", &onclick)
}

/// Bodies of the document's scripts, by script index.
///
/// `None` for scripts with a source and for scripts already neutralized.
/// Skipped entirely when the rule set has no inline rules.
fn inline_scripts(html: &str, rules: &RuleSet) -> Result<Vec<Option<String>>, RewritingError> {
    if !rules.has_kind(ElementKind::Inline) {
        return Ok(Vec::new());
    }

    let scripts = RefCell::new(Vec::new());
    let mut scanner = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("script", |el| {
                    let inline = !el.has_attribute("src") && !el.has_attribute(attr::CATEGORY);
                    scripts.borrow_mut().push(inline.then(String::new));
                    Ok(())
                }),
                text!("script", |chunk| {
                    if let Some(Some(body)) = scripts.borrow_mut().last_mut() {
                        body.push_str(chunk.as_str());
                    }
                    Ok(())
                }),
            ],
            strict: false,
            ..Settings::default()
        },
        |_: &[u8]| {},
    );
    scanner.write(html.as_bytes())?;
    scanner.end()?;

    Ok(scripts.take())
}
