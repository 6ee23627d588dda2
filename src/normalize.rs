use std::sync::LazyLock;

use kuchikiki::traits::TendrilSink;
use kuchikiki::NodeRef;
use regex::Regex;
use tracing::trace;

use crate::error::NormalizeError;

static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F-\x9F]").unwrap());

const ELLIPSES: &[&str] = &["...", "…", "&hellip;"];

type DomPass = fn(&Normalizer, &NodeRef);

/// DOM passes, in the order they run. Each one expects the document left by
/// the previous one.
const DOM_PASSES: &[(&str, DomPass)] = &[
    ("remove_hidden", Normalizer::remove_hidden),
    ("remove_nbsp_paragraphs", Normalizer::remove_nbsp_paragraphs),
    ("remove_empty", Normalizer::remove_empty),
    ("ellipsis_to_rule", Normalizer::ellipsis_to_rule),
    ("relative_links", Normalizer::relative_links),
];

/// Cleans up the HTML assembled from an article's blocks.
#[derive(Debug, Clone)]
pub struct Normalizer {
    base_url: String,
}

impl Normalizer {
    /// `base_url` is the site's canonical origin, e.g. `https://felixonline.co.uk`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Normalizer {
            base_url: base_url.into(),
        }
    }

    pub fn normalize(&self, html: &str) -> Result<String, NormalizeError> {
        let doc = kuchikiki::parse_html().one(html);
        for (name, pass) in DOM_PASSES {
            pass(self, &doc);
            trace!(pass = name, "normalize pass applied");
        }
        let body = serialize_body(&doc)?;
        Ok(strip_control_chars(&body))
    }

    fn remove_hidden(&self, doc: &NodeRef) {
        for node in select(doc, r#"[style*="display:none"], [style*="display: none"]"#) {
            node.detach();
        }
    }

    fn remove_nbsp_paragraphs(&self, doc: &NodeRef) {
        for node in select(doc, "p") {
            if visible(&inner_html(&node)) == "&nbsp;" {
                node.detach();
            }
        }
    }

    // Innermost first, so a figure left empty by its paragraphs goes too.
    fn remove_empty(&self, doc: &NodeRef) {
        for node in select(doc, "p, figure").into_iter().rev() {
            if visible(&inner_html(&node)).is_empty() {
                node.detach();
            }
        }
    }

    fn ellipsis_to_rule(&self, doc: &NodeRef) {
        for node in select(doc, "p") {
            let text = visible(&node.text_contents());
            if !ELLIPSES.contains(&text.as_str()) {
                continue;
            }
            if let Some(rule) = horizontal_rule() {
                node.insert_before(rule);
                node.detach();
            }
        }
    }

    fn relative_links(&self, doc: &NodeRef) {
        if self.base_url.is_empty() {
            return;
        }
        for node in select(doc, "a[href]") {
            let Some(element) = node.as_element() else {
                continue;
            };
            let mut attrs = element.attributes.borrow_mut();
            let relative = attrs
                .get("href")
                .and_then(|href| href.strip_prefix(self.base_url.as_str()))
                .map(str::to_string);
            if let Some(relative) = relative {
                attrs.insert("href", relative);
            }
        }
    }
}

pub fn strip_control_chars(text: &str) -> String {
    CONTROL_RE.replace_all(text, "").into_owned()
}

/// What remains of `text` once the final control-character strip has run.
/// Passes compare against this so a second run finds nothing new to remove.
fn visible(text: &str) -> String {
    strip_control_chars(text).trim().to_string()
}

/// Matching elements in document order, collected before any mutation.
fn select(doc: &NodeRef, selectors: &str) -> Vec<NodeRef> {
    doc.select(selectors)
        .into_iter()
        .flatten()
        .map(|el| el.as_node().clone())
        .collect()
}

fn inner_html(node: &NodeRef) -> String {
    node.children().map(|child| child.to_string()).collect()
}

fn horizontal_rule() -> Option<NodeRef> {
    let fragment = kuchikiki::parse_html().one("<hr>");
    let rule = fragment.select_first("hr").ok()?.as_node().clone();
    rule.detach();
    Some(rule)
}

fn serialize_body(doc: &NodeRef) -> Result<String, NormalizeError> {
    let body = doc
        .select_first("body")
        .map_err(|_| NormalizeError::Parse("document has no body".into()))?;
    Ok(inner_html(body.as_node()))
}
