use std::borrow::Cow;
use std::collections::{HashMap, HashSet};

/// Tags Ghost's HTML card importer understands.
const ALLOWED_TAGS: &[&str] = &[
    "b", "i", "em", "strong", "a", "p", "br", "ul", "ol", "li", "blockquote", "figure",
    "figcaption", "img", "h1", "h2", "h3", "h4", "h5", "h6", "div", "hr", "iframe", "span",
];

const ALLOWED_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("a", &["href", "title", "rel", "target", "class"]),
    ("img", &["src", "alt", "title", "class"]),
    (
        "iframe",
        &["width", "height", "src", "title", "frameborder", "allow", "allowfullscreen"],
    ),
    ("figure", &["class"]),
    ("div", &["class"]),
];

/// Only Ghost's own card classes survive, on any element.
const CLASS_PREFIX: &str = "kg-";

pub struct Sanitizer {
    cleaner: ammonia::Builder<'static>,
}

impl Sanitizer {
    pub fn new() -> Self {
        let tag_attributes: HashMap<&str, HashSet<&str>> = ALLOWED_ATTRIBUTES
            .iter()
            .map(|(tag, attrs)| (*tag, attrs.iter().copied().collect()))
            .collect();

        let mut cleaner = ammonia::Builder::default();
        cleaner
            .tags(ALLOWED_TAGS.iter().copied().collect())
            .tag_attributes(tag_attributes)
            .generic_attributes(HashSet::from(["class"]))
            .link_rel(None)
            .strip_comments(true)
            .attribute_filter(|_element, attribute, value| {
                if attribute != "class" {
                    return Some(Cow::Borrowed(value));
                }
                let classes: Vec<&str> = value
                    .split_whitespace()
                    .filter(|class| class.starts_with(CLASS_PREFIX))
                    .collect();
                if classes.is_empty() {
                    None
                } else {
                    Some(Cow::Owned(classes.join(" ")))
                }
            });
        Self { cleaner }
    }

    /// Filter `html` against the allow-list. Disallowed elements are dropped
    /// but their text is kept.
    pub fn sanitize(&self, html: &str) -> String {
        self.cleaner.clean(html).to_string().trim().to_string()
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(html: &str) -> String {
        Sanitizer::new().sanitize(html)
    }

    #[test]
    fn strips_script() {
        assert_eq!(clean("<p>Hi</p><script>alert(1)</script>"), "<p>Hi</p>");
    }

    #[test]
    fn img_keeps_only_permitted_attributes() {
        let html = r#"<img src="/img/a" alt="A" onerror="x()" loading="lazy" width="5">"#;
        assert_eq!(clean(html), r#"<img src="/img/a" alt="A">"#);
    }

    #[test]
    fn unknown_elements_keep_their_text() {
        let html = r#"<section class="review"><h2>Title</h2><dl><dt>Author</dt><dd>Someone</dd></dl></section>"#;
        assert_eq!(clean(html), "<h2>Title</h2>AuthorSomeone");
    }

    #[test]
    fn only_kg_classes_survive() {
        assert_eq!(
            clean(r#"<div class="kg-card sidebar">x</div>"#),
            r#"<div class="kg-card">x</div>"#
        );
        assert_eq!(clean(r#"<p class="intro">x</p>"#), "<p>x</p>");
        assert_eq!(
            clean(r#"<span class="kg-highlight">x</span>"#),
            r#"<span class="kg-highlight">x</span>"#
        );
    }

    #[test]
    fn anchors_keep_rel_and_target_without_injection() {
        let html = r#"<a href="/news/1" target="_blank" onclick="x()">x</a>"#;
        assert_eq!(clean(html), r#"<a href="/news/1" target="_blank">x</a>"#);
    }

    #[test]
    fn javascript_urls_are_dropped() {
        assert_eq!(clean(r#"<a href="javascript:alert(1)">x</a>"#), "<a>x</a>");
    }

    #[test]
    fn iframe_embed_is_kept() {
        let html = r#"<iframe src="https://www.youtube.com/embed/x" width="560" height="315" frameborder="0" allowfullscreen=""></iframe>"#;
        assert_eq!(clean(html), html);
    }

    #[test]
    fn output_is_trimmed() {
        assert_eq!(clean("  <p>x</p>\n"), "<p>x</p>");
    }

    #[test]
    fn image_card_survives() {
        let html = r#"<figure class="kg-card kg-image-card"><img src="/img/1" class="kg-image" alt="" loading="lazy"></figure>"#;
        assert_eq!(
            clean(html),
            r#"<figure class="kg-card kg-image-card"><img src="/img/1" class="kg-image" alt=""></figure>"#
        );
    }
}
