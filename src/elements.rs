//! Custom-element discovery and substitution.
//!
//! Scanning is lexical: tags inside comments, `<script>` or `<style>` text are
//! reported like any other tag.

use std::collections::HashSet;
use std::ops::Range;

use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::COMPONENTS_DIR;

/// Tag names treated as built-in HTML (and inline SVG/MathML roots).
pub const STANDARD_TAGS: &[&str] = &[
    "a", "abbr", "address", "area", "article", "aside", "audio", "b", "base", "bdi", "bdo",
    "blockquote", "body", "br", "button", "canvas", "caption", "cite", "code", "col", "colgroup",
    "data", "datalist", "dd", "del", "details", "dfn", "dialog", "div", "dl", "dt", "em", "embed",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "head", "header", "hgroup", "hr", "html", "i", "iframe", "img", "input", "ins", "kbd",
    "label", "legend", "li", "link", "main", "map", "mark", "math", "menu", "meta", "meter",
    "nav", "noscript", "object", "ol", "optgroup", "option", "output", "p", "param", "picture",
    "pre", "progress", "q", "rp", "rt", "ruby", "s", "samp", "script", "search", "section",
    "select", "slot", "small", "source", "span", "strong", "style", "sub", "summary", "sup",
    "svg", "table", "tbody", "td", "template", "textarea", "tfoot", "th", "thead", "time",
    "title", "tr", "track", "u", "ul", "var", "video", "wbr",
];

static STANDARD: Lazy<HashSet<&'static str>> = Lazy::new(|| STANDARD_TAGS.iter().copied().collect());

static OPENING_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([A-Za-z][A-Za-z0-9_-]*)(?:\s[^<>]*)?/?>").expect("valid opening tag regex")
});

/// A non-standard tag found in markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomElement {
    pub tag_name: String,
    /// The first opening tag matched for this name, attributes included.
    pub raw: String,
}

impl CustomElement {
    /// Fragment identity answering this element: `components/<tag>.html`.
    pub fn fragment_identity(&self) -> String {
        format!("{COMPONENTS_DIR}/{}.html", self.tag_name)
    }
}

pub fn is_standard_tag(name: &str) -> bool {
    STANDARD.contains(name.to_ascii_lowercase().as_str())
}

pub fn is_custom_tag(name: &str) -> bool {
    name.contains('-') || !is_standard_tag(name)
}

/// Distinct custom elements in source order; the first occurrence of a tag
/// name wins. Tag names are case-insensitive and reported in lowercase.
pub fn discover_custom_elements(markup: &str) -> Vec<CustomElement> {
    OPENING_TAG_RE
        .captures_iter(markup)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str();
            let raw = caps.get(0)?.as_str();
            is_custom_tag(name).then(|| CustomElement {
                tag_name: name.to_ascii_lowercase(),
                raw: raw.to_string(),
            })
        })
        .unique_by(|el| el.tag_name.clone())
        .collect()
}

/// Matches opening, closing and self-closing tags named `tag`, any case.
pub fn tag_pattern(tag: &str) -> Regex {
    let t = regex::escape(tag);
    Regex::new(&format!(r"(?i)<(/?){t}(?:[\s/][^<>]*)?>"))
        .expect("escaped tag names always form a valid pattern")
}

/// Byte ranges of every outermost `<tag .../>` and balanced
/// `<tag ...>...</tag>` element. Same-name elements nest; opening tags that
/// are never closed and stray closing tags are left alone.
fn element_spans(markup: &str, tag: &str) -> Vec<Range<usize>> {
    let mut open: Vec<usize> = Vec::new();
    let mut spans = Vec::new();
    for caps in tag_pattern(tag).captures_iter(markup) {
        let Some(m) = caps.get(0) else { continue };
        let closing = caps.get(1).is_some_and(|c| !c.as_str().is_empty());
        if closing {
            if let Some(start) = open.pop() {
                spans.push(start..m.end());
            }
        } else if m.as_str().ends_with("/>") {
            spans.push(m.range());
        } else {
            open.push(m.start());
        }
    }
    spans.sort_by_key(|r| r.start);
    let mut outermost: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        if outermost.last().map_or(true, |last| span.start >= last.end) {
            outermost.push(span);
        }
    }
    outermost
}

/// Replace every self-closing and paired occurrence of `tag`.
pub fn replace_element(markup: &str, tag: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut cursor = 0;
    for span in element_spans(markup, tag) {
        out.push_str(&markup[cursor..span.start]);
        out.push_str(replacement);
        cursor = span.end;
    }
    out.push_str(&markup[cursor..]);
    out
}

/// Placeholders standing in for resolved fragments while the host template
/// is evaluated. Fragment markup is spliced back after evaluation so it is
/// never read as expression source.
#[derive(Debug, Default)]
pub struct FragmentSlots {
    slots: Vec<(String, String)>,
}

impl FragmentSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap every occurrence of `tag` in `markup` for a slot token bound to
    /// `fragment`.
    pub fn substitute(&mut self, markup: &str, tag: &str, fragment: String) -> String {
        let token = format!("\u{E000}fragment-slot:{}\u{E001}", self.slots.len());
        let out = replace_element(markup, tag, &token);
        if out != markup {
            self.slots.push((token, fragment));
        }
        out
    }

    pub fn splice(&self, mut output: String) -> String {
        for (token, fragment) in &self.slots {
            if output.contains(token.as_str()) {
                output = output.replace(token.as_str(), fragment);
            }
        }
        output
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn names(markup: &str) -> Vec<String> {
        discover_custom_elements(markup)
            .into_iter()
            .map(|e| e.tag_name)
            .collect()
    }

    #[test]
    fn finds_hyphenated_and_unknown_tags() {
        let markup = r#"<div><my-widget id="a"></my-widget><p>x</p><fancybox/><test-runner/></div>"#;
        assert_eq!(names(markup), vec!["my-widget", "fancybox", "test-runner"]);
    }

    #[test]
    fn first_occurrence_wins() {
        let found = discover_custom_elements(r#"<x-a id="1"></x-a><x-b></x-b><x-a id="2"/>"#);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].raw, r#"<x-a id="1">"#);
        assert_eq!(found[1].tag_name, "x-b");
    }

    #[test]
    fn standard_tags_are_case_insensitive() {
        assert!(names("<DIV><Span></Span><TABLE></TABLE></DIV>").is_empty());
    }

    #[test]
    fn scanning_is_lexical() {
        let markup = "<!-- <x-commented></x-commented> --><script>'<x-scripted>'</script><style>/* <x-styled> */</style>";
        assert_eq!(names(markup), vec!["x-commented", "x-scripted", "x-styled"]);
    }

    #[test]
    fn ignores_closing_tags_and_doctype() {
        assert!(names("<!DOCTYPE html></x-orphan>").is_empty());
    }

    #[test]
    fn fragment_identity_uses_components_dir() {
        let el = &discover_custom_elements("<my-widget></my-widget>")[0];
        assert_eq!(el.fragment_identity(), "components/my-widget.html");
    }

    #[test]
    fn replaces_every_occurrence_of_both_forms() {
        let markup = r#"<my-w a="1"></my-w> | <my-w/> | <my-w>inner</my-w> | <my-wide></my-wide>"#;
        assert_eq!(
            replace_element(markup, "my-w", "<p>$1</p>"),
            "<p>$1</p> | <p>$1</p> | <p>$1</p> | <my-wide></my-wide>"
        );
    }

    #[test]
    fn nested_same_name_elements_are_replaced_whole() {
        assert_eq!(replace_element("<x-box><x-box>in</x-box></x-box>", "x-box", "B"), "B");
        assert_eq!(
            replace_element("<x-box a><x-box/><x-box>b</x-box></x-box>|<x-box></x-box>", "x-box", "B"),
            "B|B"
        );
    }

    #[test]
    fn unbalanced_tags_stay_as_text() {
        assert_eq!(replace_element("<x-a>open <x-a>in</x-a>", "x-a", "R"), "<x-a>open R");
        assert_eq!(replace_element("</x-a> <x-a/>", "x-a", "R"), "</x-a> R");
        assert_eq!(replace_element("<x-a>never closed", "x-a", "R"), "<x-a>never closed");
    }

    #[test]
    fn tag_names_are_case_insensitive() {
        let found = discover_custom_elements("<My-Widget></My-Widget><my-widget/>");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fragment_identity(), "components/my-widget.html");
        assert_eq!(replace_element("<My-Widget></MY-WIDGET>|<my-widget/>", "my-widget", "W"), "W|W");
    }

    #[test]
    fn slots_round_trip_through_evaluation_text() {
        let mut slots = FragmentSlots::new();
        let host = slots.substitute("<a-b></a-b><c-d/>", "a-b", "${not evaluated}".into());
        let host = slots.substitute(&host, "c-d", "<i>d</i>".into());
        let host = slots.substitute(&host, "e-f", "unused".into());
        assert_eq!(slots.len(), 2);
        assert!(!host.contains("a-b"));
        assert_eq!(slots.splice(host), "${not evaluated}<i>d</i>");
    }

    proptest! {
        #[test]
        fn discovery_has_unique_names(tags in proptest::collection::vec("[a-z]{1,4}(-[a-z]{1,4})?", 0..12)) {
            let markup: String = tags.iter().map(|t| format!("<{t}></{t}>")).collect();
            let found = names(&markup);
            let unique: HashSet<_> = found.iter().collect();
            prop_assert_eq!(unique.len(), found.len());
            for name in &found {
                prop_assert!(is_custom_tag(name));
            }
        }
    }
}
