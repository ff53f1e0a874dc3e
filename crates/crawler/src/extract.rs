//! Readable-text extraction from HTML.
//!
//! Structural hints are collected in a fixed priority order: title, meta
//! description, og:description, first h1, first h2, then the text of the
//! outermost main/article/section containers. Paragraph text is used only
//! when no container produced any. Script, style and noscript content never
//! contributes.

use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

/// Text and raw link targets pulled out of one HTML document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub text: String,
    pub links: Vec<String>,
}

const HIDDEN_TAGS: [&str; 3] = ["script", "style", "noscript"];
const CONTAINER_TAGS: [&str; 3] = ["main", "article", "section"];

pub fn extract(html: &str) -> Extracted {
    let document = Html::parse_document(html);
    let mut pieces: Vec<String> = Vec::new();

    if let Some(title) = first_text(&document, "title") {
        pieces.push(title);
    }
    if let Some(desc) = meta_content(&document, r#"meta[name="description"]"#) {
        pieces.push(desc);
    }
    if let Some(og) = meta_content(&document, r#"meta[property="og:description"]"#) {
        pieces.push(og);
    }
    if let Some(h1) = first_text(&document, "h1") {
        pieces.push(h1);
    }
    if let Some(h2) = first_text(&document, "h2") {
        pieces.push(h2);
    }

    let containers = container_texts(&document);
    if containers.is_empty() {
        pieces.extend(all_texts(&document, "p"));
    } else {
        pieces.extend(containers);
    }

    let mut seen = HashSet::new();
    pieces.retain(|p| !p.is_empty() && seen.insert(p.clone()));

    Extracted {
        text: pieces.join("\n"),
        links: links(&document),
    }
}

/// Collapse every whitespace run to a single space and trim the ends.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Non-whitespace characters in `text`, the unit of the acceptance gate.
pub fn content_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

pub fn passes_gate(text: &str, min_chars: usize) -> bool {
    content_chars(text) >= min_chars
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn first_text(doc: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    doc.select(&sel)
        .map(visible_text)
        .find(|t| !t.is_empty())
}

fn all_texts(doc: &Html, css: &str) -> Vec<String> {
    let Some(sel) = selector(css) else {
        return Vec::new();
    };
    doc.select(&sel)
        .map(visible_text)
        .filter(|t| !t.is_empty())
        .collect()
}

fn meta_content(doc: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(normalize_whitespace)
        .find(|t| !t.is_empty())
}

/// Text of containers that are not nested inside another container.
fn container_texts(doc: &Html) -> Vec<String> {
    let Some(sel) = selector(&CONTAINER_TAGS.join(", ")) else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter(|el| {
            !el.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|e| CONTAINER_TAGS.contains(&e.name()))
            })
        })
        .map(visible_text)
        .filter(|t| !t.is_empty())
        .collect()
}

fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_TAGS.contains(&e.name()))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    normalize_whitespace(&out)
}

fn links(doc: &Html) -> Vec<String> {
    let Some(sel) = selector("a[href]") else {
        return Vec::new();
    };
    doc.select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .map(str::trim)
        .filter(|href| !href.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hints_come_in_priority_order() {
        let html = r#"<html><head>
            <title>Kyoto Weather</title>
            <meta name="description" content="Daily forecast">
            <meta property="og:description" content="Forecast for Kyoto">
            </head><body>
            <h2>Tomorrow</h2>
            <h1>Today</h1>
            <main><p>Sunny with light wind.</p></main>
            </body></html>"#;
        let e = extract(html);
        let lines: Vec<&str> = e.text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Kyoto Weather",
                "Daily forecast",
                "Forecast for Kyoto",
                "Today",
                "Tomorrow",
                "Sunny with light wind.",
            ]
        );
    }

    #[test]
    fn paragraphs_used_only_without_containers() {
        let with_container = extract("<body><article>Body text</article><p>Loose</p></body>");
        assert!(with_container.text.contains("Body text"));
        assert!(!with_container.text.contains("Loose"));

        let without = extract("<body><div><p>First</p><p>Second</p></div></body>");
        assert_eq!(without.text, "First\nSecond");
    }

    #[test]
    fn nested_containers_are_not_repeated() {
        let e = extract("<main><article><section>Only once</section></article></main>");
        assert_eq!(e.text.matches("Only once").count(), 1);
    }

    #[test]
    fn script_and_style_are_excluded() {
        let e = extract(
            "<main>Visible<script>var hidden = 1;</script><style>.x{}</style><noscript>nojs</noscript></main>",
        );
        assert_eq!(e.text, "Visible");
    }

    #[test]
    fn whitespace_is_collapsed() {
        let e = extract("<main>  many \n\n   spaces\there </main>");
        assert_eq!(e.text, "many spaces here");
    }

    #[test]
    fn links_in_document_order() {
        let e = extract(
            r#"<body><a href=" https://a.test/1 ">one</a><a>none</a><a href="/rel">rel</a><a href="">empty</a></body>"#,
        );
        assert_eq!(e.links, vec!["https://a.test/1", "/rel"]);
    }

    #[test]
    fn gate_counts_non_whitespace_only() {
        assert_eq!(content_chars(" a b\nc "), 3);
        assert!(passes_gate(&"x".repeat(100), 100));
        assert!(!passes_gate(&"x ".repeat(99), 100));
    }

    #[test]
    fn empty_document_extracts_nothing() {
        assert_eq!(extract(""), Extracted::default());
    }
}
