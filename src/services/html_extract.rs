// HTML Extraction
// Visible text and hyperlink targets from an email body

use scraper::{Html, Selector};
use std::collections::HashSet;

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtractedDocument {
    pub text: String,
    /// Unique link targets in document order
    pub links: Vec<String>,
}

/// Visible text nodes, one per line
pub fn visible_text(document: &Html) -> String {
    document
        .root_element()
        .descendants()
        .filter(|node| {
            !node.ancestors().any(|a| {
                a.value()
                    .as_element()
                    .map_or(false, |e| HIDDEN_ELEMENTS.contains(&e.name()))
            })
        })
        .filter_map(|node| node.value().as_text().map(|t| t.trim().to_string()))
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Targets of anchors carrying an `href`. Outlook safe-link rewrites keep the
/// real target in `originalsrc`, which wins when present.
pub fn link_targets(document: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|a| {
            let non_empty = |name: &str| {
                a.value().attr(name).map(str::trim).filter(|v| !v.is_empty())
            };
            non_empty("originalsrc")
                .or_else(|| non_empty("href"))
                .map(str::to_string)
        })
        .filter(|href| seen.insert(href.clone()))
        .collect()
}

pub fn extract_document(html: &str) -> ExtractedDocument {
    let document = Html::parse_document(html);
    ExtractedDocument {
        text: visible_text(&document),
        links: link_targets(&document),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"<html><head><title>Notice</title><style>p{color:red}</style></head>
        <body>
          <p>Your account is <b>locked</b>.</p>
          <script>var x = "hidden";</script>
          <a href="https://safelinks.example/?u=1" originalsrc="https://evil.example/login">Unlock</a>
          <a href="https://bank.example/help">Help</a>
          <a href="https://bank.example/help">Help again</a>
          <a href="  ">empty</a>
          <a href="https://bank.example/help" originalsrc="">blank rewrite</a>
        </body></html>"#;

    #[test]
    fn test_visible_text_skips_script_and_style() {
        let doc = extract_document(BODY);
        assert!(doc.text.contains("Your account is"));
        assert!(doc.text.contains("locked"));
        assert!(doc.text.contains("Unlock"));
        assert!(!doc.text.contains("hidden"));
        assert!(!doc.text.contains("color"));
        assert!(!doc.text.contains("Notice"));
    }

    #[test]
    fn test_links_prefer_originalsrc_and_dedupe() {
        let doc = extract_document(BODY);
        assert_eq!(
            doc.links,
            vec![
                "https://evil.example/login".to_string(),
                "https://bank.example/help".to_string(),
            ]
        );
    }

    #[test]
    fn test_anchor_without_href_is_ignored() {
        let doc = extract_document(
            r#"<p><a originalsrc="https://orphan.example/x">no href</a>
            <a name="top">anchor</a>
            <a href="https://ok.example/">ok</a></p>"#,
        );
        assert_eq!(doc.links, vec!["https://ok.example/".to_string()]);
    }

    #[test]
    fn test_plain_text_input() {
        let doc = extract_document("just some words");
        assert_eq!(doc.text, "just some words");
        assert!(doc.links.is_empty());
    }
}
