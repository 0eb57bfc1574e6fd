//! HTML analysis for a fetched page
//!
//! This module extracts the structural metrics recorded for each crawl:
//! - Heading counts (h1, h2, h3)
//! - Whether the page carries a login form
//! - A heuristic HTML version label
//! - The page title
//! - Outbound links, resolved and classified internal/external

use scraper::{Html, Selector};
use std::fmt;
use url::Url;

/// Number of h1, h2 and h3 elements on a page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadingCounts {
    pub h1: u32,
    pub h2: u32,
    pub h3: u32,
}

/// Heuristic HTML version classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HtmlVersion {
    Html5,
    Xhtml,
    Html401,
    Unknown,
}

impl HtmlVersion {
    /// Label stored with the job
    pub fn label(&self) -> &'static str {
        match self {
            Self::Html5 => "HTML 5",
            Self::Xhtml => "XHTML",
            Self::Html401 => "HTML 4.01",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HtmlVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A link found on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// The href as written when absolute, otherwise resolved against the page
    /// (or the raw href when it cannot be resolved)
    pub url: String,
    pub is_internal: bool,
}

/// Everything the analyzer extracts from one page
#[derive(Debug, Clone)]
pub struct PageAnalysis {
    pub title: Option<String>,
    pub headings: HeadingCounts,
    pub has_login_form: bool,
    pub html_version: HtmlVersion,
    pub links: Vec<ExtractedLink>,
}

/// Classifies markup by scanning it for version markers
///
/// Checks, case-insensitively and in this order: the HTML5 doctype, the token
/// `xhtml`, then `html 4.01`. This is a textual heuristic, not a DOCTYPE parser.
pub fn detect_html_version(raw: &str) -> HtmlVersion {
    let lower = raw.to_lowercase();
    if lower.contains("<!doctype html>") {
        HtmlVersion::Html5
    } else if lower.contains("xhtml") {
        HtmlVersion::Xhtml
    } else if lower.contains("html 4.01") {
        HtmlVersion::Html401
    } else {
        HtmlVersion::Unknown
    }
}

/// A parsed HTML document
///
/// Each metric is a separate method so callers can report progress between
/// steps. The parsed tree is not `Send`; drop it before awaiting.
pub struct PageDocument {
    document: Html,
}

impl PageDocument {
    pub fn parse(html: &str) -> Self {
        Self {
            document: Html::parse_document(html),
        }
    }

    fn count(&self, selector: &str) -> u32 {
        match Selector::parse(selector) {
            Ok(selector) => self.document.select(&selector).count() as u32,
            Err(_) => 0,
        }
    }

    pub fn heading_counts(&self) -> HeadingCounts {
        HeadingCounts {
            h1: self.count("h1"),
            h2: self.count("h2"),
            h3: self.count("h3"),
        }
    }

    /// True iff some form contains a password input
    pub fn has_login_form(&self) -> bool {
        let (Ok(form_selector), Ok(password_selector)) = (
            Selector::parse("form"),
            Selector::parse(r#"input[type="password"]"#),
        ) else {
            return false;
        };

        self.document
            .select(&form_selector)
            .any(|form| form.select(&password_selector).next().is_some())
    }

    /// Extracts the page title from the first `<title>` element
    pub fn title(&self) -> Option<String> {
        let title_selector = Selector::parse("title").ok()?;

        self.document
            .select(&title_selector)
            .next()
            .map(|element| element.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Extracts every anchor link in document order
    ///
    /// Empty hrefs and fragment-only references are skipped. Each href is
    /// resolved against `target`; it is internal iff its hostname equals the
    /// target's hostname exactly.
    pub fn links(&self, target: &Url) -> Vec<ExtractedLink> {
        let mut links = Vec::new();

        if let Ok(a_selector) = Selector::parse("a[href]") {
            for element in self.document.select(&a_selector) {
                if let Some(link) = element
                    .value()
                    .attr("href")
                    .and_then(|href| classify_link(href, target))
                {
                    links.push(link);
                }
            }
        }

        links
    }
}

/// Resolves and classifies a single href
///
/// Returns None for empty and fragment-only hrefs.
fn classify_link(href: &str, target: &Url) -> Option<ExtractedLink> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    // absolute hrefs are stored as written; only relative ones are resolved
    if let Ok(absolute) = Url::parse(href) {
        return Some(ExtractedLink {
            is_internal: absolute.host_str() == target.host_str(),
            url: href.to_string(),
        });
    }

    let link = match target.join(href) {
        Ok(resolved) => ExtractedLink {
            is_internal: resolved.host_str() == target.host_str(),
            url: resolved.to_string(),
        },
        // unresolvable hrefs are kept verbatim and have no host to match
        Err(_) => ExtractedLink {
            url: href.to_string(),
            is_internal: false,
        },
    };

    Some(link)
}

/// Runs every analysis step over `html`
///
/// # Example
///
/// ```
/// use linkscope::crawler::analyze_page;
/// use url::Url;
///
/// let html = r#"<!DOCTYPE html><html><head><title>Test</title></head>
///     <body><h1>Hi</h1><a href="/page">Link</a></body></html>"#;
/// let target = Url::parse("https://example.com/").unwrap();
/// let analysis = analyze_page(html, &target);
/// assert_eq!(analysis.title.as_deref(), Some("Test"));
/// assert_eq!(analysis.headings.h1, 1);
/// assert_eq!(analysis.links[0].url, "https://example.com/page");
/// ```
pub fn analyze_page(html: &str, target: &Url) -> PageAnalysis {
    let document = PageDocument::parse(html);

    PageAnalysis {
        title: document.title(),
        headings: document.heading_counts(),
        has_login_form: document.has_login_form(),
        html_version: detect_html_version(html),
        links: document.links(target),
    }
}
