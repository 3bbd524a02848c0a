use std::collections::{HashSet, VecDeque};
use std::sync::OnceLock;

use regex::Regex;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use url::Url;

/// Structural metadata of a root page, produced once per seeker run
#[derive(Debug, Clone, PartialEq)]
pub struct PageBaseInfo {
    /// Version label derived from the DOCTYPE, `None` without one
    pub html_version: Option<String>,

    /// Text of the first `<title>` inside `<head>`
    pub page_title: String,

    /// Whether some `<form>` contains a password input
    pub login_form_present: bool,

    /// Heading tag counts, h1 first
    pub headings_by_level: [usize; 6],

    /// Distinct links on the page's own host
    pub internal_links: usize,

    /// Distinct links on other hosts
    pub external_links: usize,

    /// Distinct absolute http(s) links, in discovery order
    pub links: Vec<Url>,
}

/// Label used when the DOCTYPE carries no legacy public identifier
const HTML5_LABEL: &str = "HTML 5.0";

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(X?HTML)\s+(\d+(?:\.\d+)*)").expect("version pattern is valid")
    })
}

/// Map a DOCTYPE public identifier to a version label.
///
/// Identifiers of the form `-//W3C//DTD HTML 4.01 Transitional//EN` yield
/// the embedded token (`HTML 4.01`, `XHTML 1.0`, ...). Anything unrecognized
/// is passed through untouched.
pub fn html_version_label(public_id: &str) -> String {
    let public_id = public_id.trim();
    if public_id.is_empty() {
        return HTML5_LABEL.to_string();
    }

    match version_pattern().captures(public_id) {
        Some(caps) => format!("{} {}", caps[1].to_uppercase(), &caps[2]),
        None => public_id.to_string(),
    }
}

/// Resolve an `href` against the page, keeping only http(s) targets
fn resolve_link(page: &Url, href: &str) -> Option<Url> {
    let mut link = page.join(href).ok()?;
    if link.scheme() != "http" && link.scheme() != "https" {
        return None;
    }
    link.set_fragment(None);
    Some(link)
}

fn is_internal(page: &Url, link: &Url) -> bool {
    link.host_str() == page.host_str() && link.port() == page.port()
}

/// `h1`..`h6` only; `h01` or `h+1` are not headings
fn heading_level(tag: &str) -> Option<usize> {
    match tag.as_bytes() {
        [b'h', digit @ b'1'..=b'6'] => Some(usize::from(digit - b'0')),
        _ => None,
    }
}

/// Analyze a parsed document in a single breadth-first pass
pub fn analyze_page(document: &Html, page: &Url) -> PageBaseInfo {
    let mut html_version = None;
    let mut page_title = None;
    let mut login_form_present = false;
    let mut headings_by_level = [0usize; 6];
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut queue = VecDeque::from([document.tree.root()]);
    while let Some(node) = queue.pop_front() {
        match node.value() {
            Node::Doctype(doctype) => {
                html_version = Some(html_version_label(doctype.public_id()));
            }
            Node::Element(element) => match element.name() {
                "a" => {
                    let link = element.attr("href").and_then(|href| resolve_link(page, href));
                    if let Some(link) = link {
                        if seen.insert(link.clone()) {
                            links.push(link);
                        }
                    }
                }
                "form" if !login_form_present => {
                    login_form_present = node.descendants().any(|child| match child.value() {
                        Node::Element(input) => {
                            input.name() == "input"
                                && input
                                    .attr("type")
                                    .is_some_and(|kind| kind.eq_ignore_ascii_case("password"))
                        }
                        _ => false,
                    });
                }
                "head" if page_title.is_none() => {
                    page_title = Some(
                        node.descendants()
                            .filter_map(ElementRef::wrap)
                            .find(|child| child.value().name() == "title")
                            .map(|title| title.text().collect::<String>().trim().to_string())
                            .unwrap_or_default(),
                    );
                }
                name => {
                    if let Some(level) = heading_level(name) {
                        headings_by_level[level - 1] += 1;
                    }
                }
            },
            _ => {}
        }

        queue.extend(node.children());
    }

    let internal_links = links.iter().filter(|link| is_internal(page, link)).count();

    PageBaseInfo {
        html_version,
        page_title: page_title.unwrap_or_default(),
        login_form_present,
        headings_by_level,
        internal_links,
        external_links: links.len() - internal_links,
        links,
    }
}
