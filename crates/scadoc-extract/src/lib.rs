//! Reference source contracts, print-version HTML extraction and dataset loading.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scadoc_core::{DocumentationDataset, ExtractedDocument, Parameter, SectionRecord, EDIT_MARKER};
use scadoc_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Node, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "scadoc-extract";

pub const MAIN_PRINT_SOURCE_ID: &str = "main-print";
pub const LANGUAGE_PRINT_SOURCE_ID: &str = "language-print";

/// Headings that never become sections of their own.
const IGNORED_HEADINGS: &[&str] = &[
    "References",
    "External links",
    "See also",
    "Navigation menu",
    "Contents",
];

const SKIPPED_TAGS: &[&str] = &["script", "style", "nav", "footer", "header", "noscript"];
const SKIPPED_CLASSES: &[&str] = &["mw-editsection", "toc", "navbox", "printfooter"];
const TEXT_TAGS: &[&str] = &["p", "li", "dt", "dd", "td", "th", "caption", "blockquote"];
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "b", "big", "br", "cite", "code", "em", "i", "kbd", "q", "s", "samp", "small",
    "span", "strong", "sub", "sup", "tt", "u", "var",
];

static DEFAULT_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)default[:\s]+([^.]+)").expect("default value pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub source_id: String,
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("reference {source_id} unavailable at {location}: {reason}")]
    ReferenceUnavailable {
        source_id: String,
        location: String,
        reason: String,
    },
    #[error("reading dataset {path}: {source}")]
    DatasetUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed dataset {path}: {source}")]
    MalformedDataset {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid selector {selector}: {message}")]
    Selector { selector: String, message: String },
}

impl ExtractError {
    fn unavailable(source_id: &str, location: &str, reason: impl ToString) -> Self {
        Self::ReferenceUnavailable {
            source_id: source_id.to_string(),
            location: location.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A page the reconciliation treats as ground truth.
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    fn source_id(&self) -> &str;
    fn location(&self) -> &str;

    async fn fetch(&self, http: &HttpFetcher, ctx: &SourceContext)
        -> Result<FetchedPage, ExtractError>;

    fn parse(&self, page: &FetchedPage) -> Result<ExtractedDocument, ExtractError>;
}

/// Wikibooks "print version" page, fetched over HTTP or read from a local
/// file when the location is not an http(s) URL.
#[derive(Debug, Clone)]
pub struct PrintVersionSource {
    source_id: String,
    location: String,
}

impl PrintVersionSource {
    pub fn new(source_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            location: location.into(),
        }
    }

    pub fn is_remote(&self) -> bool {
        self.location.starts_with("http://") || self.location.starts_with("https://")
    }
}

#[async_trait]
impl ReferenceSource for PrintVersionSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        ctx: &SourceContext,
    ) -> Result<FetchedPage, ExtractError> {
        if self.is_remote() {
            let resp = http
                .fetch_bytes(ctx.run_id, &self.source_id, &self.location)
                .await
                .map_err(|e: FetchError| ExtractError::unavailable(&self.source_id, &self.location, e))?;
            return Ok(FetchedPage {
                source_id: self.source_id.clone(),
                url: resp.final_url.clone(),
                body: resp.text_lossy(),
                fetched_at: resp.fetched_at,
            });
        }

        let body = tokio::fs::read_to_string(&self.location)
            .await
            .map_err(|e| ExtractError::unavailable(&self.source_id, &self.location, e))?;
        Ok(FetchedPage {
            source_id: self.source_id.clone(),
            url: self.location.clone(),
            body,
            fetched_at: ctx.fetched_at,
        })
    }

    fn parse(&self, page: &FetchedPage) -> Result<ExtractedDocument, ExtractError> {
        let doc = extract_sections(&page.body)?;
        if doc.is_empty() {
            return Err(ExtractError::unavailable(
                &self.source_id,
                &page.url,
                "no headed sections found",
            ));
        }
        info!(source_id = %self.source_id, sections = doc.len(), "extracted print version");
        Ok(doc)
    }
}

pub fn main_print_source(location: impl Into<String>) -> PrintVersionSource {
    PrintVersionSource::new(MAIN_PRINT_SOURCE_ID, location)
}

pub fn language_print_source(location: impl Into<String>) -> PrintVersionSource {
    PrintVersionSource::new(LANGUAGE_PRINT_SOURCE_ID, location)
}

/// Load the previously scraped dataset. Any parse failure is fatal to a run.
pub fn load_existing_dataset(path: impl AsRef<Path>) -> Result<DocumentationDataset, ExtractError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|source| ExtractError::DatasetUnreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let dataset: DocumentationDataset =
        serde_json::from_str(&data).map_err(|source| ExtractError::MalformedDataset {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), categories = dataset.user_manual.len(), "loaded dataset");
    Ok(dataset)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Heading { level: u8, title: String },
    Text(String),
    Code(String),
    InlineCode(String),
    Parameters(Vec<Parameter>),
}

/// Turn one print-version page into per-heading sections.
pub fn extract_sections(html: &str) -> Result<ExtractedDocument, ExtractError> {
    let document = Html::parse_document(html);
    let root = content_root(&document)?;
    let mut blocks = Vec::new();
    collect_blocks(root, &mut blocks);
    Ok(assemble_sections(&blocks))
}

fn parse_selector(selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|e| ExtractError::Selector {
        selector: selector.to_string(),
        message: e.to_string(),
    })
}

fn content_root(document: &Html) -> Result<ElementRef<'_>, ExtractError> {
    for selector in ["#mw-content-text", "body"] {
        let sel = parse_selector(selector)?;
        if let Some(el) = document.select(&sel).next() {
            return Ok(el);
        }
    }
    Ok(document.root_element())
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn is_skipped(el: ElementRef<'_>) -> bool {
    let value = el.value();
    SKIPPED_TAGS.contains(&value.name())
        || value.id() == Some("toc")
        || value.classes().any(|c| SKIPPED_CLASSES.contains(&c))
}

fn contains_structural(el: ElementRef<'_>) -> bool {
    el.descendants().filter_map(ElementRef::wrap).any(|d| {
        let tag = d.value().name();
        matches!(tag, "pre" | "table" | "dl") || heading_level(tag).is_some()
    })
}

fn visible_text(el: ElementRef<'_>, out: &mut String) {
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child) {
                    if !is_skipped(child_el) {
                        visible_text(child_el, out);
                    }
                }
            }
            _ => {}
        }
    }
}

fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    visible_text(el, &mut raw);
    normalize_text(&raw)
}

fn heading_title(el: ElementRef<'_>) -> String {
    let mut raw = String::new();
    visible_text(el, &mut raw);
    let title = normalize_text(&raw);
    title
        .strip_suffix(EDIT_MARKER)
        .unwrap_or(&title)
        .trim()
        .to_string()
}

// Loose text and inline elements between blocks are gathered and flushed as
// one text block at the next block boundary.
fn collect_blocks(el: ElementRef<'_>, out: &mut Vec<Block>) {
    let mut loose = String::new();

    for node in el.children() {
        if let Node::Text(text) = node.value() {
            loose.push_str(text);
            continue;
        }
        let Some(child) = ElementRef::wrap(node) else {
            continue;
        };
        if is_skipped(child) {
            continue;
        }
        let tag = child.value().name();

        if INLINE_TAGS.contains(&tag) && !contains_structural(child) {
            if tag == "br" {
                loose.push(' ');
            }
            visible_text(child, &mut loose);
            push_inline_code(child, out);
            continue;
        }

        flush_text(&mut loose, out);

        if let Some(level) = heading_level(tag) {
            let title = heading_title(child);
            if !title.is_empty() {
                out.push(Block::Heading { level, title });
            }
            continue;
        }

        if tag == "pre" {
            let code = child.text().collect::<String>();
            let code = code.trim();
            if !code.is_empty() {
                out.push(Block::Code(code.to_string()));
            }
            continue;
        }

        if TEXT_TAGS.contains(&tag) && !contains_structural(child) {
            let mut raw = String::new();
            visible_text(child, &mut raw);
            flush_text(&mut raw, out);
            push_inline_code(child, out);
            continue;
        }

        let parameters = match tag {
            "table" => table_parameters(child),
            "dl" => definition_parameters(child),
            _ => Vec::new(),
        };
        if !parameters.is_empty() {
            out.push(Block::Parameters(parameters));
        }
        collect_blocks(child, out);
    }

    flush_text(&mut loose, out);
}

fn flush_text(raw: &mut String, out: &mut Vec<Block>) {
    let text = normalize_text(raw);
    raw.clear();
    if !text.is_empty() && text != EDIT_MARKER {
        out.push(Block::Text(text));
    }
}

fn push_inline_code(el: ElementRef<'_>, out: &mut Vec<Block>) {
    for code in el
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|d| d.value().name() == "code")
    {
        let snippet = element_text(code);
        if !snippet.is_empty() {
            out.push(Block::InlineCode(snippet));
        }
    }
}

fn default_value(description: &str) -> String {
    DEFAULT_VALUE_RE
        .captures(description)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

fn parameter(name: String, description: String, kind: String) -> Option<Parameter> {
    if name.is_empty() {
        return None;
    }
    Some(Parameter {
        name,
        default: default_value(&description),
        description,
        kind,
    })
}

/// Rows of a table whose header mentions a parameter or name column:
/// name, description and an optional type column.
fn table_parameters(table: ElementRef<'_>) -> Vec<Parameter> {
    let header = table
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|d| d.value().name() == "th")
        .map(element_text)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if !header.contains("parameter") && !header.contains("name") {
        return Vec::new();
    }

    table
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|d| d.value().name() == "tr")
        .skip(1)
        .filter_map(|row| {
            let mut cells = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|c| matches!(c.value().name(), "td" | "th"))
                .map(element_text);
            let name = cells.next()?;
            let description = cells.next()?;
            parameter(name, description, cells.next().unwrap_or_default())
        })
        .collect()
}

fn definition_parameters(list: ElementRef<'_>) -> Vec<Parameter> {
    let mut parameters = Vec::new();
    let mut term = None;
    for child in list.children().filter_map(ElementRef::wrap) {
        match child.value().name() {
            "dt" => term = Some(element_text(child)),
            "dd" => {
                if let Some(name) = term.take() {
                    parameters.extend(parameter(name, element_text(child), String::new()));
                }
            }
            _ => {}
        }
    }
    parameters
}

struct OpenSection {
    slot: usize,
    level: u8,
    text: Vec<String>,
    code: Vec<String>,
    inline_code: Vec<String>,
    parameters: Vec<Parameter>,
}

fn close_section(
    open: OpenSection,
    titles: &[(String, bool)],
    slots: &mut [Option<(String, SectionRecord)>],
) {
    let (title, ignored) = &titles[open.slot];
    if !*ignored {
        slots[open.slot] = Some((
            title.clone(),
            SectionRecord {
                content: open.text.join("\n"),
                code_examples: open.code,
                inline_code: open.inline_code,
                parameters: open.parameters,
                level: open.level,
            },
        ));
    }
}

/// Each heading owns every block up to the next heading of the same or a
/// shallower level; nested headings share their blocks with all open parents.
fn assemble_sections(blocks: &[Block]) -> ExtractedDocument {
    let mut slots: Vec<Option<(String, SectionRecord)>> = Vec::new();
    let mut titles: Vec<(String, bool)> = Vec::new();
    let mut stack: Vec<OpenSection> = Vec::new();

    for block in blocks {
        match block {
            Block::Heading { level, title } => {
                while stack.last().is_some_and(|open| open.level >= *level) {
                    if let Some(open) = stack.pop() {
                        close_section(open, &titles, &mut slots);
                    }
                }
                let ignored = IGNORED_HEADINGS.iter().any(|h| h.eq_ignore_ascii_case(title));
                titles.push((title.clone(), ignored));
                slots.push(None);
                stack.push(OpenSection {
                    slot: titles.len() - 1,
                    level: *level,
                    text: Vec::new(),
                    code: Vec::new(),
                    inline_code: Vec::new(),
                    parameters: Vec::new(),
                });
            }
            Block::Text(text) => {
                for open in &mut stack {
                    open.text.push(text.clone());
                }
            }
            Block::Code(code) => {
                for open in &mut stack {
                    open.code.push(code.clone());
                }
            }
            Block::InlineCode(code) => {
                for open in &mut stack {
                    open.inline_code.push(code.clone());
                }
            }
            Block::Parameters(parameters) => {
                for open in &mut stack {
                    open.parameters.extend(parameters.iter().cloned());
                }
            }
        }
    }
    while let Some(open) = stack.pop() {
        close_section(open, &titles, &mut slots);
    }

    slots.into_iter().flatten().collect()
}
