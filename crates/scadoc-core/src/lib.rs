//! Core documentation model shared by the scadoc extraction, reconciliation and verify crates.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "scadoc-core";

/// Literal MediaWiki edit-link text that leaks into scraped content.
pub const EDIT_MARKER: &str = "[edit]";

/// Category key whose key sections may also match any "General" heading.
pub const GENERAL_CATEGORY: &str = "general";

/// A documentation topic known to be commonly missed by the wiki crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySectionSpec {
    pub name: String,
    #[serde(alias = "parent_section")]
    pub parent_section: String,
}

impl KeySectionSpec {
    pub fn new(name: impl Into<String>, parent_section: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_section: parent_section.into(),
        }
    }
}

/// The compiled-in key section registry.
pub fn default_key_sections() -> Vec<KeySectionSpec> {
    [
        ("Matrix", "general"),
        ("Vectors", "general"),
        ("Ranges", "general"),
        ("Strings", "general"),
        ("Special variables", "general"),
        ("List Comprehensions", "general"),
        ("multmatrix", "transformations"),
        ("hull", "transformations"),
        ("minkowski", "transformations"),
    ]
    .into_iter()
    .map(|(name, parent)| KeySectionSpec::new(name, parent))
    .collect()
}

/// Content captured under one heading of a reference document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionRecord {
    #[serde(default)]
    pub content: String,
    /// `<pre>` blocks. Only these take part in code-gap detection.
    #[serde(default)]
    pub code_examples: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inline_code: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(default = "default_level")]
    pub level: u8,
}

fn default_level() -> u8 {
    1
}

impl SectionRecord {
    /// Block code first, then inline snippets, each tagged with its kind.
    pub fn code(&self) -> impl Iterator<Item = (CodeKind, &str)> {
        self.code_examples
            .iter()
            .map(|c| (CodeKind::Block, c.as_str()))
            .chain(self.inline_code.iter().map(|c| (CodeKind::Inline, c.as_str())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeKind {
    Block,
    Inline,
}

/// A documented module or function argument, from a parameter table or a
/// definition list.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub default: String,
}

/// Sections of one extracted page, in document order, titles unique.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractedDocument {
    sections: IndexMap<String, SectionRecord>,
}

impl ExtractedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with mapping semantics: a repeated title replaces the record
    /// but keeps the position of its first occurrence.
    pub fn insert(&mut self, title: impl Into<String>, record: SectionRecord) {
        self.sections.insert(title.into(), record);
    }

    pub fn get(&self, title: &str) -> Option<&SectionRecord> {
        self.sections.get(title)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SectionRecord)> {
        self.sections.iter().map(|(t, r)| (t.as_str(), r))
    }

    pub fn titles(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

impl<T: Into<String>> FromIterator<(T, SectionRecord)> for ExtractedDocument {
    fn from_iter<I: IntoIterator<Item = (T, SectionRecord)>>(iter: I) -> Self {
        let mut doc = Self::new();
        for (title, record) in iter {
            doc.insert(title, record);
        }
        doc
    }
}

/// The two independently extracted print versions used as ground truth.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencePair {
    pub main_print: ExtractedDocument,
    pub language_print: ExtractedDocument,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CodeExample {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub context: String,
    #[serde(flatten)]
    pub extra: IndexMap<String, JsonValue>,
}

impl CodeExample {
    pub fn new(code: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            context: context.into(),
            extra: IndexMap::new(),
        }
    }
}

/// One chapter of the previously scraped user manual. Fields absent from
/// the input stay absent on output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introduction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<IndexMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_examples: Option<Vec<CodeExample>>,
    #[serde(flatten)]
    pub extra: IndexMap<String, JsonValue>,
}

impl CategoryRecord {
    /// Empty category as created when merged content targets an unknown key.
    pub fn synthesized(category_key: &str) -> Self {
        Self {
            title: Some(capitalize(category_key)),
            ..Self::default()
        }
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    pub fn introduction(&self) -> &str {
        self.introduction.as_deref().unwrap_or_default()
    }

    pub fn section(&self, name: &str) -> Option<&str> {
        self.content.as_ref()?.get(name).map(String::as_str)
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &str)> {
        self.content
            .iter()
            .flatten()
            .map(|(name, text)| (name.as_str(), text.as_str()))
    }

    pub fn examples(&self) -> &[CodeExample] {
        self.code_examples.as_deref().unwrap_or_default()
    }

    /// Replaces the text of an existing section in place, or appends it.
    pub fn set_section(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.content
            .get_or_insert_with(IndexMap::new)
            .insert(name.into(), text.into());
    }

    pub fn push_example(&mut self, example: CodeExample) {
        self.code_examples.get_or_insert_with(Vec::new).push(example);
    }
}

pub type UserManual = IndexMap<String, CategoryRecord>;

/// Persisted dataset shape; only `user_manual` is audited.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentationDataset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cheat_sheet: Option<JsonValue>,
    #[serde(default)]
    pub user_manual: UserManual,
    #[serde(flatten)]
    pub extra: IndexMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingEntry {
    pub section: String,
    pub parent_section: String,
    pub print_content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteEntry {
    pub section: String,
    pub parent_section: String,
    pub existing_length: usize,
    pub print_length: usize,
    pub existing_content: String,
    pub print_content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeGapEntry {
    pub section: String,
    pub parent_section: String,
    pub code: String,
}

pub type SupplementaryContent = IndexMap<String, IndexMap<String, String>>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub missing_sections: Vec<MissingEntry>,
    pub incomplete_content: Vec<IncompleteEntry>,
    pub missing_code_examples: Vec<CodeGapEntry>,
    pub supplementary_content: SupplementaryContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingPair {
    pub query: String,
    pub response: String,
}

/// First character upper-cased, the rest lower-cased.
pub fn capitalize(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => {
            let mut s = String::new();
            s.extend(first.to_uppercase());
            s.push_str(&chars.as_str().to_lowercase());
            s
        }
        None => String::new(),
    }
}

/// Character count, the unit every length threshold is expressed in.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}
