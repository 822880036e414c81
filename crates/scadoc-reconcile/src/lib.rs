//! Reconciliation of a scraped documentation dataset against print-version references.
//!
//! Every stage here is a pure function over borrowed inputs: the matcher
//! finds reference text for a key section, the comparator classifies gaps,
//! the reporter renders them, the enhancer merges them into a copy of the
//! dataset and the synthesizer derives training pairs from the result.

use scadoc_core::{
    capitalize, char_len, CategoryRecord, CodeExample, CodeGapEntry, CodeKind, ComparisonResult,
    ExtractedDocument, IncompleteEntry, KeySectionSpec, MissingEntry, ReferencePair, TrainingPair,
    UserManual, EDIT_MARKER, GENERAL_CATEGORY,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CRATE_NAME: &str = "scadoc-reconcile";

pub const TRUNCATION_RATIO: f64 = 0.7;
pub const CODE_TOKEN_OVERLAP_RATIO: f64 = 0.7;

pub const DEFAULT_DOMAIN: &str = "OpenSCAD";
pub const CODE_FENCE_LANG: &str = "openscad";

const SUPPLEMENTED_CONTEXT_PREFIX: &str = "Example from ";
const SUPPLEMENTED_CONTEXT_SUFFIX: &str = " section (supplemented from print version)";

const MIN_INTRODUCTION_CHARS: usize = 50;
const MIN_CONTENT_CHARS: usize = 50;
const MIN_CONTEXT_CHARS: usize = 10;
const MIN_RESPONSE_CHARS: usize = 30;

fn normalize_code(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn token_overlap(a: &str, b: &str) -> f64 {
    let tokens = a.split(' ').filter(|t| !t.is_empty()).collect::<Vec<_>>();
    if tokens.is_empty() {
        return 0.0;
    }
    let shared = tokens.iter().filter(|t| b.contains(*t)).count();
    shared as f64 / tokens.len() as f64
}

pub fn similar(a: &str, b: &str) -> bool {
    similar_with_ratio(a, b, CODE_TOKEN_OVERLAP_RATIO)
}

pub fn similar_with_ratio(a: &str, b: &str, overlap_ratio: f64) -> bool {
    let a = normalize_code(a);
    let b = normalize_code(b);
    if a.contains(&b) || b.contains(&a) {
        return true;
    }
    if a.is_empty() || b.is_empty() {
        return false;
    }
    token_overlap(&a, &b) > overlap_ratio || token_overlap(&b, &a) > overlap_ratio
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Located {
    pub content: Option<String>,
    pub code_examples: Vec<String>,
}

impl Located {
    fn captured(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.is_empty())
    }

    fn adopt(&mut self, doc: &ExtractedDocument, title: &str) {
        if let Some(record) = doc.get(title) {
            self.content = Some(record.content.clone());
            self.code_examples = record.code_examples.clone();
        }
    }
}

/// Exact title in the main print, then the first loosely matching main
/// print title, then the exact title in the language print.
pub fn locate(key: &KeySectionSpec, reference: &ReferencePair) -> Located {
    let mut found = Located::default();
    let main = &reference.main_print;

    found.adopt(main, &key.name);

    for title in main.titles() {
        if found.captured() {
            break;
        }
        let general_match = key.parent_section == GENERAL_CATEGORY && title.contains("General");
        if title.contains(key.name.as_str()) || general_match {
            found.adopt(main, title);
        }
    }

    if !found.captured() {
        found.adopt(&reference.language_print, &key.name);
    }

    if !found.captured() {
        found.content = None;
    }
    found
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComparatorConfig {
    pub truncation_ratio: f64,
    pub code_overlap_ratio: f64,
}

impl Default for ComparatorConfig {
    fn default() -> Self {
        Self {
            truncation_ratio: TRUNCATION_RATIO,
            code_overlap_ratio: CODE_TOKEN_OVERLAP_RATIO,
        }
    }
}

pub struct ContentComparator {
    config: ComparatorConfig,
}

impl Default for ContentComparator {
    fn default() -> Self {
        Self::new(ComparatorConfig::default())
    }
}

impl ContentComparator {
    pub fn new(config: ComparatorConfig) -> Self {
        Self { config }
    }

    pub fn is_truncated(&self, existing_len: usize, reference_len: usize) -> bool {
        (existing_len as f64) < self.config.truncation_ratio * (reference_len as f64)
    }

    // An absent category reads as an absent section.
    pub fn compare(
        &self,
        keys: &[KeySectionSpec],
        manual: &UserManual,
        reference: &ReferencePair,
    ) -> ComparisonResult {
        let mut result = ComparisonResult::default();

        for key in keys {
            let category = manual.get(&key.parent_section);
            let existing = category.and_then(|c| c.section(&key.name));
            let located = locate(key, reference);

            match (existing, located.content.as_deref()) {
                (None, print_content) => {
                    debug!(section = %key.name, parent = %key.parent_section, found = print_content.is_some(), "missing section");
                    result.missing_sections.push(MissingEntry {
                        section: key.name.clone(),
                        parent_section: key.parent_section.clone(),
                        print_content: print_content.map(ToString::to_string),
                    });
                    if let Some(text) = print_content {
                        stage(&mut result, key, text);
                    }
                }
                (Some(existing), Some(text)) => {
                    let existing_length = char_len(existing);
                    let print_length = char_len(text);
                    if self.is_truncated(existing_length, print_length) {
                        debug!(section = %key.name, existing_length, print_length, "incomplete section");
                        result.incomplete_content.push(IncompleteEntry {
                            section: key.name.clone(),
                            parent_section: key.parent_section.clone(),
                            existing_length,
                            print_length,
                            existing_content: existing.to_string(),
                            print_content: text.to_string(),
                        });
                        stage(&mut result, key, text);
                    }
                }
                (Some(_), None) => {}
            }

            let existing_code = category.map(CategoryRecord::examples).unwrap_or_default();
            for code in &located.code_examples {
                let known = existing_code
                    .iter()
                    .any(|ex| similar_with_ratio(code, &ex.code, self.config.code_overlap_ratio));
                if !known {
                    result.missing_code_examples.push(CodeGapEntry {
                        section: key.name.clone(),
                        parent_section: key.parent_section.clone(),
                        code: code.clone(),
                    });
                }
            }
        }

        result
    }
}

fn stage(result: &mut ComparisonResult, key: &KeySectionSpec, text: &str) {
    result
        .supplementary_content
        .entry(key.parent_section.clone())
        .or_default()
        .insert(key.name.clone(), text.to_string());
}

pub fn compare(
    keys: &[KeySectionSpec],
    manual: &UserManual,
    reference: &ReferencePair,
) -> ComparisonResult {
    ContentComparator::default().compare(keys, manual, reference)
}

pub const REPORT_TITLE: &str = "# OpenSCAD Documentation Verification Report";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    pub structured: ComparisonResult,
    pub human_readable: String,
}

pub fn report(result: &ComparisonResult) -> GapReport {
    GapReport {
        structured: result.clone(),
        human_readable: render_markdown(result),
    }
}

// At least three backticks, and always longer than any run inside the body.
fn fence_for(body: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in body.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat((longest + 1).max(3))
}

fn push_fenced(lines: &mut Vec<String>, lang: &str, body: &str) {
    let fence = fence_for(body);
    lines.push(format!("{fence}{lang}"));
    lines.push(body.to_string());
    lines.push(fence);
    lines.push(String::new());
}

pub fn render_markdown(result: &ComparisonResult) -> String {
    let mut lines = vec![
        REPORT_TITLE.to_string(),
        String::new(),
        "## Summary".to_string(),
        String::new(),
        format!("- Missing sections: {}", result.missing_sections.len()),
        format!("- Incomplete sections: {}", result.incomplete_content.len()),
        format!("- Missing code examples: {}", result.missing_code_examples.len()),
        String::new(),
        "## Missing Sections".to_string(),
        String::new(),
    ];

    if result.missing_sections.is_empty() {
        lines.push("No missing sections found.".to_string());
        lines.push(String::new());
    }
    for entry in &result.missing_sections {
        lines.push(format!("### {} (in {})", entry.section, entry.parent_section));
        lines.push(String::new());
        match &entry.print_content {
            Some(text) => push_fenced(&mut lines, "", text),
            None => {
                lines.push("_Not found in the print version either._".to_string());
                lines.push(String::new());
            }
        }
    }

    lines.push("## Incomplete Content".to_string());
    lines.push(String::new());
    if result.incomplete_content.is_empty() {
        lines.push("No incomplete content found.".to_string());
        lines.push(String::new());
    }
    for entry in &result.incomplete_content {
        lines.push(format!("### {} (in {})", entry.section, entry.parent_section));
        lines.push(String::new());
        lines.push(format!("- Existing length: {} characters", entry.existing_length));
        lines.push(format!("- Print version length: {} characters", entry.print_length));
        lines.push(String::new());
        lines.push("#### Existing content".to_string());
        lines.push(String::new());
        push_fenced(&mut lines, "", &entry.existing_content);
        lines.push("#### Print version content".to_string());
        lines.push(String::new());
        push_fenced(&mut lines, "", &entry.print_content);
    }

    lines.push("## Missing Code Examples".to_string());
    lines.push(String::new());
    if result.missing_code_examples.is_empty() {
        lines.push("No missing code examples found.".to_string());
        lines.push(String::new());
    }
    for entry in &result.missing_code_examples {
        lines.push(format!("### {} (in {})", entry.section, entry.parent_section));
        lines.push(String::new());
        push_fenced(&mut lines, CODE_FENCE_LANG, &entry.code);
    }

    lines.join("\n")
}

/// What to do with a code gap whose category is absent from the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeGapPolicy {
    #[default]
    DropMissingCategory,
    SynthesizeCategory,
}

pub fn supplemented_context(section: &str) -> String {
    format!("{SUPPLEMENTED_CONTEXT_PREFIX}{section}{SUPPLEMENTED_CONTEXT_SUFFIX}")
}

pub fn enhance(manual: &UserManual, result: &ComparisonResult) -> UserManual {
    enhance_with_policy(manual, result, CodeGapPolicy::default())
}

pub fn enhance_with_policy(
    manual: &UserManual,
    result: &ComparisonResult,
    policy: CodeGapPolicy,
) -> UserManual {
    let mut enhanced = manual.clone();

    for (parent, sections) in &result.supplementary_content {
        let category = enhanced
            .entry(parent.clone())
            .or_insert_with(|| CategoryRecord::synthesized(parent));
        for (name, text) in sections {
            category.set_section(name.clone(), text.clone());
        }
    }

    for gap in &result.missing_code_examples {
        let category = match policy {
            CodeGapPolicy::DropMissingCategory => enhanced.get_mut(&gap.parent_section),
            CodeGapPolicy::SynthesizeCategory => Some(
                enhanced
                    .entry(gap.parent_section.clone())
                    .or_insert_with(|| CategoryRecord::synthesized(&gap.parent_section)),
            ),
        };
        match category {
            Some(category) => category
                .push_example(CodeExample::new(gap.code.clone(), supplemented_context(&gap.section))),
            None => debug!(section = %gap.section, parent = %gap.parent_section, "dropping code gap for absent category"),
        }
    }

    enhanced
}

pub struct TrainingPairSynthesizer {
    domain: String,
}

impl Default for TrainingPairSynthesizer {
    fn default() -> Self {
        Self::new(DEFAULT_DOMAIN)
    }
}

impl TrainingPairSynthesizer {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    pub fn synthesize(&self, manual: &UserManual) -> Vec<TrainingPair> {
        let domain = &self.domain;
        let mut pairs = Vec::new();

        for (key, category) in manual {
            let title = category_title(key, category);

            let introduction = category.introduction();
            if char_len(introduction) > MIN_INTRODUCTION_CHARS {
                pairs.push(pair(
                    format!("Explain {title} in {domain}"),
                    introduction.to_string(),
                ));
            }

            for (section, text) in category.sections() {
                if char_len(text) > MIN_CONTENT_CHARS && text != EDIT_MARKER {
                    pairs.push(pair(format!("What is {section} in {domain}?"), text.to_string()));
                    pairs.push(pair(
                        format!("How does {section} work in {domain}?"),
                        text.to_string(),
                    ));
                }
            }

            for example in category.examples() {
                let context = &example.context;
                if char_len(context) <= MIN_CONTEXT_CHARS || context == EDIT_MARKER {
                    continue;
                }
                let response = format!("```{CODE_FENCE_LANG}\n{}\n```\n\n{context}", example.code);
                let subject = section_from_context(context).unwrap_or(title.as_str());
                pairs.push(pair(
                    format!("Give me an example of {title} in {domain}"),
                    response.clone(),
                ));
                pairs.push(pair(
                    format!("Show me how to use {subject} in {domain}"),
                    response,
                ));
            }
        }

        pairs.retain(|p| char_len(&p.response) >= MIN_RESPONSE_CHARS && !p.response.contains(EDIT_MARKER));
        pairs
    }
}

fn category_title(key: &str, category: &CategoryRecord) -> String {
    match category.title() {
        "" => capitalize(key),
        title => title.to_string(),
    }
}

fn pair(query: String, response: String) -> TrainingPair {
    TrainingPair { query, response }
}

/// Section name out of an `Example from X section ...` context.
fn section_from_context(context: &str) -> Option<&str> {
    let rest = context.strip_prefix(SUPPLEMENTED_CONTEXT_PREFIX)?;
    let end = rest.find(" section")?;
    let section = rest[..end].trim();
    if section.is_empty() {
        None
    } else {
        Some(section)
    }
}

pub fn synthesize(manual: &UserManual) -> Vec<TrainingPair> {
    TrainingPairSynthesizer::default().synthesize(manual)
}

/// Plain-text corpus of the enhanced manual followed by both print versions,
/// with documented parameters listed under their section.
pub fn render_training_text(domain: &str, manual: &UserManual, reference: &ReferencePair) -> String {
    let mut lines = vec![
        format!("# {domain} Documentation Training Data"),
        String::new(),
        "## USER_MANUAL".to_string(),
        String::new(),
    ];

    for (key, category) in manual {
        lines.push(format!("### {}", category_title(key, category)));
        lines.push(String::new());
        push_paragraph(&mut lines, category.introduction());
        for (section, text) in category.sections() {
            lines.push(format!("#### {section}"));
            lines.push(String::new());
            push_paragraph(&mut lines, text);
        }
        for example in category.examples() {
            push_fenced(&mut lines, CODE_FENCE_LANG, &example.code);
        }
    }

    lines.push("## PRINT_VERSION".to_string());
    lines.push(String::new());
    for (page, doc) in [
        ("Print version", &reference.main_print),
        ("The OpenSCAD Language", &reference.language_print),
    ] {
        lines.push(format!("### {page}"));
        lines.push(String::new());
        for (title, record) in doc.iter() {
            lines.push(format!("#### {title}"));
            lines.push(String::new());
            push_paragraph(&mut lines, &record.content);
            let mut inline = Vec::new();
            for (kind, code) in record.code() {
                match kind {
                    CodeKind::Block => push_fenced(&mut lines, CODE_FENCE_LANG, code),
                    CodeKind::Inline => inline.push(format!("`{code}`")),
                }
            }
            if !inline.is_empty() {
                lines.push(format!("Inline code: {}", inline.join(", ")));
                lines.push(String::new());
            }
            for param in &record.parameters {
                let mut line = format!("- {}: {}", param.name, param.description);
                if !param.kind.is_empty() {
                    line.push_str(&format!(" (Type: {})", param.kind));
                }
                if !param.default.is_empty() {
                    line.push_str(&format!(" (Default: {})", param.default));
                }
                lines.push(line);
            }
            if !record.parameters.is_empty() {
                lines.push(String::new());
            }
        }
    }

    lines.join("\n")
}

fn push_paragraph(lines: &mut Vec<String>, text: &str) {
    if !text.is_empty() {
        lines.push(text.to_string());
        lines.push(String::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scadoc_core::{DocumentationDataset, Parameter, SectionRecord};

    fn record(content: &str, code: &[&str], level: u8) -> SectionRecord {
        SectionRecord {
            content: content.to_string(),
            code_examples: code.iter().map(|c| c.to_string()).collect(),
            level,
            ..Default::default()
        }
    }

    fn reference(main: Vec<(&str, SectionRecord)>, language: Vec<(&str, SectionRecord)>) -> ReferencePair {
        ReferencePair {
            main_print: main.into_iter().collect(),
            language_print: language.into_iter().collect(),
        }
    }

    fn category(content: &[(&str, &str)], code: &[&str]) -> CategoryRecord {
        CategoryRecord {
            title: Some("General".to_string()),
            content: Some(
                content
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            code_examples: Some(code.iter().map(|c| CodeExample::new(*c, "")).collect()),
            ..Default::default()
        }
    }

    fn user_manual(categories: Vec<(&str, CategoryRecord)>) -> UserManual {
        categories
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn similarity_ignores_whitespace_and_partial_capture() {
        assert!(similar("x  =\n1;", "x = 1;"));
        assert!(similar("cube(10);", "cube(10); // a cube"));
        assert!(!similar("cube(10);", "sphere(r = 5);"));
        assert!(similar("translate([1,0,0]) cube(2);", "translate([1,0,0])   cube(2); // moved"));
    }

    #[test]
    fn similarity_is_symmetric() {
        let samples = [
            "",
            "x = 1;",
            "y = foo(2, 3);",
            "a b c d e f g h i j",
            "a b c d e f g h z z",
            "hull() { circle(10); }",
            "circle(10); hull() {}",
            "translate([0,0,5]) cube(1);",
        ];
        for a in samples {
            for b in samples {
                assert_eq!(similar(a, b), similar(b, a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn token_overlap_must_exceed_threshold() {
        // 7 of 10 tokens shared is exactly 0.7 and does not count.
        assert!(!similar("a1 a2 a3 a4 a5 a6 a7 q1 q2 q3", "a1 a2 a3 a4 a5 a6 a7 z8 z9 z0"));
        assert!(similar("a1 a2 a3 a4 a5 a6 a7 a8 q1 q2", "a1 a2 a3 a4 a5 a6 a7 a8 z9 z0"));
    }

    #[test]
    fn exact_title_wins_over_substring_match() {
        let refs = reference(
            vec![
                ("Matrix operations", record("B", &[], 3)),
                ("Matrix", record("A", &[], 3)),
            ],
            vec![],
        );
        let located = locate(&KeySectionSpec::new("Matrix", "general"), &refs);
        assert_eq!(located.content.as_deref(), Some("A"));
    }

    #[test]
    fn substring_and_general_fallbacks_fill_a_failed_exact_match() {
        let refs = reference(
            vec![
                ("Introduction", record("intro", &[], 2)),
                ("The Matrix type", record("matrix text", &["m = 1;"], 3)),
            ],
            vec![],
        );
        let located = locate(&KeySectionSpec::new("Matrix", "transformations"), &refs);
        assert_eq!(located.content.as_deref(), Some("matrix text"));
        assert_eq!(located.code_examples, vec!["m = 1;"]);

        let refs = reference(vec![("General syntax", record("syntax text", &[], 2))], vec![]);
        let located = locate(&KeySectionSpec::new("Comments", "general"), &refs);
        assert_eq!(located.content.as_deref(), Some("syntax text"));
        let located = locate(&KeySectionSpec::new("Comments", "other"), &refs);
        assert_eq!(located.content, None);
    }

    #[test]
    fn language_print_is_the_last_resort() {
        let refs = reference(
            vec![("Unrelated", record("x", &[], 2))],
            vec![("Strings", record("string text", &[], 2))],
        );
        let located = locate(&KeySectionSpec::new("Strings", "general"), &refs);
        assert_eq!(located.content.as_deref(), Some("string text"));

        let located = locate(&KeySectionSpec::new("Ranges", "types"), &refs);
        assert_eq!(located, Located::default());
    }

    #[test]
    fn empty_exact_match_falls_through_to_substring_match() {
        let refs = reference(
            vec![
                ("hull", record("", &["stale();"], 2)),
                ("Using hull", record("real text", &["hull() circle(1);"], 3)),
            ],
            vec![],
        );
        let located = locate(&KeySectionSpec::new("hull", "transformations"), &refs);
        assert_eq!(located.content.as_deref(), Some("real text"));
        assert_eq!(located.code_examples, vec!["hull() circle(1);"]);
    }

    #[test]
    fn missing_and_incomplete_are_exclusive() {
        let long = "x".repeat(100);
        let keys = vec![
            KeySectionSpec::new("Matrix", "general"),
            KeySectionSpec::new("Strings", "general"),
            KeySectionSpec::new("Ranges", "general"),
            KeySectionSpec::new("hull", "absent"),
        ];
        let manual = user_manual(vec![(
            "general",
            category(&[("Strings", "short"), ("Ranges", long.as_str())], &[]),
        )]);
        let refs = reference(
            vec![
                ("Matrix", record(&long, &[], 3)),
                ("Strings", record(&long, &[], 3)),
                ("Ranges", record(&long, &[], 3)),
            ],
            vec![],
        );
        let result = compare(&keys, &manual, &refs);

        let missing = result
            .missing_sections
            .iter()
            .map(|e| (e.section.as_str(), e.parent_section.as_str()))
            .collect::<Vec<_>>();
        let incomplete = result
            .incomplete_content
            .iter()
            .map(|e| (e.section.as_str(), e.parent_section.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(missing, vec![("Matrix", "general"), ("hull", "absent")]);
        assert_eq!(incomplete, vec![("Strings", "general")]);
        assert!(missing.iter().all(|m| !incomplete.contains(m)));
        assert_eq!(result.missing_sections[1].print_content, None);
        assert!(!result.supplementary_content.contains_key("absent"));
    }

    #[test]
    fn truncation_threshold_is_strict() {
        let keys = vec![KeySectionSpec::new("Ranges", "general")];
        let refs = reference(vec![("Ranges", record(&"r".repeat(1000), &[], 2))], vec![]);

        let at_threshold = user_manual(vec![("general", category(&[("Ranges", "e".repeat(700).as_str())], &[]))]);
        assert!(compare(&keys, &at_threshold, &refs).incomplete_content.is_empty());

        let below = user_manual(vec![("general", category(&[("Ranges", "e".repeat(699).as_str())], &[]))]);
        let result = compare(&keys, &below, &refs);
        assert_eq!(result.incomplete_content.len(), 1);
        assert_eq!(result.incomplete_content[0].existing_length, 699);
        assert_eq!(result.incomplete_content[0].print_length, 1000);
        assert_eq!(
            result.supplementary_content["general"]["Ranges"],
            "r".repeat(1000)
        );
    }

    #[test]
    fn lengths_count_characters_not_bytes() {
        let comparator = ContentComparator::default();
        assert!(!comparator.is_truncated(char_len("äöü"), char_len("abcd")));
    }

    #[test]
    fn only_dissimilar_reference_code_is_a_gap() {
        let keys = vec![KeySectionSpec::new("Variables", "general")];
        let manual = user_manual(vec![("general", category(&[("Variables", "kept")], &["x = 1;"]))]);
        let refs = reference(
            vec![("Variables", record("kept", &["x = 1;", "y = foo(2, 3);"], 2))],
            vec![],
        );
        let result = compare(&keys, &manual, &refs);
        assert_eq!(
            result.missing_code_examples,
            vec![CodeGapEntry {
                section: "Variables".to_string(),
                parent_section: "general".to_string(),
                code: "y = foo(2, 3);".to_string(),
            }]
        );
    }

    #[test]
    fn matrix_scenario_end_to_end() {
        let text = "A vector of vectors...";
        let keys = vec![KeySectionSpec::new("Matrix", "general")];
        let manual = user_manual(vec![("general", category(&[("Comments", "// line")], &[]))]);
        let refs = reference(
            vec![("Matrix", record(text, &["m = [[1,0],[0,1]];"], 3))],
            vec![],
        );

        let result = compare(&keys, &manual, &refs);
        assert_eq!(
            result.missing_sections,
            vec![MissingEntry {
                section: "Matrix".to_string(),
                parent_section: "general".to_string(),
                print_content: Some(text.to_string()),
            }]
        );
        assert_eq!(result.supplementary_content["general"]["Matrix"], text);

        let enhanced = enhance(&manual, &result);
        assert_eq!(enhanced["general"].section("Matrix"), Some(text));
        assert_eq!(enhanced["general"].section("Comments"), Some("// line"));
        assert_eq!(manual["general"].section("Matrix"), None);
        let supplemented = enhanced["general"].examples().last().unwrap();
        assert_eq!(supplemented.code, "m = [[1,0],[0,1]];");
        assert_eq!(
            supplemented.context,
            "Example from Matrix section (supplemented from print version)"
        );
    }

    #[test]
    fn enhancement_is_idempotent() {
        let keys = scadoc_core::default_key_sections();
        let manual = user_manual(vec![(
            "general",
            category(&[("Strings", "short")], &["echo(\"hi\");"]),
        )]);
        let refs = reference(
            vec![
                ("Strings", record(&"s".repeat(80), &["echo(str(1));"], 2)),
                ("hull", record("hull text", &["hull() circle(1);"], 2)),
            ],
            vec![("Ranges", record("range text", &["[0:1:5]"], 2))],
        );
        let result = compare(&keys, &manual, &refs);

        let first = serde_json::to_vec(&enhance(&manual, &result)).unwrap();
        let second = serde_json::to_vec(&enhance(&manual, &result)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn code_gaps_for_absent_categories_follow_policy() {
        let result = ComparisonResult {
            missing_code_examples: vec![CodeGapEntry {
                section: "hull".to_string(),
                parent_section: "transformations".to_string(),
                code: "hull() circle(1);".to_string(),
            }],
            ..Default::default()
        };
        let base = UserManual::new();

        let dropped = enhance(&base, &result);
        assert!(dropped.is_empty());

        let synthesized = enhance_with_policy(&base, &result, CodeGapPolicy::SynthesizeCategory);
        let category = &synthesized["transformations"];
        assert_eq!(category.title(), "Transformations");
        assert_eq!(category.examples().len(), 1);
    }

    #[test]
    fn supplementary_content_creates_missing_categories() {
        let mut result = ComparisonResult::default();
        result
            .supplementary_content
            .entry("transformations".to_string())
            .or_default()
            .insert("hull".to_string(), "hull text".to_string());
        let enhanced = enhance(&UserManual::new(), &result);
        let category = &enhanced["transformations"];
        assert_eq!(category.title(), "Transformations");
        assert_eq!(category.section("hull"), Some("hull text"));
        assert!(category.code_examples.is_none());
        assert_eq!(
            serde_json::to_string(category).unwrap(),
            r#"{"title":"Transformations","content":{"hull":"hull text"}}"#
        );
    }

    #[test]
    fn enhancement_keeps_dataset_key_order_and_absent_fields() {
        let json = r#"{"userManual":{"zeta":{"title":"Zeta","content":{"Zulu":"z","Alpha":"a"}},"alpha":{"title":"Alpha","url":"https://example.org/alpha"}}}"#;
        let dataset: DocumentationDataset = serde_json::from_str(json).unwrap();

        let untouched = DocumentationDataset {
            user_manual: enhance(&dataset.user_manual, &ComparisonResult::default()),
            ..dataset.clone()
        };
        assert_eq!(serde_json::to_string(&untouched).unwrap(), json);

        let mut result = ComparisonResult::default();
        let staged = result.supplementary_content.entry("zeta".to_string()).or_default();
        staged.insert("Mike".to_string(), "m".to_string());
        staged.insert("Alpha".to_string(), "a2".to_string());
        let merged = DocumentationDataset {
            user_manual: enhance(&dataset.user_manual, &result),
            ..dataset
        };
        assert_eq!(
            serde_json::to_string(&merged).unwrap(),
            r#"{"userManual":{"zeta":{"title":"Zeta","content":{"Zulu":"z","Alpha":"a2","Mike":"m"}},"alpha":{"title":"Alpha","url":"https://example.org/alpha"}}}"#
        );
    }

    #[test]
    fn report_lists_none_found_for_empty_sections() {
        let rendered = render_markdown(&ComparisonResult::default());
        assert_eq!(
            rendered,
            [
                REPORT_TITLE,
                "",
                "## Summary",
                "",
                "- Missing sections: 0",
                "- Incomplete sections: 0",
                "- Missing code examples: 0",
                "",
                "## Missing Sections",
                "",
                "No missing sections found.",
                "",
                "## Incomplete Content",
                "",
                "No incomplete content found.",
                "",
                "## Missing Code Examples",
                "",
                "No missing code examples found.",
                "",
            ]
            .join("\n")
        );
    }

    #[test]
    fn report_renders_findings_in_order() {
        let result = ComparisonResult {
            missing_sections: vec![
                MissingEntry {
                    section: "Matrix".into(),
                    parent_section: "general".into(),
                    print_content: Some("A vector of vectors".into()),
                },
                MissingEntry {
                    section: "Ranges".into(),
                    parent_section: "general".into(),
                    print_content: None,
                },
            ],
            incomplete_content: vec![IncompleteEntry {
                section: "Strings".into(),
                parent_section: "general".into(),
                existing_length: 5,
                print_length: 20,
                existing_content: "short".into(),
                print_content: "a much longer string".into(),
            }],
            missing_code_examples: vec![CodeGapEntry {
                section: "hull".into(),
                parent_section: "transformations".into(),
                code: "hull() circle(1);".into(),
            }],
            ..Default::default()
        };
        let gap_report = report(&result);
        assert_eq!(gap_report.structured, result);

        let expected = [
            REPORT_TITLE,
            "",
            "## Summary",
            "",
            "- Missing sections: 2",
            "- Incomplete sections: 1",
            "- Missing code examples: 1",
            "",
            "## Missing Sections",
            "",
            "### Matrix (in general)",
            "",
            "```",
            "A vector of vectors",
            "```",
            "",
            "### Ranges (in general)",
            "",
            "_Not found in the print version either._",
            "",
            "## Incomplete Content",
            "",
            "### Strings (in general)",
            "",
            "- Existing length: 5 characters",
            "- Print version length: 20 characters",
            "",
            "#### Existing content",
            "",
            "```",
            "short",
            "```",
            "",
            "#### Print version content",
            "",
            "```",
            "a much longer string",
            "```",
            "",
            "## Missing Code Examples",
            "",
            "### hull (in transformations)",
            "",
            "```openscad",
            "hull() circle(1);",
            "```",
            "",
        ]
        .join("\n");
        assert_eq!(gap_report.human_readable, expected);
    }

    #[test]
    fn fences_outgrow_backtick_runs_in_the_body() {
        assert_eq!(fence_for("cube(1);"), "```");
        assert_eq!(fence_for("use `x`"), "```");
        assert_eq!(fence_for("```\nnested\n```"), "````");
        assert_eq!(fence_for("a ````` b"), "``````");

        let result = ComparisonResult {
            missing_sections: vec![MissingEntry {
                section: "Strings".into(),
                parent_section: "general".into(),
                print_content: Some("Example:\n```\necho(\"hi\");\n```".into()),
            }],
            ..Default::default()
        };
        let rendered = render_markdown(&result);
        assert!(rendered.contains("````\nExample:\n```\necho(\"hi\");\n```\n````\n"));
    }

    #[test]
    fn edit_marker_content_never_becomes_a_pair() {
        let mut general = category(&[("Edit", EDIT_MARKER)], &[]);
        general.set_section("Padded", format!("{} {}", "text ".repeat(12), EDIT_MARKER));
        let pairs = synthesize(&user_manual(vec![("general", general)]));
        assert!(pairs.is_empty());
    }

    #[test]
    fn synthesizer_emits_pairs_in_stable_order() {
        let intro = "OpenSCAD is a solid 3D modeler that reads a script file describing the object.";
        let cube = "cube() creates a cube or rectangular prism in the first octant of the coordinate system.";
        let general = CategoryRecord {
            title: Some("Primitive Solids".into()),
            introduction: Some(intro.into()),
            content: Some(
                [("cube".to_string(), cube.to_string()), ("tiny".to_string(), "too short".to_string())]
                    .into_iter()
                    .collect(),
            ),
            code_examples: Some(vec![
                CodeExample::new("cube(size = 10, center = true);", supplemented_context("cube")),
                CodeExample::new("sphere(1);", "short"),
            ]),
            ..Default::default()
        };
        let pairs = synthesize(&user_manual(vec![("primitives", general)]));
        let queries = pairs.iter().map(|p| p.query.as_str()).collect::<Vec<_>>();
        assert_eq!(
            queries,
            vec![
                "Explain Primitive Solids in OpenSCAD",
                "What is cube in OpenSCAD?",
                "How does cube work in OpenSCAD?",
                "Give me an example of Primitive Solids in OpenSCAD",
                "Show me how to use cube in OpenSCAD",
            ]
        );
        assert_eq!(pairs[0].response, intro);
        assert_eq!(
            pairs[4].response,
            "```openscad\ncube(size = 10, center = true);\n```\n\nExample from cube section (supplemented from print version)"
        );
    }

    #[test]
    fn show_me_falls_back_to_category_title() {
        let general = CategoryRecord {
            title: Some("Transformations".into()),
            code_examples: Some(vec![CodeExample::new("rotate([0,0,45]) cube(1);", "Rotating a cube about z")]),
            ..Default::default()
        };
        let pairs = TrainingPairSynthesizer::new("SCAD").synthesize(&user_manual(vec![("transformations", general)]));
        assert_eq!(pairs[1].query, "Show me how to use Transformations in SCAD");
    }

    #[test]
    fn training_text_lists_manual_then_print_sections() {
        let manual = user_manual(vec![(
            "transformations",
            CategoryRecord {
                content: Some([("hull".to_string(), "Convex hull of children.".to_string())].into_iter().collect()),
                code_examples: Some(vec![CodeExample::new("hull() { circle(1); }", "hull usage")]),
                ..Default::default()
            },
        )]);
        let mut minkowski = record("Minkowski sum of children.", &["minkowski() { cube(1); sphere(1); }"], 2);
        minkowski.inline_code = vec!["$fn".to_string()];
        minkowski.parameters = vec![
            Parameter {
                name: "convexity".into(),
                description: "Render hint. Default: 1".into(),
                kind: "number".into(),
                default: "1".into(),
            },
            Parameter {
                name: "children".into(),
                description: "Solids to combine".into(),
                ..Default::default()
            },
        ];
        let refs = reference(vec![], vec![("minkowski", minkowski)]);

        let text = render_training_text("OpenSCAD", &manual, &refs);
        let expected = [
            "# OpenSCAD Documentation Training Data",
            "",
            "## USER_MANUAL",
            "",
            "### Transformations",
            "",
            "#### hull",
            "",
            "Convex hull of children.",
            "",
            "```openscad",
            "hull() { circle(1); }",
            "```",
            "",
            "## PRINT_VERSION",
            "",
            "### Print version",
            "",
            "### The OpenSCAD Language",
            "",
            "#### minkowski",
            "",
            "Minkowski sum of children.",
            "",
            "```openscad",
            "minkowski() { cube(1); sphere(1); }",
            "```",
            "",
            "Inline code: `$fn`",
            "",
            "- convexity: Render hint. Default: 1 (Type: number) (Default: 1)",
            "- children: Solids to combine",
            "",
        ]
        .join("\n");
        assert_eq!(text, expected);
    }
}
