//! Type-aware text cleaning.
//!
//! Each [`DocumentType`] selects a pipeline; [`CleaningStrategy`] controls
//! aggressiveness. Cleaning is pure and infallible: a pipeline that cannot
//! improve the text returns it unchanged.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use scraper::Html;
use unicode_normalization::UnicodeNormalization;

/// Document types with type-specific cleaning behavior.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentType {
    Text,
    Markdown,
    Html,
    Pdf,
    Code,
    /// Web-scraped content; cleaned like HTML.
    Website,
}

impl DocumentType {
    /// Storage representation, aligned with the `documents.document_type`
    /// column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Markdown => "MARKDOWN",
            Self::Html => "HTML",
            Self::Pdf => "PDF",
            Self::Code => "CODE",
            Self::Website => "WEBSITE",
        }
    }

    /// Parse the storage representation; unknown values fall back to TEXT.
    pub fn parse(value: &str) -> Self {
        match value {
            "MARKDOWN" => Self::Markdown,
            "HTML" => Self::Html,
            "PDF" => Self::Pdf,
            "CODE" => Self::Code,
            "WEBSITE" => Self::Website,
            _ => Self::Text,
        }
    }
}

/// Cleaning strategy levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleaningStrategy {
    /// Only line endings and unicode normalization.
    Minimal,
    /// Default production cleaning.
    Standard,
    /// Maximum cleaning; may lose formatting.
    Aggressive,
}

/// Metrics describing what a cleaning pass changed.
#[derive(Clone, Debug, Default)]
pub struct CleaningMetrics {
    pub original_length: usize,
    pub cleaned_length: usize,
    pub chars_removed: usize,
    pub html_tags_removed: usize,
    pub whitespace_normalized: bool,
    pub unicode_normalized: bool,
    pub boilerplate_removed: bool,
}

impl CleaningMetrics {
    /// Percentage of the input removed by cleaning.
    pub fn reduction_percent(&self) -> f64 {
        if self.original_length == 0 {
            return 0.0;
        }
        (self.chars_removed as f64 / self.original_length as f64) * 100.0
    }
}

fn dotall_ci(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .expect("hard-coded pattern is valid")
}

static BOILERPLATE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        dotall_ci(r"<nav[^>]*>.*?</nav>"),
        dotall_ci(r"<header[^>]*>.*?</header>"),
        dotall_ci(r"<footer[^>]*>.*?</footer>"),
        dotall_ci(r"<aside[^>]*>.*?</aside>"),
        dotall_ci(r"<script[^>]*>.*?</script>"),
        dotall_ci(r"<noscript[^>]*>.*?</noscript>"),
        dotall_ci(r#"<div[^>]*class="[^"]*ad[^"]*"[^>]*>.*?</div>"#),
        dotall_ci(r#"<div[^>]*id="[^"]*ad[^"]*"[^>]*>.*?</div>"#),
        dotall_ci(r#"<div[^>]*class="[^"]*social[^"]*"[^>]*>.*?</div>"#),
        dotall_ci(r#"<div[^>]*class="[^"]*share[^"]*"[^>]*>.*?</div>"#),
        dotall_ci(r#"<div[^>]*class="[^"]*comment[^"]*"[^>]*>.*?</div>"#),
        dotall_ci(r#"<div[^>]*id="[^"]*comment[^"]*"[^>]*>.*?</div>"#),
        dotall_ci(r#"<div[^>]*class="[^"]*sidebar[^"]*"[^>]*>.*?</div>"#),
    ]
});

static HTML_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("hard-coded pattern is valid"));
static MULTI_SPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" +").expect("hard-coded pattern is valid"));
static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("hard-coded pattern is valid"));
static CODE_BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{4,}").expect("hard-coded pattern is valid"));
static PAGE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\d+\s*$").expect("hard-coded pattern is valid"));
static HYPHENATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-\n(\w)").expect("hard-coded pattern is valid"));
static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^\)]+\)").expect("hard-coded pattern is valid"));
static MD_EMPHASIS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[*_]{1,2}([^*_]+)[*_]{1,2}").expect("hard-coded pattern is valid"));
static MD_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#+\s+").expect("hard-coded pattern is valid"));
static MD_INLINE_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("hard-coded pattern is valid"));
static SPECIAL_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[^\w\s.,!?;:()\-"']"#).expect("hard-coded pattern is valid"));
static SPECIAL_CHARS_NO_PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("hard-coded pattern is valid"));

/// Normalize line endings to `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Collapse runs of spaces, collapse ≥3 newlines to 2, right-strip lines.
pub fn normalize_whitespace(text: &str) -> String {
    let text = MULTI_SPACE_RE.replace_all(text, " ");
    let text = BLANK_RUN_RE.replace_all(&text, "\n\n");
    let text: Vec<&str> = text.split('\n').map(str::trim_end).collect();
    text.join("\n").trim().to_string()
}

/// Normalize unicode to NFC (canonical composition).
pub fn normalize_unicode(text: &str) -> String {
    text.nfc().collect()
}

/// Remove characters outside the configured set.
pub fn remove_special_chars(text: &str, keep_punctuation: bool) -> String {
    if keep_punctuation {
        SPECIAL_CHARS_RE.replace_all(text, "").into_owned()
    } else {
        SPECIAL_CHARS_NO_PUNCT_RE.replace_all(text, "").into_owned()
    }
}

/// Strip all HTML tags, keeping the text content.
///
/// Goes through a real HTML parse so character references (`&amp;`,
/// `&#160;`, named entities) decode to their characters instead of leaking
/// into the text. Regex stays reserved for block-level pre-cleaning.
pub fn strip_html(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let document = Html::parse_document(text);
    document.root_element().text().collect()
}

/// Remove common web boilerplate blocks (nav, footer, ads, social widgets).
pub fn remove_boilerplate(html: &str) -> String {
    let mut cleaned = html.to_string();
    for pattern in BOILERPLATE_RES.iter() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    cleaned
}

fn clean_url_content(html: &str, aggressive: bool) -> String {
    let html = if aggressive {
        remove_boilerplate(html)
    } else {
        html.to_string()
    };
    let text = strip_html(&html);
    let text = normalize_unicode(&text);
    normalize_whitespace(&text)
}

fn clean_markdown(text: &str, preserve_formatting: bool) -> String {
    let mut text = normalize_line_endings(text);
    if !preserve_formatting {
        text = MD_LINK_RE.replace_all(&text, "$1").into_owned();
        text = MD_EMPHASIS_RE.replace_all(&text, "$1").into_owned();
        text = MD_HEADER_RE.replace_all(&text, "").into_owned();
        text = MD_INLINE_CODE_RE.replace_all(&text, "$1").into_owned();
    }
    let text = BLANK_RUN_RE.replace_all(&text, "\n\n");
    normalize_whitespace(&text)
}

fn clean_code(text: &str) -> String {
    let text = normalize_line_endings(text);
    let text = CODE_BLANK_RUN_RE.replace_all(&text, "\n\n\n");
    let lines: Vec<&str> = text.split('\n').map(str::trim_end).collect();
    // Whitespace is structure in code; only trailing space and unicode are
    // touched.
    normalize_unicode(lines.join("\n").trim())
}

fn clean_pdf_text(text: &str) -> String {
    let text = normalize_line_endings(text);
    let text = PAGE_NUMBER_RE.replace_all(&text, "");
    let text = HYPHENATION_RE.replace_all(&text, "$1");
    let text = normalize_unicode(&text);
    normalize_whitespace(&text)
}

fn clean_plain_text(text: &str, strategy: CleaningStrategy) -> String {
    let text = normalize_line_endings(text);
    let text = normalize_unicode(&text);
    match strategy {
        CleaningStrategy::Minimal => text,
        CleaningStrategy::Standard => normalize_whitespace(&text),
        CleaningStrategy::Aggressive => {
            let text = remove_special_chars(&text, true);
            normalize_whitespace(&text)
        }
    }
}

/// Clean text with a type-specific pipeline, returning the cleaned text and
/// metrics about what changed.
pub fn clean_with_strategy(
    text: &str,
    document_type: DocumentType,
    strategy: CleaningStrategy,
) -> (String, CleaningMetrics) {
    if text.is_empty() {
        return (String::new(), CleaningMetrics::default());
    }

    let original_length = text.chars().count();
    let mut html_tags_removed = 0;
    let mut boilerplate_removed = false;

    let cleaned = match document_type {
        DocumentType::Html | DocumentType::Website => {
            let mut working = text.to_string();
            if strategy == CleaningStrategy::Aggressive {
                let before = working.len();
                working = remove_boilerplate(&working);
                boilerplate_removed = working.len() < before;
            }
            html_tags_removed = HTML_TAG_RE.find_iter(&working).count();
            clean_url_content(&working, strategy == CleaningStrategy::Aggressive)
        }
        DocumentType::Markdown => {
            clean_markdown(text, strategy != CleaningStrategy::Aggressive)
        }
        DocumentType::Code => clean_code(text),
        DocumentType::Pdf => clean_pdf_text(text),
        DocumentType::Text => clean_plain_text(text, strategy),
    };

    let cleaned_length = cleaned.chars().count();
    let metrics = CleaningMetrics {
        original_length,
        cleaned_length,
        chars_removed: original_length.saturating_sub(cleaned_length),
        html_tags_removed,
        whitespace_normalized: true,
        unicode_normalized: true,
        boilerplate_removed,
    };

    (cleaned, metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_tags_are_stripped_and_counted() {
        let html = "<html><body><p>Hello <b>world</b></p></body></html>";
        let (cleaned, metrics) =
            clean_with_strategy(html, DocumentType::Html, CleaningStrategy::Standard);
        assert_eq!(cleaned, "Hello world");
        assert!(metrics.html_tags_removed >= 6);
        assert!(metrics.chars_removed > 0);
    }

    #[test]
    fn html_entities_are_decoded() {
        let html = "<p>Fish &amp; chips &mdash; caf&eacute; for &#8364;5</p>";
        let (cleaned, _) =
            clean_with_strategy(html, DocumentType::Html, CleaningStrategy::Standard);
        assert_eq!(cleaned, "Fish & chips — café for €5");
    }

    #[test]
    fn aggressive_html_removes_boilerplate() {
        let html = "<nav>menu</nav><script>alert(1)</script><p>Body text here</p>\
                    <div class=\"sidebar-left\">junk</div>";
        let (cleaned, metrics) =
            clean_with_strategy(html, DocumentType::Website, CleaningStrategy::Aggressive);
        assert_eq!(cleaned, "Body text here");
        assert!(metrics.boilerplate_removed);
    }

    #[test]
    fn pdf_page_numbers_and_hyphenation_repaired() {
        let pdf = "Intro paragraph con-\ntinued here.\n  42  \nNext section.";
        let (cleaned, _) = clean_with_strategy(pdf, DocumentType::Pdf, CleaningStrategy::Standard);
        assert!(cleaned.contains("continued"));
        assert!(!cleaned.contains("42"));
    }

    #[test]
    fn code_preserves_indentation() {
        let code = "fn main() {\r\n    let x = 1;   \n\n\n\n\n    println!(\"{x}\");\n}";
        let (cleaned, _) = clean_with_strategy(code, DocumentType::Code, CleaningStrategy::Standard);
        assert!(cleaned.contains("    let x = 1;"));
        assert!(!cleaned.contains("\n\n\n\n"));
        assert!(!cleaned.contains('\r'));
    }

    #[test]
    fn aggressive_markdown_strips_syntax() {
        let md = "# Title\n\nSome [link](https://x.y) and *emphasis* plus `code`.";
        let (cleaned, _) =
            clean_with_strategy(md, DocumentType::Markdown, CleaningStrategy::Aggressive);
        assert!(cleaned.contains("Title"));
        assert!(cleaned.contains("link"));
        assert!(!cleaned.contains('['));
        assert!(!cleaned.contains('*'));
        assert!(!cleaned.contains('`'));
    }

    #[test]
    fn cleaning_is_idempotent_on_clean_text() {
        let text = "Already clean text.\n\nWith two paragraphs.";
        let (once, _) = clean_with_strategy(text, DocumentType::Text, CleaningStrategy::Standard);
        let (twice, _) = clean_with_strategy(&once, DocumentType::Text, CleaningStrategy::Standard);
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_input_yields_empty_metrics() {
        let (cleaned, metrics) =
            clean_with_strategy("", DocumentType::Html, CleaningStrategy::Aggressive);
        assert!(cleaned.is_empty());
        assert_eq!(metrics.original_length, 0);
        assert_eq!(metrics.reduction_percent(), 0.0);
    }
}
