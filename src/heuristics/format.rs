//! Format detection heuristic.

use once_cell_regex::html_tag_regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedFormat {
    Unknown,
    Json,
    Html,
    CsvLike,
    Text,
}

impl DetectedFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Json => "json",
            Self::Html => "html",
            Self::CsvLike => "csv-like",
            Self::Text => "text",
        }
    }
}

pub fn detect_format(input: &str) -> DetectedFormat {
    let trimmed = input.trim_start();
    if trimmed.is_empty() {
        return DetectedFormat::Unknown;
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return DetectedFormat::Json;
    }
    if html_tag_regex().is_match(input) {
        return DetectedFormat::Html;
    }
    if input.contains(',') {
        return DetectedFormat::CsvLike;
    }
    DetectedFormat::Text
}

/// Small private module so the `<[a-z][\s\S]*>` regex is compiled once per
/// process, following the same `once_cell`-style regex-caching convention
/// used elsewhere in the codebase.
mod once_cell_regex {
    use regex::Regex;
    use std::sync::OnceLock;

    static HTML_TAG_RE: OnceLock<Regex> = OnceLock::new();

    pub fn html_tag_regex() -> &'static Regex {
        HTML_TAG_RE.get_or_init(|| Regex::new(r"(?is)<[a-z][\s\S]*>").unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_unknown() {
        assert_eq!(detect_format(""), DetectedFormat::Unknown);
        assert_eq!(detect_format("   "), DetectedFormat::Unknown);
    }

    #[test]
    fn detects_json() {
        assert_eq!(detect_format(r#"{"a":1}"#), DetectedFormat::Json);
        assert_eq!(detect_format("[1,2,3]"), DetectedFormat::Json);
    }

    #[test]
    fn detects_html() {
        assert_eq!(detect_format("<div>hello</div>"), DetectedFormat::Html);
    }

    #[test]
    fn detects_csv_like() {
        assert_eq!(detect_format("a,b,c\n1,2,3"), DetectedFormat::CsvLike);
    }

    #[test]
    fn detects_text() {
        assert_eq!(detect_format("Contact: Jane Doe\nPhone: 555"), DetectedFormat::Text);
    }
}
