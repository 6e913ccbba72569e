//! Structured-text segmentation heuristic.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub heading: String,
    pub start_line: usize,
    pub lines: Vec<String>,
}

fn title_case_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z][a-zA-Z]*)(\s[A-Z][a-zA-Z]*)*:?$").unwrap())
}

fn uppercase_heading(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && trimmed.chars().any(|c| c.is_alphabetic())
        && trimmed.chars().all(|c| !c.is_alphabetic() || c.is_uppercase())
        && trimmed.len() <= 64
}

fn title_case_heading(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.len() <= 64 && title_case_regex().is_match(trimmed)
}

fn trailing_colon_heading(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.ends_with(':') || trimmed.len() > 64 {
        return false;
    }
    let words = trimmed.trim_end_matches(':').split_whitespace().count();
    words >= 1 && words <= 8
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    uppercase_heading(trimmed) || title_case_heading(trimmed) || trailing_colon_heading(trimmed)
}

/// Splits free text into ordered sections keyed by detected headings. The
/// root pseudo-section (content preceding the first heading) is dropped if
/// blank.
pub fn segment_structured_text(input: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current_heading = String::new();
    let mut current_start = 0usize;
    let mut current_lines: Vec<String> = Vec::new();
    let mut has_current = false;

    let flush = |sections: &mut Vec<Section>, heading: &str, start: usize, lines: &[String]| {
        let non_blank = lines.iter().any(|l| !l.trim().is_empty());
        if heading.is_empty() && !non_blank {
            return;
        }
        sections.push(Section {
            heading: heading.to_string(),
            start_line: start,
            lines: lines.to_vec(),
        });
    };

    for (idx, line) in input.lines().enumerate() {
        if is_heading(line) {
            if has_current || !current_lines.is_empty() || !current_heading.is_empty() {
                flush(&mut sections, &current_heading, current_start, &current_lines);
            }
            current_heading = line.trim().trim_end_matches(':').to_string();
            current_start = idx;
            current_lines = Vec::new();
            has_current = true;
        } else {
            if !has_current {
                has_current = true;
                current_start = idx;
            }
            current_lines.push(line.to_string());
        }
    }
    flush(&mut sections, &current_heading, current_start, &current_lines);

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_colon_headings() {
        let input = "Contact Info:\nJane Doe\n+1 555 123 4567\n\nShipping Address:\n12 Elm St";
        let sections = segment_structured_text(input);
        assert_eq!(sections.len(), 2);
        let headings: Vec<_> = sections.iter().map(|s| s.heading.as_str()).collect();
        assert!(headings.contains(&"Contact Info"));
        assert!(headings.contains(&"Shipping Address"));
    }

    #[test]
    fn splits_on_uppercase_headings() {
        let input = "SUMMARY\nThis is the summary body.\n\nDETAILS\nMore content here.";
        let sections = segment_structured_text(input);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "SUMMARY");
        assert_eq!(sections[1].heading, "DETAILS");
    }

    #[test]
    fn drops_blank_root_section() {
        let input = "\n\nHeading:\nbody";
        let sections = segment_structured_text(input);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].heading, "Heading");
    }

    #[test]
    fn keeps_nonblank_root_section() {
        let input = "preamble text\nHeading:\nbody";
        let sections = segment_structured_text(input);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].heading, "");
    }
}
