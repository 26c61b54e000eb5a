//! Heading detection over plain extracted text.
//!
//! Text extraction loses layout, so structure is recovered from line shape:
//! numbered headings (`3.2 Training Setup`) and the usual unnumbered ones
//! (`Abstract`, `References`, ...). Everything after a references heading is
//! split into individual reference entries instead of a section body.

use regex::Regex;
use std::sync::OnceLock;

use crate::models::Section;

/// Title of the section that collects text preceding the first heading
pub const LEAD_SECTION_TITLE: &str = "Content";

/// Longest line still considered a heading
const MAX_HEADING_CHARS: usize = 80;

fn numbered_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2}(?:\.\d{1,2}){0,3})\.?\s+([A-Z][A-Za-z0-9 ,:()'/&-]*[A-Za-z)])$")
            .unwrap_or_else(|e| unreachable!("invalid heading regex: {e}"))
    })
}

fn named_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(abstract|introduction|related work|background|preliminaries|methods?|methodology|approach|experiments?|experimental setup|evaluation|results|discussion|limitations|conclusions?|future work|acknowledge?ments?|references|bibliography|appendix)$",
        )
        .unwrap_or_else(|e| unreachable!("invalid heading regex: {e}"))
    })
}

fn references_heading() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:\d{1,2}\.?\s+)?(references|bibliography)$")
            .unwrap_or_else(|e| unreachable!("invalid heading regex: {e}"))
    })
}

fn reference_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:\[\d{1,3}\]|\d{1,3}\.\s)")
            .unwrap_or_else(|e| unreachable!("invalid reference regex: {e}"))
    })
}

/// A detected heading: title and depth
fn detect_heading(line: &str) -> Option<(String, u8)> {
    if line.is_empty() || line.chars().count() > MAX_HEADING_CHARS {
        return None;
    }

    if let Some(caps) = numbered_heading().captures(line) {
        let depth = caps[1].split('.').filter(|part| !part.is_empty()).count();
        let level = u8::try_from(depth).unwrap_or(u8::MAX);
        return Some((line.to_string(), level));
    }

    if named_heading().is_match(line) {
        return Some((line.to_string(), 1));
    }

    None
}

/// Split extracted text into sections and reference entries
///
/// Sections with an empty body are dropped.
pub fn structure(raw_text: &str) -> (Vec<Section>, Vec<String>) {
    let mut sections = Vec::new();
    let mut title = LEAD_SECTION_TITLE.to_string();
    let mut level = 1;
    let mut body = String::new();
    let mut reference_lines: Option<Vec<&str>> = None;

    for line in raw_text.lines().map(str::trim) {
        if let Some(lines) = reference_lines.as_mut() {
            if !line.is_empty() {
                lines.push(line);
            }
            continue;
        }

        if references_heading().is_match(line) {
            push_section(&mut sections, &title, &body, level);
            reference_lines = Some(Vec::new());
            continue;
        }

        if let Some((heading, depth)) = detect_heading(line) {
            push_section(&mut sections, &title, &body, level);
            title = heading;
            level = depth;
            body.clear();
            continue;
        }

        if !line.is_empty() {
            body.push_str(line);
            body.push('\n');
        }
    }

    let references = match reference_lines {
        Some(lines) => split_references(&lines),
        None => {
            push_section(&mut sections, &title, &body, level);
            Vec::new()
        }
    };

    (sections, references)
}

fn push_section(sections: &mut Vec<Section>, title: &str, body: &str, level: u8) {
    let body = body.trim();
    if !body.is_empty() {
        sections.push(Section::new(title, body, level));
    }
}

/// Group reference lines into entries
///
/// Numbered lists (`[1]`, `1.`) start a new entry at each marker; without
/// markers every non-empty line is its own entry.
fn split_references(lines: &[&str]) -> Vec<String> {
    let numbered = lines.iter().any(|line| reference_start().is_match(line));
    if !numbered {
        return lines.iter().map(|line| line.to_string()).collect();
    }

    let mut entries: Vec<String> = Vec::new();
    for line in lines {
        if reference_start().is_match(line) || entries.is_empty() {
            entries.push(line.to_string());
        } else if let Some(last) = entries.last_mut() {
            last.push(' ');
            last.push_str(line);
        }
    }
    entries
}
