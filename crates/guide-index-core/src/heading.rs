//! Heading segmentation for instructional PDFs.
//!
//! Step-by-step guides render each step as a numbered line ("3. Click
//! Settings") and section titles as all-caps lines. A page's extracted text
//! is split into sections at those boundaries, then every section is cleaned
//! into a single-line heading.
//!
//! # Algorithm
//!
//! 1. Split the page at every `\n` that is immediately followed by either a
//!    capital letter and a run of non-lowercase characters ending in `\n`,
//!    or a number followed by a dot. The newline is consumed by the split.
//! 2. Remove every boilerplate match (generator attribution by default).
//! 3. Remove a leading numeric prefix (`12.` / `12`) and following spaces.
//! 4. Collapse whitespace runs to single spaces.
//! 5. Drop empty sections, placeholder texts, and sections of
//!    `min_chars` characters or fewer.
//!
//! # Example
//!
//! ```rust
//! use guide_index_core::heading::{headings_from_pages, HeadingRules};
//!
//! let page = "1. Create Organization\n2. Invite Team Member\n".to_string();
//! let headings = headings_from_pages(&HeadingRules::default(), &[page]);
//! assert_eq!(headings, vec!["Create Organization", "Invite Team Member"]);
//! ```

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Attribution footer stamped on every page by the guide generator.
///
/// Removes the phrase and, when present, the link that follows it on the
/// same line or on the next one. Text after the link is never touched.
pub const DEFAULT_BOILERPLATE: &str = r"Made with Scribe(?:[ \t-]*\n?[ \t]*https?://\S*)?\n*";
/// Link text that survives cleaning on the generator's cover page.
pub const DEFAULT_PLACEHOLDER: &str = "https://scribehow.com";
/// Headings must be strictly longer than this many characters.
pub const DEFAULT_MIN_HEADING_CHARS: usize = 5;

fn section_start() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[A-Z][^a-z]*\n|[0-9]+\.)").expect("section boundary regex is valid")
    })
}

fn numeric_prefix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.?\s*").expect("numeric prefix regex is valid"))
}

/// Cleaning and filtering rules applied to every candidate section.
#[derive(Debug, Clone)]
pub struct HeadingRules {
    boilerplate: Vec<Regex>,
    placeholders: Vec<String>,
    min_chars: usize,
}

impl HeadingRules {
    /// Build rules from configured pattern strings.
    ///
    /// # Errors
    ///
    /// Returns an error if any boilerplate pattern is not a valid regex.
    pub fn new(
        boilerplate_patterns: &[String],
        placeholders: &[String],
        min_chars: usize,
    ) -> Result<Self> {
        let boilerplate = boilerplate_patterns
            .iter()
            .map(|p| {
                Regex::new(p).with_context(|| format!("Invalid boilerplate pattern: {}", p))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            boilerplate,
            placeholders: placeholders.to_vec(),
            min_chars,
        })
    }

    /// Clean a raw section into a single-line heading (may return empty).
    pub fn clean(&self, section: &str) -> String {
        let mut text = section.to_string();
        for re in &self.boilerplate {
            text = re.replace_all(&text, "").into_owned();
        }
        let text = numeric_prefix().replace(&text, "");
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Whether a cleaned heading is kept.
    pub fn accepts(&self, heading: &str) -> bool {
        !heading.trim().is_empty()
            && !self.placeholders.iter().any(|p| p == heading)
            && heading.chars().count() > self.min_chars
    }
}

impl Default for HeadingRules {
    fn default() -> Self {
        Self {
            boilerplate: vec![Regex::new(DEFAULT_BOILERPLATE).expect("default boilerplate is valid")],
            placeholders: vec![DEFAULT_PLACEHOLDER.to_string()],
            min_chars: DEFAULT_MIN_HEADING_CHARS,
        }
    }
}

/// Split one page of text into raw sections.
pub fn split_sections(page: &str) -> Vec<&str> {
    let mut sections = Vec::new();
    let mut start = 0;

    for (i, _) in page.match_indices('\n') {
        if section_start().is_match(&page[i + 1..]) {
            sections.push(&page[start..i]);
            start = i + 1;
        }
    }
    sections.push(&page[start..]);

    sections
}

/// Segment and clean every page, in order.
pub fn headings_from_pages(rules: &HeadingRules, pages: &[String]) -> Vec<String> {
    pages
        .iter()
        .flat_map(|page| split_sections(page))
        .map(|section| rules.clean(section))
        .filter(|heading| rules.accepts(heading))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_numbered_steps() {
        let sections = split_sections("Intro text\n1. First step\n2. Second step");
        assert_eq!(sections, vec!["Intro text", "1. First step", "2. Second step"]);
    }

    #[test]
    fn splits_before_all_caps_line() {
        let sections = split_sections("some intro\nGETTING STARTED\nclick the button");
        assert_eq!(sections, vec!["some intro", "GETTING STARTED\nclick the button"]);
    }

    #[test]
    fn does_not_split_on_sentence_lines() {
        let sections = split_sections("Open the page\nThen click save");
        assert_eq!(sections, vec!["Open the page\nThen click save"]);
    }

    #[test]
    fn clean_strips_prefix_and_whitespace() {
        let rules = HeadingRules::default();
        assert_eq!(rules.clean("12.   Invite \t Team\nMember  "), "Invite Team Member");
        assert_eq!(rules.clean("3 Open settings"), "Open settings");
    }

    #[test]
    fn clean_removes_generator_attribution() {
        let rules = HeadingRules::default();
        let cleaned = rules.clean("Click Save\nMade with Scribe - https://scribehow.com\n\n");
        assert_eq!(cleaned, "Click Save");
    }

    #[test]
    fn clean_keeps_text_after_bare_attribution() {
        let rules = HeadingRules::default();
        assert_eq!(
            rules.clean("Click Save\nMade with Scribe\nthen open the welcome screen\n"),
            "Click Save then open the welcome screen"
        );
        assert_eq!(
            rules.clean("Made with Scribe\nhttps://scribehow.com\nOpen the Community tab"),
            "Open the Community tab"
        );
    }

    #[test]
    fn placeholder_and_short_sections_are_dropped() {
        let rules = HeadingRules::default();
        assert!(!rules.accepts("https://scribehow.com"));
        assert!(!rules.accepts("Next"));
        assert!(!rules.accepts("Five5"));
        assert!(rules.accepts("Six666"));
        assert!(!rules.accepts("   "));
    }

    #[test]
    fn headings_are_long_and_free_of_boilerplate() {
        let pages = vec![
            "How to Create a Project\nMade with Scribe - https://scribehow.com\n1. Navigate to app.example.com\n2. Click\n3. Click \"New Project\"\nMade with Scribe - https://scribehow.com".to_string(),
            "4. Type a name\n\n5. OK\nMade with Scribe\nhttps://scribehow.com".to_string(),
        ];
        let headings = headings_from_pages(&HeadingRules::default(), &pages);

        assert!(!headings.is_empty());
        for h in &headings {
            assert!(h.chars().count() > DEFAULT_MIN_HEADING_CHARS, "too short: {:?}", h);
            assert!(!h.contains("Made with Scribe"), "boilerplate left in {:?}", h);
        }
        assert!(headings.contains(&"Navigate to app.example.com".to_string()));
        assert!(headings.contains(&"Type a name".to_string()));
        assert!(!headings.iter().any(|h| h == "Click"));
    }

    #[test]
    fn custom_rules_apply() {
        let rules = HeadingRules::new(
            &[r"Generated by \w+".to_string()],
            &["TOC".to_string()],
            2,
        )
        .unwrap();
        let headings = headings_from_pages(
            &rules,
            &["1. Add user Generated by Tool\n2. TOC".to_string()],
        );
        assert_eq!(headings, vec!["Add user"]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(HeadingRules::new(&["(unclosed".to_string()], &[], 5).is_err());
    }
}
