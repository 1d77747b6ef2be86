//! Custom-dictionary markup for source text.
//!
//! Each dictionary term found in the text is wrapped in a
//! `<mstrans:dictionary translation="...">` marker so the translation engine
//! either keeps it verbatim or substitutes the requested replacement.
//!
//! Matching is case-insensitive and anchored on word boundaries. Longer terms
//! claim their spans first, so "Azure Translator" is wrapped as one unit before
//! "Azure" is considered, and a shorter term never matches inside a span that is
//! already claimed. Markers already present in the input are left untouched, which
//! makes annotating an annotated text a no-op.
//!
//! Terms that cannot anchor a word boundary (for example a leading `*`) may
//! simply not match.

use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{Result, TandemError};

/// Source term mapped to the text the engine must produce for it.
pub type Dictionary = BTreeMap<String, String>;

pub const MARKER_TAG: &str = "mstrans:dictionary";

static EXISTING_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<mstrans:dictionary\b[^>]*>.*?</mstrans:dictionary>")
        .expect("marker pattern is valid")
});

#[derive(Debug)]
struct Claim<'a> {
    start: usize,
    end: usize,
    /// `None` for pre-existing markers that are copied through unchanged
    replacement: Option<&'a str>,
}

impl Claim<'_> {
    fn overlaps(&self, start: usize, end: usize) -> bool {
        start < self.end && self.start < end
    }
}

/// Wrap every whole-word occurrence of each dictionary term in a marker.
///
/// Returns the input unchanged when the dictionary is absent or empty.
pub fn annotate(text: &str, dictionary: Option<&Dictionary>) -> String {
    let Some(dictionary) = dictionary.filter(|d| !d.is_empty()) else {
        return text.to_string();
    };

    let mut claims: Vec<Claim<'_>> = EXISTING_MARKER
        .find_iter(text)
        .map(|m| Claim {
            start: m.start(),
            end: m.end(),
            replacement: None,
        })
        .collect();

    for (term, replacement) in terms_longest_first(dictionary) {
        let Some(pattern) = term_pattern(term) else {
            debug!("Skipping dictionary term that cannot be matched: {:?}", term);
            continue;
        };

        for m in pattern.find_iter(text) {
            if claims.iter().any(|c| c.overlaps(m.start(), m.end())) {
                continue;
            }
            claims.push(Claim {
                start: m.start(),
                end: m.end(),
                replacement: Some(replacement.as_str()),
            });
        }
    }

    claims.sort_by_key(|c| c.start);

    let mut annotated = String::with_capacity(text.len() + claims.len() * 64);
    let mut cursor = 0;
    for claim in &claims {
        annotated.push_str(&text[cursor..claim.start]);
        let surface = &text[claim.start..claim.end];
        match claim.replacement {
            Some(replacement) => annotated.push_str(&marker(surface, replacement)),
            None => annotated.push_str(surface),
        }
        cursor = claim.end;
    }
    annotated.push_str(&text[cursor..]);
    annotated
}

/// Count the markers in a text.
pub fn marker_count(text: &str) -> usize {
    text.matches(&format!("<{}", MARKER_TAG)).count()
}

fn terms_longest_first(dictionary: &Dictionary) -> Vec<(&String, &String)> {
    let mut terms: Vec<_> = dictionary
        .iter()
        .filter(|(term, _)| !term.trim().is_empty())
        .collect();
    // Ties are broken alphabetically so the output does not depend on map order.
    terms.sort_by(|a, b| {
        b.0.chars()
            .count()
            .cmp(&a.0.chars().count())
            .then_with(|| a.0.cmp(b.0))
    });
    terms
}

fn term_pattern(term: &str) -> Option<Regex> {
    RegexBuilder::new(&format!(r"\b{}\b", regex::escape(term)))
        .case_insensitive(true)
        .build()
        .ok()
}

fn marker(surface: &str, replacement: &str) -> String {
    format!(
        r#"<{tag} translation="{}">{}</{tag}>"#,
        escape_attribute(replacement),
        surface,
        tag = MARKER_TAG
    )
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Parse a `term=translation` entry. The term is trimmed; the translation is kept as given.
pub fn parse_entry(entry: &str) -> Result<(String, String)> {
    let (term, translation) = entry.split_once('=').ok_or_else(|| {
        TandemError::Validation(format!("Dictionary entry must be term=translation: {:?}", entry))
    })?;
    let term = term.trim();
    if term.is_empty() {
        return Err(TandemError::Validation(format!(
            "Dictionary entry has an empty term: {:?}",
            entry
        )));
    }
    Ok((term.to_string(), translation.to_string()))
}

/// Load a dictionary from a JSON object of term to translation.
pub fn load_dictionary_file<P: AsRef<Path>>(path: P) -> Result<Dictionary> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(entries: &[(&str, &str)]) -> Dictionary {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_single_term() {
        let text = "The API provides access to translation services.";
        let result = annotate(text, Some(&dict(&[("API", "API")])));
        assert_eq!(
            result,
            r#"The <mstrans:dictionary translation="API">API</mstrans:dictionary> provides access to translation services."#
        );
    }

    #[test]
    fn test_custom_translation_keeps_surface_form() {
        let text = "The word wordomatic is a dictionary entry.";
        let result = annotate(text, Some(&dict(&[("wordomatic", "Wordomático")])));
        assert_eq!(
            result,
            r#"The word <mstrans:dictionary translation="Wordomático">wordomatic</mstrans:dictionary> is a dictionary entry."#
        );
    }

    #[test]
    fn test_multiple_terms() {
        let text = "The API uses Azure Translator with gpt-4o-mini model.";
        let dictionary = dict(&[
            ("API", "API"),
            ("Azure Translator", "Azure Translator"),
            ("gpt-4o-mini", "GPT-4o Mini"),
        ]);
        let result = annotate(text, Some(&dictionary));

        assert!(result.contains(r#"<mstrans:dictionary translation="API">API</mstrans:dictionary>"#));
        assert!(result.contains(
            r#"<mstrans:dictionary translation="Azure Translator">Azure Translator</mstrans:dictionary>"#
        ));
        assert!(result.contains(
            r#"<mstrans:dictionary translation="GPT-4o Mini">gpt-4o-mini</mstrans:dictionary>"#
        ));
        assert_eq!(marker_count(&result), 3);
    }

    #[test]
    fn test_case_insensitive() {
        let text = "The api provides API functionality. Api is great.";
        let result = annotate(text, Some(&dict(&[("api", "API")])));
        assert_eq!(marker_count(&result), 3);
        assert!(result.contains(r#"translation="API">Api</mstrans:dictionary>"#));
    }

    #[test]
    fn test_whole_word_only() {
        let text = "The API and APIS are different. Application is not API.";
        let result = annotate(text, Some(&dict(&[("API", "API")])));

        assert_eq!(marker_count(&result), 2);
        assert!(result.starts_with(
            r#"The <mstrans:dictionary translation="API">API</mstrans:dictionary> and APIS"#
        ));
        assert!(result.contains(" APIS are different. Application is not "));
        assert!(result.ends_with(r#"<mstrans:dictionary translation="API">API</mstrans:dictionary>."#));
    }

    #[test]
    fn test_longest_term_wins_overlap() {
        let text = "Azure Translator is better than Azure services.";
        let dictionary = dict(&[("Azure", "Azure"), ("Azure Translator", "Azure Translator")]);
        let result = annotate(text, Some(&dictionary));

        assert_eq!(marker_count(&result), 2);
        assert_eq!(
            result,
            concat!(
                r#"<mstrans:dictionary translation="Azure Translator">Azure Translator</mstrans:dictionary>"#,
                r#" is better than <mstrans:dictionary translation="Azure">Azure</mstrans:dictionary> services."#
            )
        );
    }

    #[test]
    fn test_no_nested_markers_and_second_pass_is_noop() {
        let text = "Azure Translator and Azure.";
        let dictionary = dict(&[("Azure", "Azure"), ("Azure Translator", "Azure Translator")]);
        let once = annotate(text, Some(&dictionary));
        let twice = annotate(&once, Some(&dictionary));

        assert_eq!(marker_count(&once), 2);
        assert!(!once.contains("<mstrans:dictionary translation=\"Azure\"><mstrans"));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_or_absent_dictionary_is_identity() {
        let text = "Nothing to see <here> & there.";
        assert_eq!(annotate(text, None), text);
        assert_eq!(annotate(text, Some(&Dictionary::new())), text);
    }

    #[test]
    fn test_unmatched_term_leaves_text_unchanged() {
        let text = "Plain sentence.";
        assert_eq!(annotate(text, Some(&dict(&[("absent", "x")]))), text);
    }

    #[test]
    fn test_leading_wildcard_term_does_not_match() {
        let text = "Use *wild cards carefully.";
        let result = annotate(text, Some(&dict(&[("*wild", "wild")])));
        assert_eq!(result, text);
    }

    #[test]
    fn test_replacement_is_attribute_escaped() {
        let text = "Contoso ships.";
        let result = annotate(text, Some(&dict(&[("Contoso", "\"Contoso\" & Co")])));
        assert!(result.contains(r#"translation="&quot;Contoso&quot; &amp; Co">Contoso<"#));
    }

    #[test]
    fn test_parse_entry() {
        assert_eq!(
            parse_entry("Azure Translator=Azure Translator").unwrap(),
            ("Azure Translator".to_string(), "Azure Translator".to_string())
        );
        assert_eq!(parse_entry(" API =").unwrap(), ("API".to_string(), String::new()));
        assert!(parse_entry("no separator").is_err());
        assert!(parse_entry("=value").is_err());
    }

    #[test]
    fn test_load_dictionary_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terms.json");
        std::fs::write(&path, r#"{"Contoso": "Contoso", "cloud": "nube"}"#).unwrap();

        let dictionary = load_dictionary_file(&path).unwrap();
        assert_eq!(dictionary.get("cloud").map(String::as_str), Some("nube"));

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(load_dictionary_file(&path).is_err());
    }
}
