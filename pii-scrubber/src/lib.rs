#![allow(clippy::missing_docs_in_private_items)]

mod rules;

use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

/// A single redaction made by [`scrub`]: the category token used in place of
/// the original text, and the byte range it occupied in the *input* string.
/// Retained for auditing only; never persisted.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Span {
    pub category: &'static str,
    pub start: usize,
    pub end: usize,
}

/// Redacts emails, phone numbers, government/insurance identifiers, device
/// serials, postal addresses, and honorific-prefixed person names from
/// `text`, replacing each match with a neutral `[REDACTED:CATEGORY]` token.
///
/// Deterministic and idempotent: `scrub(scrub(x).0) == scrub(x)`.
#[must_use]
pub fn scrub(text: &str) -> (String, Vec<Span>) {
    let normalized: String = text.nfc().collect();
    let mut output = String::with_capacity(normalized.len());
    let mut spans = Vec::new();
    let mut cursor = 0usize;

    while cursor < normalized.len() {
        let Some(remainder) = normalized.get(cursor..) else {
            break;
        };
        let Some((rule_start, rule_end, category)) = earliest_match(remainder) else {
            output.push_str(remainder);
            break;
        };

        let abs_start = cursor + rule_start;
        let abs_end = cursor + rule_end;

        if let Some(prefix) = normalized.get(cursor..abs_start) {
            output.push_str(prefix);
        }
        output.push_str("[REDACTED:");
        output.push_str(category);
        output.push(']');

        spans.push(Span {
            category,
            start: abs_start,
            end: abs_end,
        });

        cursor = abs_end.max(cursor + 1);
    }

    (output, spans)
}

/// Finds the match that starts earliest in `text` across every rule, and
/// among ties the rule listed first in [`rules::RULES`]. This avoids
/// accidentally double-redacting overlapping categories (e.g. a phone number
/// embedded inside a device serial match).
fn earliest_match(text: &str) -> Option<(usize, usize, &'static str)> {
    rules::RULES
        .iter()
        .filter_map(|rule| {
            rule.pattern
                .find(text)
                .map(|m| (m.start(), m.end(), rule.category))
        })
        .min_by_key(|(start, end, _)| (*start, std::cmp::Reverse(*end)))
}

/// Already-redacted text is left untouched: `[REDACTED:...]` tokens don't
/// match any rule, so re-scrubbing is a no-op and the function is idempotent.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_an_email_address() {
        let (redacted, spans) = scrub("contact jane.doe@example.com for follow-up");
        assert_eq!(redacted, "contact [REDACTED:EMAIL] for follow-up");
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].category, "EMAIL");
    }

    #[test]
    fn redacts_a_phone_number_with_extension() {
        let (redacted, _) = scrub("call +1 (555) 123-4567 ext. 42 for details");
        assert!(redacted.contains("[REDACTED:PHONE]"));
        assert!(!redacted.contains("555"));
    }

    #[test]
    fn redacts_a_government_identifier() {
        let (redacted, spans) = scrub("policy no: AB1234567 on file");
        assert!(redacted.contains("[REDACTED:GOVERNMENT_ID]"));
        assert_eq!(spans[0].category, "GOVERNMENT_ID");
    }

    #[test]
    fn redacts_a_device_serial() {
        let (redacted, _) = scrub("unit reports S/N: XJ40981-A failure");
        assert!(redacted.contains("[REDACTED:DEVICE_SERIAL]"));
    }

    #[test]
    fn redacts_a_postal_address() {
        let (redacted, _) = scrub("technician visited 742 Evergreen Avenue to inspect the unit");
        assert!(redacted.contains("[REDACTED:ADDRESS]"));
    }

    #[test]
    fn redacts_an_honorific_prefixed_name() {
        let (redacted, _) = scrub("Dr. Maria Schulz approved the repair order");
        assert!(redacted.contains("[REDACTED:PERSON_NAME]"));
    }

    #[test]
    fn scrub_is_idempotent() {
        let (once, _) = scrub("reach Mr. John Carter at john.carter@example.org or 555-010-2020");
        let (twice, _) = scrub(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn text_with_no_pii_is_unchanged() {
        let (redacted, spans) = scrub("pump vibration resolved after bearing replacement");
        assert_eq!(redacted, "pump vibration resolved after bearing replacement");
        assert!(spans.is_empty());
    }

    #[test]
    fn multilingual_text_without_latin_pii_patterns_is_left_intact() {
        let (redacted, spans) = scrub("泵振动问题已通过更换轴承解决");
        assert_eq!(redacted, "泵振动问题已通过更换轴承解决");
        assert!(spans.is_empty());
    }
}
