use once_cell::sync::Lazy;
use regex::Regex;

/// A single substitution rule: a pattern and the category token it is
/// replaced with. Rules are applied in order so that more specific patterns
/// (phone numbers with extensions) win over more general ones.
pub struct Rule {
    pub category: &'static str,
    pub pattern: &'static Lazy<Regex>,
}

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").unwrap()
});

static PHONE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"(?x)
        (\+\d{1,3}[\s.-]?)?               # optional country code
        \(?\d{2,4}\)?[\s.-]?              # area code
        \d{3,4}[\s.-]?\d{3,4}             # local number
        (\s?(ext|x|extension)\.?\s?\d{1,6})?  # optional extension
        ",
    )
    .unwrap()
});

static GOVERNMENT_ID: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"(?i)\b(?:ssn|sin|nino|insurance\s*no\.?|policy\s*no\.?)\s*[:#]?\s*[A-Z0-9-]{6,20}\b",
    )
    .unwrap()
});

static DEVICE_SERIAL: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?i)\b(?:s/?n|serial(?:\s*no\.?)?|device\s*id)\s*[:#]?\s*[A-Z0-9-]{5,24}\b")
        .unwrap()
});

static POSTAL_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(
        r"(?i)\b\d{1,6}\s+[A-Za-z0-9.'-]+(?:\s+[A-Za-z0-9.'-]+){0,4}\s+\
        (?:street|st\.?|avenue|ave\.?|road|rd\.?|boulevard|blvd\.?|lane|ln\.?|drive|dr\.?|way|platz|straße|strasse|rue)\b",
    )
    .unwrap()
});

static PERSON_NAME: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"\b(?:Mr|Mrs|Ms|Dr|Herr|Frau|M\.|Mme)\.?\s+[\p{Lu}][\p{L}'-]+(?:\s+[\p{Lu}][\p{L}'-]+)?")
        .unwrap()
});

/// Emails and phones first (most distinctive, least likely to collide with
/// address/name matches), then identifiers and serials, then addresses,
/// then honorific-prefixed names last since that pattern is the loosest.
pub static RULES: &[Rule] = &[
    Rule { category: "EMAIL", pattern: &EMAIL },
    Rule { category: "PHONE", pattern: &PHONE },
    Rule { category: "GOVERNMENT_ID", pattern: &GOVERNMENT_ID },
    Rule { category: "DEVICE_SERIAL", pattern: &DEVICE_SERIAL },
    Rule { category: "ADDRESS", pattern: &POSTAL_ADDRESS },
    Rule { category: "PERSON_NAME", pattern: &PERSON_NAME },
];
