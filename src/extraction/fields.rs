//! Structured field extraction from front-of-card OCR text.
//!
//! Every field is read by an ordered list of [`FieldRule`]s evaluated until
//! the first one yields a value. Extractors never fail: a field that cannot
//! be read is simply `None` and does not block the others.

use std::collections::HashSet;

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::validation::rut;

/// Three-letter Spanish month abbreviations as printed on the card.
pub const SPANISH_MONTHS: [(&str, u32); 12] = [
    ("ENE", 1),
    ("FEB", 2),
    ("MAR", 3),
    ("ABR", 4),
    ("MAY", 5),
    ("JUN", 6),
    ("JUL", 7),
    ("AGO", 8),
    ("SEP", 9),
    ("OCT", 10),
    ("NOV", 11),
    ("DIC", 12),
];

/// A matcher paired with the extractor that turns its captures into a value.
pub struct FieldRule<T> {
    pub name: &'static str,
    pub regex: Regex,
    pub extract: fn(&Captures<'_>) -> Option<T>,
}

impl<T> FieldRule<T> {
    pub fn new(name: &'static str, pattern: &str, extract: fn(&Captures<'_>) -> Option<T>) -> Self {
        Self {
            name,
            regex: Regex::new(pattern).expect("field rule pattern must compile"),
            extract,
        }
    }

    /// First match of this rule whose extractor accepts the captures.
    pub fn apply(&self, text: &str) -> Option<T> {
        self.regex
            .captures_iter(text)
            .find_map(|caps| (self.extract)(&caps))
    }
}

/// Evaluates `rules` in order and returns the first extracted value.
pub fn first_success<T>(rules: &[FieldRule<T>], text: &str) -> Option<T> {
    rules.iter().find_map(|rule| {
        let value = rule.apply(text)?;
        tracing::trace!(rule = rule.name, "field rule matched");
        Some(value)
    })
}

/// Uppercases OCR text and unifies line endings.
pub fn prepare(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").to_uppercase()
}

/// Collapses runs of whitespace (including newlines) into single spaces.
pub fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Card labels that can never be the value of a name field.
const LABEL_WORDS: [&str; 11] = [
    "APELLIDOS",
    "APELLIDO",
    "NOMBRES",
    "NOMBRE",
    "NACIONALIDAD",
    "SEXO",
    "FECHA",
    "RUN",
    "NUMERO",
    "NÚMERO",
    "DOCUMENTO",
];

fn name_value(caps: &Captures<'_>) -> Option<String> {
    let value = collapse_whitespace(caps.get(1)?.as_str());
    if value.chars().filter(|c| c.is_alphabetic()).count() < 2 || value.len() > 80 {
        return None;
    }
    if value.split(' ').any(|word| LABEL_WORDS.contains(&word)) {
        return None;
    }
    Some(value)
}

fn word_value(caps: &Captures<'_>) -> Option<String> {
    let value = caps.get(1)?.as_str().trim().replace('.', "");
    (!value.is_empty()).then_some(value)
}

fn digits_value(caps: &Captures<'_>) -> Option<String> {
    let value: String = caps
        .get(1)?
        .as_str()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect();
    (value.len() >= 7 && value.chars().all(|c| c.is_ascii_digit())).then_some(value)
}

fn date_value(caps: &Captures<'_>) -> Option<NaiveDate> {
    parse_spanish_date(
        caps.get(1)?.as_str(),
        caps.get(2)?.as_str(),
        caps.get(3)?.as_str(),
        &SPANISH_MONTHS,
    )
}

/// Builds a calendar date from `DD`, a month abbreviation and `YYYY`.
///
/// # Returns
///
/// `None` when the abbreviation is not in `months` or the date does not exist.
pub fn parse_spanish_date(
    day: &str,
    month: &str,
    year: &str,
    months: &[(&str, u32)],
) -> Option<NaiveDate> {
    let abbreviation: String = month.chars().take(3).collect();
    let month = months
        .iter()
        .find(|(name, _)| *name == abbreviation)
        .map(|(_, number)| *number)?;
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

const NAME_VALUE: &str = r"[\p{L}' ]";
const SURNAME_STOPS: &str = r"NOMBRES?|NACIONALIDAD|SEXO|FECHA|RUN|N[UÚ]MERO|DOCUMENTO";
const GIVEN_NAME_STOPS: &str = r"APELLIDOS?|NACIONALIDAD|SEXO|FECHA|RUN|N[UÚ]MERO|DOCUMENTO";

fn name_rules(label: &str, stops: &str) -> Vec<FieldRule<String>> {
    vec![
        FieldRule::new(
            "same_line",
            &format!(
                r"(?m)\b{label}[ \t]*:?[ \t]+({NAME_VALUE}+?)(?:[ \t]+(?:{stops})\b|[ \t]*$)"
            ),
            name_value,
        ),
        FieldRule::new(
            "following_lines",
            &format!(
                r"\b{label}[ \t]*:?[ \t]*\n\s*([\p{{L}}' \n]+?)(?:\s+(?:{stops})\b|\s*\z)"
            ),
            name_value,
        ),
    ]
}

static SURNAME_RULES: Lazy<Vec<FieldRule<String>>> =
    Lazy::new(|| name_rules("APELLIDOS?", SURNAME_STOPS));

static GIVEN_NAME_RULES: Lazy<Vec<FieldRule<String>>> =
    Lazy::new(|| name_rules("NOMBRES?", GIVEN_NAME_STOPS));

static NATIONALITY_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| {
    vec![FieldRule::new(
        "labelled",
        r"\bNACIONALIDAD[ \t:]*\n?[ \t]*(\p{L}{3,})",
        word_value,
    )]
});

static SEX_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| {
    vec![FieldRule::new(
        "labelled",
        r"\bSEXO[ \t:]*\n?[ \t]*([MF])\b",
        word_value,
    )]
});

const DOC_NUMBER_VALUE: &str = r"[ \t:.]*\n?[ \t]*([0-9][0-9. ]{5,13}[0-9])";

static DOC_NUMBER_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| {
    vec![
        FieldRule::new(
            "numero_documento",
            &format!(r"\bN[UÚ]MERO\s+(?:DE\s+)?DOCUMENTO{DOC_NUMBER_VALUE}"),
            digits_value,
        ),
        FieldRule::new(
            "n_documento",
            &format!(r"\bN[°ºO]\.?\s*(?:DE\s+)?DOCUMENTO{DOC_NUMBER_VALUE}"),
            digits_value,
        ),
        FieldRule::new(
            "documento_n",
            &format!(r"\bDOCUMENTO\s*N[°ºO]?\.?{DOC_NUMBER_VALUE}"),
            digits_value,
        ),
    ]
});

const DATE_VALUE: &str =
    r"[ \t:.]*\n?[ \t]*(\d{1,2})[ \t\-/.]+(\p{L}{3})\p{L}*\.?[ \t\-/.]+(\d{4})";

fn date_rules(labels: &[(&'static str, &str)]) -> Vec<FieldRule<NaiveDate>> {
    labels
        .iter()
        .map(|(name, label)| FieldRule::new(*name, &format!(r"\b{label}{DATE_VALUE}"), date_value))
        .collect()
}

static BIRTH_DATE_RULES: Lazy<Vec<FieldRule<NaiveDate>>> = Lazy::new(|| {
    date_rules(&[
        ("fecha_de_nacimiento", r"FECHA\s+(?:DE\s+)?NACIMIENTO"),
        ("nacimiento", r"NACIMIENTO"),
    ])
});

static ISSUE_DATE_RULES: Lazy<Vec<FieldRule<NaiveDate>>> = Lazy::new(|| {
    date_rules(&[
        ("fecha_de_emision", r"FECHA\s+(?:DE\s+)?EMISI[OÓ]N"),
        ("emision", r"EMISI[OÓ]N"),
    ])
});

static EXPIRY_DATE_RULES: Lazy<Vec<FieldRule<NaiveDate>>> = Lazy::new(|| {
    date_rules(&[
        ("fecha_de_vencimiento", r"FECHA\s+(?:DE\s+)?VENCIMIENTO"),
        ("vence", r"VENCE"),
    ])
});

fn rut_value(caps: &Captures<'_>) -> Option<String> {
    let normalized = rut::normalize(caps.get(1)?.as_str());
    rut::validate(&normalized).then_some(normalized)
}

static RUN_LABEL_RULE: Lazy<FieldRule<String>> = Lazy::new(|| {
    FieldRule::new(
        "run_label",
        r"\bR\.?U\.?N\.?[ \t:.\-]*\n?[ \t]*(\d{1,2}\.?\d{3}\.?\d{3}[ \t]*-?[ \t]*[0-9K])\b",
        rut_value,
    )
});

static RUT_SHAPES: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\b\d{1,2}\.\d{3}\.\d{3}[ \t]*-?[ \t]*[0-9K]\b").expect("dotted RUT pattern"),
        Regex::new(r"\b\d{7,8}[ \t]*-?[ \t]*[0-9K]\b").expect("bare RUT pattern"),
    ]
});

/// Fields read from the front of the card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontFields {
    pub full_name: Option<String>,
    pub first_names: Option<String>,
    pub last_names: Option<String>,
    pub rut: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub issue_date: Option<NaiveDate>,
    pub expiry_date: Option<NaiveDate>,
    pub sex: Option<String>,
    pub nationality: Option<String>,
    pub document_number: Option<String>,
}

/// Parses every front field independently.
pub fn parse_front(text: &str) -> FrontFields {
    let text = prepare(text);
    let names = extract_names(&text);

    FrontFields {
        full_name: names.full_name,
        first_names: names.given_names,
        last_names: names.surnames,
        rut: extract_identifier(&text),
        birth_date: first_success(&BIRTH_DATE_RULES, &text),
        issue_date: first_success(&ISSUE_DATE_RULES, &text),
        expiry_date: first_success(&EXPIRY_DATE_RULES, &text),
        sex: extract_sex(&text),
        nationality: extract_nationality(&text),
        document_number: extract_doc_number(&text),
    }
}

/// Surnames, given names and the combined full name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Names {
    pub surnames: Option<String>,
    pub given_names: Option<String>,
    pub full_name: Option<String>,
}

pub fn extract_names(text: &str) -> Names {
    let text = prepare(text);
    let surnames = first_success(&SURNAME_RULES, &text);
    let given_names = first_success(&GIVEN_NAME_RULES, &text);

    let full_name = match (&given_names, &surnames) {
        (Some(given), Some(last)) => Some(format!("{} {}", given, last)),
        (Some(only), None) | (None, Some(only)) => Some(only.clone()),
        (None, None) => None,
    };

    Names {
        surnames,
        given_names,
        full_name,
    }
}

pub fn extract_nationality(text: &str) -> Option<String> {
    first_success(&NATIONALITY_RULES, &prepare(text))
}

pub fn extract_sex(text: &str) -> Option<String> {
    first_success(&SEX_RULES, &prepare(text))
}

/// The document (serial) number, digits only.
pub fn extract_doc_number(text: &str) -> Option<String> {
    first_success(&DOC_NUMBER_RULES, &prepare(text))
}

/// Reads a `DD MMM YYYY` date introduced by any of `rules`.
pub fn extract_date(text: &str, rules: &[FieldRule<NaiveDate>]) -> Option<NaiveDate> {
    first_success(rules, &prepare(text))
}

pub fn extract_birth_date(text: &str) -> Option<NaiveDate> {
    extract_date(text, &BIRTH_DATE_RULES)
}

pub fn extract_expiry_date(text: &str) -> Option<NaiveDate> {
    extract_date(text, &EXPIRY_DATE_RULES)
}

/// Formats a digit string with thousands dots, `500123456` -> `500.123.456`.
fn dotted(digits: &str) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut groups: Vec<String> = chars
        .rchunks(3)
        .map(|chunk| chunk.iter().collect())
        .collect();
    groups.reverse();
    groups.join(".")
}

/// Values that look like a RUT but belong to the document-number field.
pub fn decoy_exclusions(text: &str) -> HashSet<String> {
    let mut excluded = HashSet::new();
    if let Some(doc_number) = extract_doc_number(text) {
        excluded.insert(dotted(&doc_number));
        excluded.insert(doc_number);
    }
    excluded
}

/// Finds the holder's RUT in front-of-card text.
///
/// An explicit `RUN` label wins, taking the last labelled occurrence that
/// validates. Otherwise every RUT-shaped substring is considered, minus the
/// document-number decoys, and the last one passing the checksum is kept.
pub fn extract_identifier(text: &str) -> Option<String> {
    let text = prepare(text);

    let labelled: Vec<String> = RUN_LABEL_RULE
        .regex
        .captures_iter(&text)
        .filter_map(|caps| (RUN_LABEL_RULE.extract)(&caps))
        .collect();
    if let Some(last) = labelled.into_iter().last() {
        return Some(last);
    }

    let excluded = decoy_exclusions(&text);

    let mut candidates: Vec<(usize, &str)> = RUT_SHAPES
        .iter()
        .flat_map(|shape| shape.find_iter(&text).map(|m| (m.start(), m.as_str())))
        .collect();
    candidates.sort_by_key(|(start, _)| *start);

    candidates
        .into_iter()
        .map(|(_, raw)| (raw.trim(), rut::normalize(raw)))
        .filter(|(raw, normalized)| !excluded.contains(*raw) && !excluded.contains(normalized))
        .filter(|(_, normalized)| rut::validate(normalized))
        .map(|(_, normalized)| normalized)
        .last()
}
