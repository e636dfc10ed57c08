//! Decodes the fixed-position sub-fields of a located MRZ.
//!
//! Each sub-field has its own rules so a corrupted segment never prevents
//! reading the rest of the same line or the other lines.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Captures;
use serde::Serialize;

use crate::extraction::fields::{FieldRule, first_success};
use crate::extraction::mrz_locator::{DOCUMENT_PREFIX, FILLER};

/// Fields decoded from the MRZ.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MrzFields {
    pub document_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub sex: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub nationality: Option<String>,
    pub rut: Option<String>,
    pub surnames: Option<String>,
    pub given_names: Option<String>,
    pub full_name: Option<String>,
}

fn text_value(caps: &Captures<'_>) -> Option<String> {
    Some(caps.get(1)?.as_str().to_string())
}

fn yymmdd_value(caps: &Captures<'_>) -> Option<NaiveDate> {
    parse_yymmdd(caps.get(1)?.as_str())
}

/// Explicit filler between body and verifier.
fn rut_with_filler(caps: &Captures<'_>) -> Option<String> {
    let body = caps.get(1)?.as_str().trim_start_matches('0');
    Some(format!("{}{}", body, caps.get(2)?.as_str()))
}

/// Loose digit run whose final digit is taken as the verifier.
fn rut_from_run(caps: &Captures<'_>) -> Option<String> {
    let run = caps.get(1)?.as_str().trim_start_matches('0');
    (run.len() >= 8).then(|| run.to_string())
}

static DOCUMENT_NUMBER_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| {
    vec![FieldRule::new(
        "after_prefix",
        &format!(r"{DOCUMENT_PREFIX}(\d{{9}})"),
        text_value,
    )]
});

static BIRTH_DATE_RULES: Lazy<Vec<FieldRule<NaiveDate>>> =
    Lazy::new(|| vec![FieldRule::new("line_start", r"^(\d{6})\d?[MF<]", yymmdd_value)]);

static SEX_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| {
    vec![
        FieldRule::new("before_expiry", r"([MF])\d{6}\d?[A-Z<]{3}", text_value),
        FieldRule::new("after_birth", r"^\d{6}\d?([MF])", text_value),
    ]
});

static EXPIRY_DATE_RULES: Lazy<Vec<FieldRule<NaiveDate>>> = Lazy::new(|| {
    vec![
        FieldRule::new("before_nationality", r"[MF<](\d{6})\d?[A-Z<]{3}", yymmdd_value),
        FieldRule::new("after_sex", r"^\d{6}\d?[MF<](\d{6})", yymmdd_value),
    ]
});

static NATIONALITY_RULES: Lazy<Vec<FieldRule<String>>> =
    Lazy::new(|| vec![FieldRule::new("after_expiry", r"\d{6}\d?([A-Z]{3})", text_value)]);

static RUT_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| {
    vec![
        FieldRule::new("filler_separated", r"(\d{7,8})<([0-9K])", rut_with_filler),
        FieldRule::new("digit_run", r"(\d{8,9})", rut_from_run),
    ]
});

/// Parses a `YYMMDD` date; years above 50 are 19xx, the rest 20xx.
pub fn parse_yymmdd(digits: &str) -> Option<NaiveDate> {
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let yy: i32 = digits[0..2].parse().ok()?;
    let month: u32 = digits[2..4].parse().ok()?;
    let day: u32 = digits[4..6].parse().ok()?;
    let year = if yy > 50 { 1900 + yy } else { 2000 + yy };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn is_name_line(line: &str) -> bool {
    !line.contains(DOCUMENT_PREFIX)
        && line.contains(FILLER)
        && line.chars().all(|c| c.is_ascii_uppercase() || c == FILLER)
        && line.chars().filter(|c| c.is_ascii_uppercase()).count() >= 2
}

/// Which of the located lines plays which MRZ role.
struct LineRoles<'a> {
    document: Option<&'a str>,
    data: Option<&'a str>,
    names: Option<&'a str>,
}

fn assign_roles(lines: &[String]) -> LineRoles<'_> {
    let positional = lines.len() == 3;

    let document = lines
        .iter()
        .position(|line| line.contains(DOCUMENT_PREFIX))
        .or(positional.then_some(0));
    let names = lines
        .iter()
        .enumerate()
        .rev()
        .find(|(index, line)| Some(*index) != document && is_name_line(line))
        .map(|(index, _)| index)
        .or(positional.then_some(2))
        .filter(|index| Some(*index) != document);
    let data = (0..lines.len()).find(|index| Some(*index) != document && Some(*index) != names);

    LineRoles {
        document: document.map(|i| lines[i].as_str()),
        data: data.map(|i| lines[i].as_str()),
        names: names.map(|i| lines[i].as_str()),
    }
}

/// Surnames and given names from the name line.
///
/// The ICAO `<<` separator splits surnames from given names when present;
/// otherwise the first two filler-delimited groups are surnames.
fn parse_names(line: &str) -> (Option<String>, Option<String>) {
    let groups = |part: &str| -> Vec<String> {
        part.split(FILLER)
            .filter(|group| !group.is_empty())
            .map(str::to_string)
            .collect()
    };

    let (surnames, given): (Vec<String>, Vec<String>) = match line.split_once("<<") {
        Some((primary, secondary)) if !primary.is_empty() && !groups(secondary).is_empty() => {
            (groups(primary), groups(secondary))
        }
        _ => {
            let all = groups(line);
            let split = all.len().min(2);
            (all[..split].to_vec(), all[split..].to_vec())
        }
    };

    let join = |parts: Vec<String>| (!parts.is_empty()).then(|| parts.join(" "));
    (join(surnames), join(given))
}

/// Decodes every MRZ sub-field that can be read.
///
/// # Arguments
///
/// * `lines` - The 2-3 normalized lines produced by the locator.
pub fn parse(lines: &[String]) -> MrzFields {
    let roles = assign_roles(lines);
    let mut fields = MrzFields::default();

    if let Some(line) = roles.document {
        fields.document_number = first_success(&DOCUMENT_NUMBER_RULES, line);
    }

    if let Some(line) = roles.data {
        fields.birth_date = first_success(&BIRTH_DATE_RULES, line);
        fields.sex = first_success(&SEX_RULES, line);
        fields.expiry_date = first_success(&EXPIRY_DATE_RULES, line);
        fields.nationality = first_success(&NATIONALITY_RULES, line);
        fields.rut = first_success(&RUT_RULES, line);
    }

    if let Some(line) = roles.names {
        let (surnames, given_names) = parse_names(line);
        fields.full_name = match (&given_names, &surnames) {
            (Some(given), Some(last)) => Some(format!("{} {}", given, last)),
            (None, Some(last)) => Some(last.clone()),
            (Some(given), None) => Some(given.clone()),
            (None, None) => None,
        };
        fields.surnames = surnames;
        fields.given_names = given_names;
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::rut;

    const LINE1: &str = "INCHL500123456712345678<5<<<<<";
    const LINE2: &str = "8503152M3001017CHL12345678<5<3";
    const LINE3: &str = "GONZALEZ<PEREZ<<JUAN<CARLOS<<<";

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn decodes_canonical_mrz() {
        let fields = parse(&lines(&[LINE1, LINE2, LINE3]));

        assert_eq!(fields.document_number.as_deref(), Some("500123456"));
        assert_eq!(fields.birth_date, NaiveDate::from_ymd_opt(1985, 3, 15));
        assert_eq!(fields.sex.as_deref(), Some("M"));
        assert_eq!(fields.expiry_date, NaiveDate::from_ymd_opt(2030, 1, 1));
        assert_eq!(fields.nationality.as_deref(), Some("CHL"));
        assert_eq!(fields.rut.as_deref(), Some("123456785"));
        assert!(rut::validate(fields.rut.as_deref().unwrap()));
        assert_eq!(fields.surnames.as_deref(), Some("GONZALEZ PEREZ"));
        assert_eq!(fields.given_names.as_deref(), Some("JUAN CARLOS"));
        assert_eq!(fields.full_name.as_deref(), Some("JUAN CARLOS GONZALEZ PEREZ"));
    }

    #[test]
    fn two_line_mrz_without_document_line() {
        let fields = parse(&lines(&[LINE2, LINE3]));

        assert_eq!(fields.document_number, None);
        assert_eq!(fields.birth_date, NaiveDate::from_ymd_opt(1985, 3, 15));
        assert_eq!(fields.sex.as_deref(), Some("M"));
        assert_eq!(fields.expiry_date, NaiveDate::from_ymd_opt(2030, 1, 1));
        assert_eq!(fields.nationality.as_deref(), Some("CHL"));
        assert_eq!(fields.rut.as_deref(), Some("123456785"));
        assert_eq!(fields.full_name.as_deref(), Some("JUAN CARLOS GONZALEZ PEREZ"));
    }

    #[test]
    fn corrupted_first_line_keeps_other_fields() {
        let corrupted = "INCHL5001X3456712345678<5<<<<<";
        let fields = parse(&lines(&[corrupted, LINE2, LINE3]));

        assert_eq!(fields.document_number, None);
        assert_eq!(fields.birth_date, NaiveDate::from_ymd_opt(1985, 3, 15));
        assert_eq!(fields.rut.as_deref(), Some("123456785"));
        assert_eq!(fields.given_names.as_deref(), Some("JUAN CARLOS"));
    }

    #[test]
    fn corrupted_birth_date_keeps_sex_and_expiry() {
        let fields = parse(&lines(&[LINE1, "85O3152M3001017CHL12345678<5<3", LINE3]));

        assert_eq!(fields.birth_date, None);
        assert_eq!(fields.sex.as_deref(), Some("M"));
        assert_eq!(fields.expiry_date, NaiveDate::from_ymd_opt(2030, 1, 1));
        assert_eq!(fields.nationality.as_deref(), Some("CHL"));
    }

    #[test]
    fn identifier_without_filler_falls_back_to_digit_run() {
        let fields = parse(&lines(&[LINE1, "8503152M3001017CHL123456785<<3", LINE3]));
        assert_eq!(fields.rut.as_deref(), Some("123456785"));
    }

    #[test]
    fn century_pivot() {
        assert_eq!(parse_yymmdd("510101"), NaiveDate::from_ymd_opt(1951, 1, 1));
        assert_eq!(parse_yymmdd("500101"), NaiveDate::from_ymd_opt(2050, 1, 1));
        assert_eq!(parse_yymmdd("991231"), NaiveDate::from_ymd_opt(1999, 12, 31));
        assert_eq!(parse_yymmdd("991332"), None);
        assert_eq!(parse_yymmdd("99123"), None);
    }

    #[test]
    fn names_without_icao_separator_use_first_two_groups() {
        let (surnames, given) = parse_names("ROJAS<SOTO<MARIA<JOSE<<<<<<<<");
        assert_eq!(surnames.as_deref(), Some("ROJAS SOTO"));
        assert_eq!(given.as_deref(), Some("MARIA JOSE"));
    }
}
