//! Decides whether a back-of-card image is authentic and reads its label fields.
//!
//! The decision is an ordered list of named acceptance rules over a signal
//! vector. How many rules are active depends on the configured
//! [`BackDocumentPolicy`]; the signal map is always returned for audit.

use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::extraction::fields::{FieldRule, collapse_whitespace, first_success, prepare};
use crate::extraction::mrz::{self, MrzFields};
use crate::extraction::mrz_locator::{self, DOCUMENT_PREFIX, MrzLocation, MrzStrategy};
use crate::validation::rut;

/// Raw text longer than this counts as "long" for the visual-indicator rule.
pub const LONG_TEXT_LEN: usize = 200;

/// Labels printed only on the back of Chilean identity and residence cards.
const BACK_KEYWORDS: [&str; 9] = [
    "NACIO EN",
    "NACIÓ EN",
    "PROFESION",
    "PROFESIÓN",
    "DOMICILIO",
    "COMUNA",
    "HUELLA",
    "CIRCUNSCRIPCION",
    "CIRCUNSCRIPCIÓN",
];

/// How many acceptance rules are active.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum BackDocumentPolicy {
    /// Only an MRZ is accepted.
    Strict,
    /// MRZ, the document-type token, or a residence-permit combination.
    Standard,
    /// Every rule, biased towards acceptance under heavy OCR noise.
    #[default]
    Permissive,
}

impl FromStr for BackDocumentPolicy {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(BackDocumentPolicy::Strict),
            "standard" => Ok(BackDocumentPolicy::Standard),
            "permissive" => Ok(BackDocumentPolicy::Permissive),
            other => Err(format!("unknown back document policy: {}", other)),
        }
    }
}

/// Every signal the decision looked at.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackSignals {
    pub has_mrz: bool,
    pub has_mrz_with_identifier: bool,
    pub has_anchor_token: bool,
    pub has_visa: bool,
    pub has_permit: bool,
    pub has_definitiva: bool,
    pub has_qr_indicator: bool,
    pub has_fingerprint_indicator: bool,
    pub keyword_count: usize,
    pub text_length: usize,
    pub mrz_strategy: Option<MrzStrategy>,
}

struct AcceptanceRule {
    name: &'static str,
    /// Least permissive policy under which this rule is active.
    policy: BackDocumentPolicy,
    accepts: fn(&BackSignals) -> bool,
}

const ACCEPTANCE_RULES: [AcceptanceRule; 8] = [
    AcceptanceRule {
        name: "mrz_with_identifier",
        policy: BackDocumentPolicy::Strict,
        accepts: |s| s.has_mrz_with_identifier,
    },
    AcceptanceRule {
        name: "mrz",
        policy: BackDocumentPolicy::Strict,
        accepts: |s| s.has_mrz,
    },
    AcceptanceRule {
        name: "anchor_token",
        policy: BackDocumentPolicy::Standard,
        accepts: |s| s.has_anchor_token,
    },
    AcceptanceRule {
        name: "visa_with_permit",
        policy: BackDocumentPolicy::Standard,
        accepts: |s| s.has_visa && s.has_permit,
    },
    AcceptanceRule {
        name: "visa_definitiva",
        policy: BackDocumentPolicy::Standard,
        accepts: |s| s.has_visa && s.has_definitiva,
    },
    AcceptanceRule {
        name: "visual_indicator_with_keyword",
        policy: BackDocumentPolicy::Permissive,
        accepts: |s| (s.has_qr_indicator || s.has_fingerprint_indicator) && s.keyword_count >= 1,
    },
    AcceptanceRule {
        name: "keywords",
        policy: BackDocumentPolicy::Permissive,
        accepts: |s| s.keyword_count >= 2,
    },
    AcceptanceRule {
        name: "long_text_with_visuals",
        policy: BackDocumentPolicy::Permissive,
        accepts: |s| {
            s.text_length > LONG_TEXT_LEN && s.has_qr_indicator && s.has_fingerprint_indicator
        },
    },
];

/// Builds a pattern that tolerates OCR splitting a word with spaces or punctuation.
fn loose(word: &str) -> Regex {
    let body = word
        .chars()
        .map(|c| regex::escape(&c.to_string()))
        .collect::<Vec<_>>()
        .join(r"[\s.\-_,'|]{0,2}");
    Regex::new(&body).expect("loose keyword pattern")
}

static VISA: Lazy<Regex> = Lazy::new(|| loose("VISA"));
static PERMIT: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["PERMANENCIA", "RESIDENCIA", "PERMISO"]
        .iter()
        .map(|word| loose(word))
        .collect()
});
static DEFINITIVA: Lazy<Regex> = Lazy::new(|| loose("DEFINITIVA"));
static QR_KEYWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bQR\b|C[OÓ]DIGO\s+QR").expect("qr keyword pattern"));
static BARCODE_RUNS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[|!Il1]{1,3}[ \t]?){6,}|[█▌▐■▀▄#]{4,}").expect("barcode pattern")
});
static FINGERPRINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"HUELLA|PULGAR|DACTILAR|FINGERPRINT").expect("fingerprint pattern")
});

fn keyword_count(text: &str) -> usize {
    BACK_KEYWORDS
        .iter()
        .filter(|keyword| text.contains(*keyword))
        .count()
}

/// The accept/reject decision with its audit trail.
#[derive(Debug, Clone)]
pub struct BackValidation {
    pub accepted: bool,
    /// The rule that accepted the document, if any.
    pub matched_rule: Option<&'static str>,
    pub signals: BackSignals,
    pub location: Option<MrzLocation>,
    pub mrz: Option<MrzFields>,
}

impl BackValidation {
    /// MRZ text when the MRZ signal fired.
    pub fn mrz_raw(&self) -> Option<String> {
        self.location
            .as_ref()
            .filter(|_| self.signals.has_mrz)
            .map(MrzLocation::raw)
    }
}

/// Computes the signal vector for back-of-card text.
pub fn compute_signals(text: &str) -> (BackSignals, Option<MrzLocation>, Option<MrzFields>) {
    let prepared = prepare(text);
    let compact: String = prepared.chars().filter(|c| !c.is_whitespace()).collect();

    let location = mrz_locator::locate(&prepared);
    let has_mrz = location
        .as_ref()
        .map(|loc| loc.lines.len() >= 2 && loc.raw().chars().count() > 20)
        .unwrap_or(false);
    let mrz_fields = location.as_ref().map(|loc| mrz::parse(&loc.lines));
    let has_mrz_with_identifier = has_mrz
        && mrz_fields
            .as_ref()
            .and_then(|fields| fields.rut.as_deref())
            .map(rut::validate)
            .unwrap_or(false);

    let has_fingerprint_indicator = FINGERPRINT.is_match(&prepared);
    // The QR code is printed next to the MRZ on this card family.
    let has_qr_indicator =
        location.is_some() || QR_KEYWORD.is_match(&prepared) || BARCODE_RUNS.is_match(&prepared);

    let signals = BackSignals {
        has_mrz,
        has_mrz_with_identifier,
        has_anchor_token: compact.contains(DOCUMENT_PREFIX),
        has_visa: VISA.is_match(&prepared),
        has_permit: PERMIT.iter().any(|re| re.is_match(&prepared)),
        has_definitiva: DEFINITIVA.is_match(&prepared),
        has_qr_indicator,
        has_fingerprint_indicator,
        keyword_count: keyword_count(&prepared),
        text_length: text.trim().chars().count(),
        mrz_strategy: location.as_ref().map(|loc| loc.strategy),
    };

    (signals, location, mrz_fields)
}

/// Runs the acceptance rules active under `policy`, in order.
pub fn decide(signals: &BackSignals, policy: BackDocumentPolicy) -> Option<&'static str> {
    ACCEPTANCE_RULES
        .iter()
        .filter(|rule| rule.policy <= policy)
        .find(|rule| (rule.accepts)(signals))
        .map(|rule| rule.name)
}

/// Validates back-of-card text under `policy`.
pub fn validate(text: &str, policy: BackDocumentPolicy) -> BackValidation {
    let (signals, location, mrz) = compute_signals(text);
    let matched_rule = decide(&signals, policy);

    tracing::info!(
        accepted = matched_rule.is_some(),
        rule = matched_rule.unwrap_or("none"),
        policy = ?policy,
        signals = ?signals,
        "🪪 Back document decision"
    );

    BackValidation {
        accepted: matched_rule.is_some(),
        matched_rule,
        signals,
        location,
        mrz,
    }
}

/// Label fields printed on the back of the card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackFields {
    pub address: Option<String>,
    pub commune: Option<String>,
    pub region: Option<String>,
    pub marital_status: Option<String>,
    pub serie: Option<String>,
    pub profession: Option<String>,
    pub visa: Option<String>,
}

const BACK_STOPS: &str = r"DOMICILIO|COMUNA|REGI[OÓ]N|PROFESI[OÓ]N|ESTADO\s+CIVIL|NACI[OÓ]\s+EN|CIRCUNSCRIPCI[OÓ]N|SERIE|FOLIO";

fn line_value(caps: &Captures<'_>) -> Option<String> {
    let value = collapse_whitespace(caps.get(1)?.as_str());
    let value = value.trim_matches(|c: char| c == ':' || c == '.' || c == ',').trim();
    (value.chars().filter(|c| c.is_alphanumeric()).count() >= 2).then(|| value.to_string())
}

fn label_rules(label: &str) -> Vec<FieldRule<String>> {
    vec![FieldRule::new(
        "labelled_line",
        &format!(r"(?m)\b{label}[ \t]*:?[ \t]*\n?[ \t]*([^\n]+?)(?:[ \t]+(?:{BACK_STOPS})\b|[ \t]*$)"),
        line_value,
    )]
}

static ADDRESS_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| label_rules("DOMICILIO"));
static COMMUNE_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| label_rules("COMUNA"));
static REGION_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| label_rules(r"REGI[OÓ]N"));
static PROFESSION_RULES: Lazy<Vec<FieldRule<String>>> =
    Lazy::new(|| label_rules(r"PROFESI[OÓ]N"));
static MARITAL_STATUS_RULES: Lazy<Vec<FieldRule<String>>> =
    Lazy::new(|| label_rules(r"ESTADO\s+CIVIL"));
static SERIE_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| {
    vec![FieldRule::new(
        "serie_or_folio",
        r"\b(?:SERIE|FOLIO)[ \t:N°º.]*\n?[ \t]*([A-Z]?[0-9][0-9. ]{4,12}[0-9])",
        |caps| {
            let value: String = caps
                .get(1)?
                .as_str()
                .chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect();
            Some(value)
        },
    )]
});
static VISA_TYPE_RULES: Lazy<Vec<FieldRule<String>>> = Lazy::new(|| {
    vec![
        FieldRule::new(
            "visa_type",
            r"\bVISA\s+(?:DE\s+)?(DEFINITIVA|TEMPORARIA|TEMPORAL|SUJETA\s+A\s+CONTRATO|ESTUDIANTE)",
            |caps| Some(collapse_whitespace(caps.get(1)?.as_str())),
        ),
        FieldRule::new(
            "permanencia_definitiva",
            r"\bPERMANENCIA\s+DEFINITIVA",
            |_| Some("DEFINITIVA".to_string()),
        ),
        FieldRule::new("residencia_temporal", r"\bRESIDENCIA\s+TEMPORAL", |_| {
            Some("TEMPORAL".to_string())
        }),
    ]
});

/// Reads the label fields from back-of-card text.
pub fn parse_back_fields(text: &str) -> BackFields {
    let text = prepare(text);
    BackFields {
        address: first_success(&ADDRESS_RULES, &text),
        commune: first_success(&COMMUNE_RULES, &text),
        region: first_success(&REGION_RULES, &text),
        marital_status: first_success(&MARITAL_STATUS_RULES, &text),
        serie: first_success(&SERIE_RULES, &text),
        profession: first_success(&PROFESSION_RULES, &text),
        visa: first_success(&VISA_TYPE_RULES, &text),
    }
}
