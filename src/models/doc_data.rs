use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::extraction::{back_document::BackFields, fields::FrontFields, mrz::MrzFields};

/// Sparse identity-document data accumulated across the verification steps.
///
/// Each step owns a set of keys. Re-running a step clears and re-derives
/// its own keys; MRZ-derived values overwrite front-OCR values for the
/// keys both produce, and nothing else erases a confirmed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_names: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nationality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commune: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marital_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profession: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visa: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_resident: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_mrz: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mrz_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_qr: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selfie_image: Option<String>,
}

/// Overwrites `slot` only when the more authoritative source produced a value.
fn prefer<T>(slot: &mut Option<T>, authoritative: Option<T>) {
    if authoritative.is_some() {
        *slot = authoritative;
    }
}

/// Fills `slot` only when nothing was confirmed for it yet.
fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
    if slot.is_none() {
        *slot = value;
    }
}

impl DocData {
    /// Replaces every front-owned key with a fresh extraction.
    pub fn apply_front(&mut self, front: FrontFields, image_ref: &str) {
        self.full_name = front.full_name;
        self.first_names = front.first_names;
        self.last_names = front.last_names;
        self.rut = front.rut;
        self.birth_date = front.birth_date;
        self.issue_date = front.issue_date;
        self.expiry_date = front.expiry_date;
        self.sex = front.sex;
        self.nationality = front.nationality;
        self.document_number = front.document_number;
        self.front_image = Some(image_ref.to_string());
        self.refresh_foreign_resident();
    }

    /// Clears the back-owned keys so a retried back step starts clean.
    pub fn reset_back(&mut self, image_ref: &str) {
        self.address = None;
        self.commune = None;
        self.region = None;
        self.marital_status = None;
        self.serie = None;
        self.profession = None;
        self.visa = None;
        self.has_mrz = None;
        self.mrz_raw = None;
        self.has_qr = None;
        self.back_image = Some(image_ref.to_string());
    }

    /// Merges label fields read from the back of the card.
    pub fn apply_back(&mut self, back: BackFields) {
        fill(&mut self.address, back.address);
        fill(&mut self.commune, back.commune);
        fill(&mut self.region, back.region);
        fill(&mut self.marital_status, back.marital_status);
        fill(&mut self.serie, back.serie);
        fill(&mut self.profession, back.profession);
        fill(&mut self.visa, back.visa);
        self.refresh_foreign_resident();
    }

    /// Merges MRZ-derived values, which win over front OCR for shared keys.
    pub fn apply_mrz(&mut self, mrz: MrzFields) {
        prefer(&mut self.rut, mrz.rut);
        prefer(&mut self.document_number, mrz.document_number);
        prefer(&mut self.birth_date, mrz.birth_date);
        prefer(&mut self.expiry_date, mrz.expiry_date);
        prefer(&mut self.sex, mrz.sex);
        prefer(&mut self.nationality, mrz.nationality);
        prefer(&mut self.last_names, mrz.surnames);
        prefer(&mut self.first_names, mrz.given_names);
        match (&self.first_names, &self.last_names) {
            (Some(first), Some(last)) => self.full_name = Some(format!("{} {}", first, last)),
            _ => prefer(&mut self.full_name, mrz.full_name),
        }
        self.refresh_foreign_resident();
    }

    fn refresh_foreign_resident(&mut self) {
        let foreign_nationality = self
            .nationality
            .as_deref()
            .map(|n| !matches!(n, "CHL" | "CHILENA" | "CHILENO"));
        self.foreign_resident = match (foreign_nationality, self.visa.is_some()) {
            (_, true) => Some(true),
            (Some(foreign), false) => Some(foreign),
            (None, false) => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn front() -> FrontFields {
        FrontFields {
            full_name: Some("JUAN CARLOS GONZALEZ PEREZ".into()),
            first_names: Some("JUAN CARLOS".into()),
            last_names: Some("GONZALEZ PEREZ".into()),
            rut: Some("123456785".into()),
            nationality: Some("CHILENA".into()),
            document_number: Some("500123456".into()),
            ..FrontFields::default()
        }
    }

    #[test]
    fn mrz_values_override_front_values() {
        let mut doc = DocData::default();
        doc.apply_front(front(), "front.jpg");

        doc.apply_mrz(MrzFields {
            nationality: Some("CHL".into()),
            rut: Some("123456785".into()),
            full_name: Some("JUAN CARLOS GONZALEZ PEREZ".into()),
            ..MrzFields::default()
        });

        assert_eq!(doc.nationality.as_deref(), Some("CHL"));
        assert_eq!(doc.foreign_resident, Some(false));
        assert_eq!(doc.document_number.as_deref(), Some("500123456"));
    }

    #[test]
    fn missing_mrz_values_keep_front_values() {
        let mut doc = DocData::default();
        doc.apply_front(front(), "front.jpg");
        doc.apply_mrz(MrzFields::default());

        assert_eq!(doc.rut.as_deref(), Some("123456785"));
        assert_eq!(doc.last_names.as_deref(), Some("GONZALEZ PEREZ"));
    }

    #[test]
    fn surname_only_mrz_keeps_front_given_names_in_full_name() {
        let mut doc = DocData::default();
        doc.apply_front(front(), "front.jpg");

        doc.apply_mrz(MrzFields {
            surnames: Some("GONZALEZ PIZARRO".into()),
            full_name: Some("GONZALEZ PIZARRO".into()),
            ..MrzFields::default()
        });

        assert_eq!(doc.first_names.as_deref(), Some("JUAN CARLOS"));
        assert_eq!(doc.last_names.as_deref(), Some("GONZALEZ PIZARRO"));
        assert_eq!(doc.full_name.as_deref(), Some("JUAN CARLOS GONZALEZ PIZARRO"));
    }

    #[test]
    fn mrz_full_name_used_when_parts_are_missing() {
        let mut doc = DocData::default();
        doc.apply_mrz(MrzFields {
            surnames: Some("GONZALEZ PEREZ".into()),
            full_name: Some("GONZALEZ PEREZ".into()),
            ..MrzFields::default()
        });

        assert_eq!(doc.full_name.as_deref(), Some("GONZALEZ PEREZ"));
    }

    #[test]
    fn reapplying_front_rederives_from_scratch() {
        let mut doc = DocData::default();
        doc.apply_front(front(), "front.jpg");
        doc.apply_front(
            FrontFields {
                rut: Some("76543216".into()),
                ..FrontFields::default()
            },
            "front-retry.jpg",
        );

        assert_eq!(doc.rut.as_deref(), Some("76543216"));
        assert_eq!(doc.full_name, None);
        assert_eq!(doc.front_image.as_deref(), Some("front-retry.jpg"));
    }

    #[test]
    fn visa_marks_foreign_resident() {
        let mut doc = DocData::default();
        doc.apply_back(BackFields {
            visa: Some("DEFINITIVA".into()),
            ..BackFields::default()
        });
        assert_eq!(doc.foreign_resident, Some(true));
    }
}
