use crate::decode::RawRow;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Canonical per-row import record. Field names here (not the many
/// spreadsheet header spellings) are what the rest of the pipeline and
/// the preview/confirm JSON use.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StudentRowInput {
    pub row_number: usize,
    pub name: String,
    pub uid: String,
    pub dob: String,
    pub gender: String,
    pub nationality: String,
    pub city: String,
    #[serde(rename = "class")]
    pub class_grade: String,
    pub blood_group: String,
    pub relationship: String,
    pub sport: String,
    pub distance: String,
    pub sport_sub_type: String,
    pub parent_email: String,
    pub parent_name: String,
    pub phone_number: String,
    pub country_code: String,
    pub medical_conditions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_dob: Option<String>,
}

struct FieldSpec {
    field: &'static str,
    /// Exact header candidates, tried in order. The starred spellings are
    /// the published template headers and must stay verbatim.
    keys: &'static [&'static str],
    fuzzy: Option<&'static str>,
}

const FIELD_SPECS: &[FieldSpec] = &[
    FieldSpec {
        field: "name",
        keys: &["Name *", "Name", "Student Name"],
        fuzzy: Some(r"(?i)^(student\s*)?name\b"),
    },
    FieldSpec {
        field: "uid",
        keys: &["UID *", "UID", "Student ID"],
        fuzzy: Some(r"(?i)^uid\b|student\s*id"),
    },
    FieldSpec {
        field: "dob",
        keys: &["Date of Birth (DD-MMM-YYYY) *", "Date of Birth", "DOB"],
        fuzzy: Some(r"(?i)date\s*of\s*birth|^dob\b"),
    },
    FieldSpec {
        field: "gender",
        keys: &["Gender (male/female/other) *", "Gender"],
        fuzzy: Some(r"(?i)^gender\b"),
    },
    FieldSpec {
        field: "nationality",
        keys: &["Nationality *", "Nationality"],
        fuzzy: Some(r"(?i)nationality"),
    },
    FieldSpec {
        field: "city",
        keys: &["City *", "City"],
        fuzzy: Some(r"(?i)^city\b"),
    },
    FieldSpec {
        field: "class",
        keys: &["Class *", "Class", "Grade", "Class/Grade"],
        fuzzy: Some(r"(?i)^class\b|^grade\b"),
    },
    FieldSpec {
        field: "bloodGroup",
        keys: &["Blood Group *", "Blood Group"],
        fuzzy: Some(r"(?i)blood\s*group"),
    },
    FieldSpec {
        field: "relationship",
        keys: &["Relationship *", "Relationship"],
        fuzzy: Some(r"(?i)relationship"),
    },
    FieldSpec {
        field: "sport",
        keys: &["Sport *", "Sport"],
        fuzzy: Some(r"(?i)^sport\s*\*?$"),
    },
    FieldSpec {
        field: "distance",
        keys: &["Distance *", "Distance"],
        fuzzy: Some(r"(?i)^distance"),
    },
    FieldSpec {
        field: "sportSubType",
        keys: &["Sport Sub Type *", "Sport Sub Type", "Sub Type"],
        fuzzy: Some(r"(?i)sub\s*-?\s*type"),
    },
    FieldSpec {
        field: "parentEmail",
        keys: &["Parent Email *", "Parent Email", "Email"],
        fuzzy: Some(r"(?i)parent.*email|^e-?mail\b"),
    },
    FieldSpec {
        field: "parentName",
        keys: &["Parent Name *", "Parent Name"],
        fuzzy: Some(r"(?i)(parent|guardian).*name"),
    },
    FieldSpec {
        field: "phoneNumber",
        keys: &["Phone Number *", "Phone Number", "Mobile"],
        fuzzy: Some(r"(?i)phone|mobile"),
    },
    FieldSpec {
        field: "countryCode",
        keys: &["Country Code *", "Country Code"],
        fuzzy: Some(r"(?i)country\s*code"),
    },
    FieldSpec {
        field: "medicalConditions",
        keys: &["Medical Conditions", "Medical Conditions (if any)"],
        fuzzy: Some(r"(?i)medical"),
    },
];

/// Template files ship with a decorated first data row telling the user
/// how to fill the Sport column. Such a row is skipped, not errored.
const INSTRUCTION_MARKERS: &[&str] = &[
    "please select",
    "choose from",
    "for example",
    "e.g.",
    "delete this row",
];

pub struct Mapper {
    fuzzy: Vec<Option<Regex>>,
}

impl Mapper {
    pub fn new() -> Self {
        let fuzzy = FIELD_SPECS
            .iter()
            .map(|spec| spec.fuzzy.and_then(|pattern| Regex::new(pattern).ok()))
            .collect();
        Mapper { fuzzy }
    }

    /// Map one raw row onto the canonical shape. Returns None for rows that
    /// are skipped entirely: all-empty rows and the template's instruction
    /// decoration row.
    pub fn map_row(&self, raw: &RawRow) -> Option<StudentRowInput> {
        // Deterministic fuzzy fallback regardless of hash order.
        let mut sorted_headers: Vec<&String> = raw.cells.keys().collect();
        sorted_headers.sort();

        let mut picked: Vec<String> = Vec::with_capacity(FIELD_SPECS.len());
        for (i, spec) in FIELD_SPECS.iter().enumerate() {
            let mut value = String::new();
            for key in spec.keys {
                if let Some(v) = raw.cells.get(*key) {
                    if !v.trim().is_empty() {
                        value = v.trim().to_string();
                        break;
                    }
                }
            }
            if value.is_empty() {
                if let Some(re) = &self.fuzzy[i] {
                    for header in &sorted_headers {
                        if re.is_match(header) {
                            let v = raw.cells[*header].trim();
                            if !v.is_empty() {
                                value = v.to_string();
                                break;
                            }
                        }
                    }
                }
            }
            picked.push(value);
        }

        if picked.iter().all(|v| v.is_empty()) {
            return None;
        }

        let get = |field: &str| -> String {
            FIELD_SPECS
                .iter()
                .position(|s| s.field == field)
                .map(|i| picked[i].clone())
                .unwrap_or_default()
        };

        let sport = get("sport");
        if raw.number == 2 && is_instruction_text(&sport) {
            return None;
        }

        Some(StudentRowInput {
            row_number: raw.number,
            name: get("name"),
            uid: get("uid"),
            dob: get("dob"),
            gender: get("gender").to_lowercase(),
            nationality: get("nationality"),
            city: get("city"),
            class_grade: get("class"),
            blood_group: normalize_blood_group(&get("bloodGroup")),
            relationship: get("relationship").to_lowercase(),
            sport,
            distance: get("distance"),
            sport_sub_type: get("sportSubType"),
            parent_email: get("parentEmail"),
            parent_name: get("parentName"),
            phone_number: get("phoneNumber"),
            country_code: get("countryCode"),
            medical_conditions: get("medicalConditions"),
            formatted_dob: None,
        })
    }
}

fn is_instruction_text(sport: &str) -> bool {
    let lower = sport.to_lowercase();
    INSTRUCTION_MARKERS.iter().any(|m| lower.contains(m))
}

/// Single-letter groups mean the positive variant; anything that is not a
/// recognized group is stored as "Unknown".
pub fn normalize_blood_group(raw: &str) -> String {
    let up = raw.trim().to_uppercase();
    match up.as_str() {
        "A" | "B" | "AB" | "O" => format!("{}+", up),
        "A+" | "A-" | "B+" | "B-" | "AB+" | "AB-" | "O+" | "O-" => up,
        _ => "Unknown".to_string(),
    }
}
