//! Structural feature extraction.
//!
//! Derives the feature vector a document is classified on. Extraction is a
//! pure read of the parsed tree: it never mutates the document and the
//! vector is immutable once built.

use serde::Serialize;
use std::collections::BTreeSet;

use nodulyx_common::{XmlDocument, XmlElement};

/// Legacy-era characteristic vocabulary (4 fields).
pub const LEGACY_CHARACTERISTIC_FIELDS: [&str; 4] =
    ["confidence", "subtlety", "obscuration", "reason"];

/// v2-era characteristic vocabulary (9 fields).
pub const V2_CHARACTERISTIC_FIELDS: [&str; 9] = [
    "subtlety",
    "internalStructure",
    "calcification",
    "sphericity",
    "margin",
    "lobulation",
    "spiculation",
    "texture",
    "malignancy",
];

/// Header fields counted towards completeness.
pub const HEADER_REQUIRED_FIELDS: [&str; 2] = ["StudyInstanceUID", "SeriesInstanceUID"];

/// Two historically distinct session tags name the same logical concept.
pub const SESSION_TAGS: [&str; 2] = ["readingSession", "CXRreadingSession"];

/// Same for the nested read group.
pub const READ_TAGS: [&str; 2] = ["unblindedReadNodule", "unblindedRead"];

const HEADER_TAG: &str = "ResponseHeader";
const MODALITY_TAG: &str = "Modality";
const CHARACTERISTICS_TAG: &str = "characteristics";

/// Minimum populated v2 fields for a document to count as v2 format.
pub const V2_FORMAT_THRESHOLD: usize = 5;

/// Structural shape of one document; derived once, immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuralFeatureVector {
    pub header_present: bool,
    pub header_complete: bool,
    pub has_modality: bool,
    pub session_count: u32,
    pub legacy_characteristic_fields: BTreeSet<String>,
    pub is_v2_format: bool,
    pub v2_characteristic_fields: BTreeSet<String>,
    pub v2_field_count: u32,
}

impl StructuralFeatureVector {
    pub fn legacy_count(&self) -> u32 {
        self.legacy_characteristic_fields.len() as u32
    }

    pub fn has_reason(&self) -> bool {
        self.legacy_characteristic_fields.contains("reason")
    }
}

/// Extract the structural feature vector from a parsed document.
pub fn extract_features(doc: &XmlDocument) -> StructuralFeatureVector {
    let root = &doc.root;
    let header = root.child(HEADER_TAG);

    let header_present = header.is_some();
    let header_complete = header
        .map(|h| {
            HEADER_REQUIRED_FIELDS
                .iter()
                .all(|f| h.has_populated_child(f))
        })
        .unwrap_or(false);
    let has_modality = header
        .map(|h| h.has_populated_child(MODALITY_TAG))
        .unwrap_or(false)
        || root.descendant(MODALITY_TAG).and_then(|m| m.trimmed_text()).is_some();

    let sessions = root.children_of_any(&SESSION_TAGS);
    let session_count = sessions.len() as u32;

    // Characteristic fields come from the first read that carries any
    // populated value; sessions are scanned in order so a document whose
    // early sessions are empty still exposes its shape.
    let mut legacy_fields = BTreeSet::new();
    let mut v2_fields = BTreeSet::new();
    'sessions: for session in &sessions {
        for read in session.children_of_any(&READ_TAGS) {
            let legacy = populated_legacy_fields(read);
            let v2 = populated_v2_fields(read);
            if !legacy.is_empty() || !v2.is_empty() {
                legacy_fields = legacy;
                v2_fields = v2;
                break 'sessions;
            }
        }
    }

    let v2_field_count = v2_fields.len() as u32;
    StructuralFeatureVector {
        header_present,
        header_complete,
        has_modality,
        session_count,
        legacy_characteristic_fields: legacy_fields,
        is_v2_format: v2_field_count as usize >= V2_FORMAT_THRESHOLD,
        v2_characteristic_fields: v2_fields,
        v2_field_count,
    }
}

fn populated_legacy_fields(read: &XmlElement) -> BTreeSet<String> {
    LEGACY_CHARACTERISTIC_FIELDS
        .iter()
        .filter(|f| read.has_populated_child(f))
        .map(|f| f.to_string())
        .collect()
}

fn populated_v2_fields(read: &XmlElement) -> BTreeSet<String> {
    // v2 characteristics nest under a container element; some intermediate
    // exports carried them directly on the read.
    let scope = read.child(CHARACTERISTICS_TAG).unwrap_or(read);
    V2_CHARACTERISTIC_FIELDS
        .iter()
        .filter(|f| scope.has_populated_child(f))
        .map(|f| f.to_string())
        .collect()
}
