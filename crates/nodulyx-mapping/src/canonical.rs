//! Canonical document value objects and their assembly state machine.
//!
//! Assembly runs `Initialized -> HeaderExtracted -> EntitiesExtracted ->
//! Finalized`; no transition may be skipped or repeated out of order. Once
//! finalized the document is an immutable value: downstream consumers copy
//! if they need to overlay derived fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use nodulyx_common::{NodulyxError, Result, TaggedValue};

/// Provenance of one canonical document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub source_id: String,
    pub profile_id: String,
    pub case_name: String,
    pub timestamp: DateTime<Utc>,
}

/// One coordinate-bearing region of interest under a nodule reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiEntity {
    /// Zero-based document-order position within the owning read. Stable
    /// even when a sibling ROI is dropped during extraction.
    pub index: usize,
    pub image_sop_uid: Option<String>,
    pub z_position: Option<f64>,
    pub inclusion: Option<bool>,
    /// First edge point of the contour; the remaining points are summarised
    /// by `edge_point_count`.
    pub primary_coord: Option<(f64, f64)>,
    pub edge_point_count: usize,
    /// Profile-mapped per-ROI values, keyed by target field name.
    #[serde(default)]
    pub values: BTreeMap<String, TaggedValue>,
}

/// One nodule reading with its characteristic map and nested ROIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoduleEntity {
    pub nodule_id: Option<String>,
    /// Zero-based index of the owning session group.
    pub session_index: usize,
    /// Zero-based position of this read within its session.
    pub read_index: usize,
    pub characteristics: BTreeMap<String, TaggedValue>,
    pub rois: Vec<RoiEntity>,
    /// Per-entity extraction failures; siblings are never aborted.
    pub quality_notes: Vec<String>,
}

/// One reading session. Radiologist identity is positional: session index i
/// maps to anonymized reader id i + 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEntity {
    pub index: usize,
    pub anonymized_reader_id: usize,
    pub annotation_version: Option<String>,
    pub read_count: usize,
}

/// The uniform output value object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub metadata: DocumentMetadata,
    pub scalar_fields: BTreeMap<String, TaggedValue>,
    pub nodules: Vec<NoduleEntity>,
    pub sessions: Vec<SessionEntity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildStage {
    Initialized,
    HeaderExtracted,
    EntitiesExtracted,
}

/// Staged assembly of a [`CanonicalDocument`].
#[derive(Debug)]
pub struct CanonicalBuilder {
    stage: BuildStage,
    metadata: DocumentMetadata,
    scalar_fields: BTreeMap<String, TaggedValue>,
    nodules: Vec<NoduleEntity>,
    sessions: Vec<SessionEntity>,
}

impl CanonicalBuilder {
    pub fn new(metadata: DocumentMetadata) -> Self {
        Self {
            stage: BuildStage::Initialized,
            metadata,
            scalar_fields: BTreeMap::new(),
            nodules: Vec::new(),
            sessions: Vec::new(),
        }
    }

    pub fn header(&mut self, scalar_fields: BTreeMap<String, TaggedValue>) -> Result<&mut Self> {
        if self.stage != BuildStage::Initialized {
            return Err(NodulyxError::Assembly(format!(
                "header extraction in stage {:?}",
                self.stage
            )));
        }
        self.scalar_fields = scalar_fields;
        self.stage = BuildStage::HeaderExtracted;
        Ok(self)
    }

    pub fn entities(
        &mut self,
        nodules: Vec<NoduleEntity>,
        sessions: Vec<SessionEntity>,
    ) -> Result<&mut Self> {
        if self.stage != BuildStage::HeaderExtracted {
            return Err(NodulyxError::Assembly(format!(
                "entity extraction in stage {:?}",
                self.stage
            )));
        }
        self.nodules = nodules;
        self.sessions = sessions;
        self.stage = BuildStage::EntitiesExtracted;
        Ok(self)
    }

    /// Consume the builder and yield the immutable document.
    pub fn finalize(self) -> Result<CanonicalDocument> {
        if self.stage != BuildStage::EntitiesExtracted {
            return Err(NodulyxError::Assembly(format!(
                "finalize in stage {:?}",
                self.stage
            )));
        }
        Ok(CanonicalDocument {
            metadata: self.metadata,
            scalar_fields: self.scalar_fields,
            nodules: self.nodules,
            sessions: self.sessions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> DocumentMetadata {
        DocumentMetadata {
            source_id: "doc-1".to_string(),
            profile_id: "generic".to_string(),
            case_name: "Full_Legacy".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_ordered_assembly_succeeds() {
        let mut b = CanonicalBuilder::new(metadata());
        b.header(BTreeMap::new()).unwrap();
        b.entities(vec![], vec![]).unwrap();
        let doc = b.finalize().unwrap();
        assert_eq!(doc.metadata.source_id, "doc-1");
    }

    #[test]
    fn test_skipping_header_is_rejected() {
        let mut b = CanonicalBuilder::new(metadata());
        let err = b.entities(vec![], vec![]).unwrap_err();
        assert!(matches!(err, NodulyxError::Assembly(_)));
    }

    #[test]
    fn test_repeated_header_is_rejected() {
        let mut b = CanonicalBuilder::new(metadata());
        b.header(BTreeMap::new()).unwrap();
        assert!(b.header(BTreeMap::new()).is_err());
    }

    #[test]
    fn test_finalize_before_entities_is_rejected() {
        let mut b = CanonicalBuilder::new(metadata());
        b.header(BTreeMap::new()).unwrap();
        assert!(b.finalize().is_err());
    }
}
