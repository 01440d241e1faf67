//! Stateless tabular projection for legacy consumers.
//!
//! One flat record per (nodule, ROI) pair; a nodule with zero ROIs emits one
//! synthetic missing-ROI row so it is never silently dropped. No extraction
//! logic lives here: the projection is reproducible bit-for-bit from a given
//! canonical document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use nodulyx_common::TaggedValue;

use crate::canonical::{CanonicalDocument, NoduleEntity, RoiEntity};

/// One row of the flat projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub source_id: String,
    pub case_name: String,
    pub header_fields: BTreeMap<String, TaggedValue>,
    pub session_index: usize,
    pub anonymized_reader_id: usize,
    pub nodule_id: Option<String>,
    pub characteristics: BTreeMap<String, TaggedValue>,
    /// True for the synthetic row of a nodule without ROIs.
    pub roi_missing: bool,
    pub image_sop_uid: Option<String>,
    pub z_position: Option<f64>,
    pub inclusion: Option<bool>,
    pub primary_coord: Option<(f64, f64)>,
    pub edge_point_count: usize,
    /// Profile-mapped per-ROI values; empty for the synthetic row.
    pub roi_values: BTreeMap<String, TaggedValue>,
}

/// Project a finalized document into flat rows.
pub fn flatten(doc: &CanonicalDocument) -> Vec<FlatRecord> {
    let mut rows = Vec::new();
    for nodule in &doc.nodules {
        if nodule.rois.is_empty() {
            rows.push(row(doc, nodule, None));
        } else {
            for roi in &nodule.rois {
                rows.push(row(doc, nodule, Some(roi)));
            }
        }
    }
    rows
}

fn row(doc: &CanonicalDocument, nodule: &NoduleEntity, roi: Option<&RoiEntity>) -> FlatRecord {
    FlatRecord {
        source_id: doc.metadata.source_id.clone(),
        case_name: doc.metadata.case_name.clone(),
        header_fields: doc.scalar_fields.clone(),
        session_index: nodule.session_index,
        anonymized_reader_id: nodule.session_index + 1,
        nodule_id: nodule.nodule_id.clone(),
        characteristics: nodule.characteristics.clone(),
        roi_missing: roi.is_none(),
        image_sop_uid: roi.and_then(|r| r.image_sop_uid.clone()),
        z_position: roi.and_then(|r| r.z_position),
        inclusion: roi.and_then(|r| r.inclusion),
        primary_coord: roi.and_then(|r| r.primary_coord),
        edge_point_count: roi.map(|r| r.edge_point_count).unwrap_or(0),
        roi_values: roi.map(|r| r.values.clone()).unwrap_or_default(),
    }
}
