//! Profile mapping engine.
//!
//! Applies a compiled [`MappingProfile`] to a parsed document and assembles
//! the canonical output. Resolution is synchronous and CPU-bound; the engine
//! holds no state, so one instance can serve concurrent documents, each
//! against its own tree.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use nodulyx_common::{Result, ScalarValue, TaggedValue, XmlDocument, XmlElement};

use crate::canonical::{
    CanonicalBuilder, CanonicalDocument, DocumentMetadata, NoduleEntity, RoiEntity, SessionEntity,
};
use crate::coerce::coerce;
use crate::path::SourcePath;
use crate::profile::{EntityExtractionSpec, FieldMapping, MappingProfile};
use crate::transform::apply_pipeline;

/// Per-document resolution inputs.
#[derive(Debug, Clone)]
pub struct ResolveContext {
    pub source_id: String,
    pub case_name: String,
    /// Fields the matched case expects; drives the ExpectedButMissing vs
    /// NotApplicable distinction.
    pub expected_fields: BTreeSet<String>,
    /// Fixed assembly timestamp; None means now. Re-runs that must compare
    /// documents bit-for-bit pass the original timestamp.
    pub timestamp: Option<DateTime<Utc>>,
}

impl ResolveContext {
    pub fn new(source_id: &str, case_name: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            case_name: case_name.to_string(),
            expected_fields: BTreeSet::new(),
            timestamp: None,
        }
    }

    pub fn with_expected_fields(mut self, fields: BTreeSet<String>) -> Self {
        self.expected_fields = fields;
        self
    }
}

/// Stateless mapping engine.
#[derive(Debug, Default)]
pub struct ProfileMappingEngine;

impl ProfileMappingEngine {
    pub fn new() -> Self {
        Self
    }

    /// Project a document into its canonical form.
    pub fn resolve(
        &self,
        profile: &MappingProfile,
        doc: &XmlDocument,
        ctx: &ResolveContext,
    ) -> Result<CanonicalDocument> {
        // Matching is by prefix-stripped local name; the detected default
        // namespace is recorded for diagnostics only.
        debug!(
            profile = %profile.id,
            case = %ctx.case_name,
            namespace = ?doc.namespace,
            "Resolving document"
        );

        let mut builder = CanonicalBuilder::new(DocumentMetadata {
            source_id: ctx.source_id.clone(),
            profile_id: profile.id.clone(),
            case_name: ctx.case_name.clone(),
            timestamp: ctx.timestamp.unwrap_or_else(Utc::now),
        });

        // Flat scalar fields from non-array mappings.
        let mut scalars = BTreeMap::new();
        for mapping in profile.field_mappings.iter().filter(|m| !m.source_path.is_array()) {
            let value = self.resolve_scalar(mapping, &doc.root, ctx);
            scalars.insert(mapping.target_path.clone(), value);
        }
        builder.header(scalars)?;

        // Entity skeleton from the extraction spec, then array-bound
        // mappings layered onto the entities they index.
        let (mut nodules, sessions) =
            extract_entities(&profile.entity_spec, &doc.root, &ctx.expected_fields);
        self.apply_array_mappings(profile, &doc.root, ctx, &mut nodules);
        builder.entities(nodules, sessions)?;

        builder.finalize()
    }

    fn resolve_scalar(
        &self,
        mapping: &FieldMapping,
        root: &XmlElement,
        ctx: &ResolveContext,
    ) -> TaggedValue {
        let raw = resolve_matches(root, &mapping.source_path)
            .into_iter()
            .next()
            .and_then(|(_, el)| raw_value(el, mapping));
        tag_value(mapping, raw.as_deref(), ctx)
    }

    /// Every array-bound mapping iterates all matching source elements and
    /// attaches one value per match to the entity addressed by its array
    /// indices, so a value keeps the iteration context it was found in.
    /// `nodule.*` targets land on the characteristic map of the
    /// (session, read) nodule; `roi.*` targets land on the value map of the
    /// (session, read, roi) region.
    fn apply_array_mappings(
        &self,
        profile: &MappingProfile,
        root: &XmlElement,
        ctx: &ResolveContext,
        nodules: &mut [NoduleEntity],
    ) {
        // (session index, read index) -> position in the nodule list.
        let nodule_pos: HashMap<(usize, usize), usize> = nodules
            .iter()
            .enumerate()
            .map(|(pos, n)| ((n.session_index, n.read_index), pos))
            .collect();
        // (session, read, ROI document index) -> (nodule, ROI) positions.
        // Keyed on the ROI's document-order index so an ROI dropped during
        // extraction leaves its siblings addressable.
        let roi_pos: HashMap<(usize, usize, usize), (usize, usize)> = nodules
            .iter()
            .enumerate()
            .flat_map(|(pos, n)| {
                n.rois
                    .iter()
                    .enumerate()
                    .map(move |(rpos, roi)| ((n.session_index, n.read_index, roi.index), (pos, rpos)))
            })
            .collect();

        for mapping in profile.field_mappings.iter().filter(|m| m.source_path.is_array()) {
            if let Some(field) = roi_value_target(&mapping.target_path) {
                for (indices, el) in resolve_matches(root, &mapping.source_path) {
                    let key = (
                        indices.first().copied().unwrap_or(0),
                        indices.get(1).copied().unwrap_or(0),
                        indices.get(2).copied().unwrap_or(0),
                    );
                    let Some(&(pos, rpos)) = roi_pos.get(&key) else {
                        continue;
                    };
                    let raw = raw_value(el, mapping);
                    let value = tag_value(mapping, raw.as_deref(), ctx);
                    nodules[pos].rois[rpos].values.insert(field.to_string(), value);
                }
            } else if let Some(field) = nodule_characteristic_target(&mapping.target_path) {
                for (indices, el) in resolve_matches(root, &mapping.source_path) {
                    let key = (
                        indices.first().copied().unwrap_or(0),
                        indices.get(1).copied().unwrap_or(0),
                    );
                    let Some(&pos) = nodule_pos.get(&key) else {
                        continue;
                    };
                    let raw = raw_value(el, mapping);
                    let value = tag_value(mapping, raw.as_deref(), ctx);
                    nodules[pos]
                        .characteristics
                        .insert(field.to_string(), value);
                }
            } else {
                debug!(
                    target = %mapping.target_path,
                    "Array-bound mapping with non-entity target, skipping"
                );
            }
        }
    }
}

/// Resolve a path against the tree. Non-array segments take the first match;
/// array-bound segments iterate every match and extend the index vector.
fn resolve_matches<'a>(
    root: &'a XmlElement,
    path: &'a SourcePath,
) -> Vec<(Vec<usize>, &'a XmlElement)> {
    let mut current: Vec<(Vec<usize>, &'a XmlElement)> = vec![(Vec::new(), root)];
    for segment in &path.segments {
        let mut next = Vec::new();
        for (indices, el) in current {
            if segment.array_binding {
                for (i, child) in el.children_named(&segment.name).enumerate() {
                    let mut idx = indices.clone();
                    idx.push(i);
                    next.push((idx, child));
                }
            } else if let Some(child) = el.child(&segment.name) {
                next.push((indices, child));
            }
        }
        current = next;
    }
    current
}

fn raw_value(el: &XmlElement, mapping: &FieldMapping) -> Option<String> {
    match &mapping.source_attribute {
        Some(attr) => el.attr(attr).map(str::to_string),
        None => el.trimmed_text().map(str::to_string),
    }
}

/// Coerce, transform, and tag one raw value per the three-way distinction.
fn tag_value(mapping: &FieldMapping, raw: Option<&str>, ctx: &ResolveContext) -> TaggedValue {
    let field_name = mapping
        .source_path
        .segments
        .last()
        .map(|s| s.name.as_str())
        .unwrap_or_default();

    match raw {
        Some(raw) => match coerce(raw, mapping.data_type) {
            Ok(v) => TaggedValue::Present(apply_pipeline(v, &mapping.transformations)),
            Err(e) => {
                warn!(
                    target = %mapping.target_path,
                    raw,
                    error = %e,
                    "Type coercion failed"
                );
                match coerced_default(mapping) {
                    Some(v) => TaggedValue::Present(v),
                    None => TaggedValue::Invalid(raw.to_string()),
                }
            }
        },
        None => match coerced_default(mapping) {
            Some(v) => TaggedValue::Present(v),
            None if ctx.expected_fields.contains(field_name) => TaggedValue::ExpectedButMissing,
            None => TaggedValue::NotApplicable,
        },
    }
}

fn coerced_default(mapping: &FieldMapping) -> Option<ScalarValue> {
    let default = mapping.default_value.as_deref()?;
    match coerce(default, mapping.data_type) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(target = %mapping.target_path, error = %e, "Default value failed coercion");
            None
        }
    }
}

fn nodule_characteristic_target(target: &str) -> Option<&str> {
    target
        .strip_prefix("nodule.characteristics.")
        .or_else(|| target.strip_prefix("nodule."))
}

fn roi_value_target(target: &str) -> Option<&str> {
    target.strip_prefix("roi.")
}

// ── Entity extraction ────────────────────────────────────────────────────────

/// Walk session/read/ROI groups into canonical entities. A failure on one
/// nodule or ROI becomes a quality note on its owner; siblings continue.
fn extract_entities(
    spec: &EntityExtractionSpec,
    root: &XmlElement,
    expected: &BTreeSet<String>,
) -> (Vec<NoduleEntity>, Vec<SessionEntity>) {
    let session_names: Vec<&str> = spec.session_elements.iter().map(String::as_str).collect();
    let read_names: Vec<&str> = spec.read_elements.iter().map(String::as_str).collect();

    let mut nodules = Vec::new();
    let mut sessions = Vec::new();

    for (s_idx, session) in root.children_of_any(&session_names).into_iter().enumerate() {
        let reads = session.children_of_any(&read_names);
        sessions.push(SessionEntity {
            index: s_idx,
            anonymized_reader_id: s_idx + 1,
            annotation_version: session
                .child_text(&spec.annotation_version_element)
                .map(str::to_string),
            read_count: reads.len(),
        });

        for (r_idx, read) in reads.into_iter().enumerate() {
            nodules.push(extract_nodule(spec, read, s_idx, r_idx, expected));
        }
    }

    (nodules, sessions)
}

fn extract_nodule(
    spec: &EntityExtractionSpec,
    read: &XmlElement,
    session_index: usize,
    read_index: usize,
    expected: &BTreeSet<String>,
) -> NoduleEntity {
    let mut nodule = NoduleEntity {
        nodule_id: read.child_text(&spec.nodule_id_element).map(str::to_string),
        session_index,
        read_index,
        characteristics: BTreeMap::new(),
        rois: Vec::new(),
        quality_notes: Vec::new(),
    };

    // Characteristics live under the container element; some intermediate
    // exports carry them directly on the read.
    let scope = read.child(&spec.characteristic_container).unwrap_or(read);
    for (field, dtype) in &spec.characteristic_types {
        let value = match scope.child_text(field) {
            Some(raw) => match coerce(raw, *dtype) {
                Ok(v) => TaggedValue::Present(v),
                Err(_) => TaggedValue::Invalid(raw.to_string()),
            },
            None if expected.contains(field) => TaggedValue::ExpectedButMissing,
            None => TaggedValue::NotApplicable,
        };
        nodule.characteristics.insert(field.clone(), value);
    }

    for (roi_idx, roi_el) in read.children_named(&spec.roi_element).enumerate() {
        match extract_roi(spec, roi_el, roi_idx) {
            Ok(roi) => nodule.rois.push(roi),
            Err(note) => {
                warn!(
                    nodule = ?nodule.nodule_id,
                    roi = roi_idx,
                    note = %note,
                    "ROI extraction failed, continuing with siblings"
                );
                nodule.quality_notes.push(format!("roi {roi_idx}: {note}"));
            }
        }
    }

    nodule
}

/// The first edge point becomes the primary coordinate; the total count is
/// kept for contour-size reporting.
fn extract_roi(
    spec: &EntityExtractionSpec,
    roi_el: &XmlElement,
    index: usize,
) -> std::result::Result<RoiEntity, String> {
    let edges: Vec<&XmlElement> = roi_el.children_named(&spec.edge_element).collect();

    let primary_coord = match edges.first() {
        Some(edge) => {
            let x = coord_of(edge, &spec.coord_x)?;
            let y = coord_of(edge, &spec.coord_y)?;
            Some((x, y))
        }
        None => None,
    };

    let z_position = match roi_el.child_text(&spec.z_position_element) {
        Some(raw) => Some(
            raw.parse::<f64>()
                .map_err(|_| format!("bad z position '{raw}'"))?,
        ),
        None => None,
    };

    let inclusion = roi_el
        .child_text(&spec.inclusion_element)
        .map(|raw| raw.eq_ignore_ascii_case("true") || raw == "1");

    Ok(RoiEntity {
        index,
        image_sop_uid: roi_el
            .child_text(&spec.image_sop_element)
            .map(str::to_string),
        z_position,
        inclusion,
        primary_coord,
        edge_point_count: edges.len(),
        values: BTreeMap::new(),
    })
}

fn coord_of(edge: &XmlElement, name: &str) -> std::result::Result<f64, String> {
    let raw = edge
        .child_text(name)
        .ok_or_else(|| format!("edge point missing {name}"))?;
    raw.parse::<f64>()
        .map_err(|_| format!("bad coordinate {name}='{raw}'"))
}
